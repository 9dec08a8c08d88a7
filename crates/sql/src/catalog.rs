use std::sync::Arc;

use quarry_common::{CatalogConfig, LogicalTableDefinition, MetricDescriptor};

/// Name resolution for the compiler and the pushdown planner.
pub trait Catalog: Send + Sync {
    /// Case-insensitive table lookup.
    fn table(&self, name: &str) -> Option<Arc<LogicalTableDefinition>>;

    fn metric(&self, name: &str) -> Option<Arc<MetricDescriptor>>;

    fn table_names(&self) -> Vec<String>;
}

impl Catalog for CatalogConfig {
    fn table(&self, name: &str) -> Option<Arc<LogicalTableDefinition>> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .map(|t| Arc::new(t.clone()))
    }

    fn metric(&self, name: &str) -> Option<Arc<MetricDescriptor>> {
        self.metrics
            .iter()
            .find(|m| m.name == name)
            .map(|m| Arc::new(m.clone()))
    }

    fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }
}
