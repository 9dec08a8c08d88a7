//! Read-mostly registry of metrics and logical tables.
//!
//! Readers take an `Arc` snapshot; `refresh` validates a new catalog, builds a
//! fresh snapshot and swaps it in under the write lock. A query compiled
//! against one snapshot never sees a half-applied refresh.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use quarry_common::{CatalogConfig, LogicalTableDefinition, MetricDescriptor};
use quarry_error::Result;
use quarry_sql::Catalog;
use tracing::info;

/// Immutable view of one catalog generation.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    /// Keyed by lower-cased table name.
    tables: HashMap<String, Arc<LogicalTableDefinition>>,
    metrics: HashMap<String, Arc<MetricDescriptor>>,
    table_order: Vec<String>,
}

impl RegistrySnapshot {
    fn build(catalog: CatalogConfig) -> Result<Self> {
        catalog.validate()?;
        let table_order = catalog.tables.iter().map(|t| t.name.clone()).collect();
        Ok(Self {
            tables: catalog
                .tables
                .into_iter()
                .map(|t| (t.name.to_lowercase(), Arc::new(t)))
                .collect(),
            metrics: catalog
                .metrics
                .into_iter()
                .map(|m| (m.name.clone(), Arc::new(m)))
                .collect(),
            table_order,
        })
    }

    pub fn metric_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.metrics.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Catalog for RegistrySnapshot {
    fn table(&self, name: &str) -> Option<Arc<LogicalTableDefinition>> {
        self.tables.get(&name.to_lowercase()).cloned()
    }

    fn metric(&self, name: &str) -> Option<Arc<MetricDescriptor>> {
        self.metrics.get(name).cloned()
    }

    fn table_names(&self) -> Vec<String> {
        self.table_order.clone()
    }
}

#[derive(Debug, Default)]
pub struct TableRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl TableRegistry {
    pub fn new(catalog: CatalogConfig) -> Result<Self> {
        Ok(Self {
            current: RwLock::new(Arc::new(RegistrySnapshot::build(catalog)?)),
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(CatalogConfig::from_file(path)?)
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Case-insensitive.
    pub fn get_table(&self, name: &str) -> Option<Arc<LogicalTableDefinition>> {
        self.snapshot().table(name)
    }

    pub fn get_metric(&self, name: &str) -> Option<Arc<MetricDescriptor>> {
        self.snapshot().metric(name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.snapshot().table_names()
    }

    pub fn metric_names(&self) -> Vec<String> {
        self.snapshot().metric_names()
    }

    /// Replaces the whole catalog. On error the current one stays in place.
    pub fn refresh(&self, catalog: CatalogConfig) -> Result<()> {
        let next = Arc::new(RegistrySnapshot::build(catalog)?);
        let (tables, metrics) = (next.tables.len(), next.metrics.len());
        *self.current.write() = next;
        info!(tables, metrics, "registry refreshed");
        Ok(())
    }
}

impl Catalog for TableRegistry {
    fn table(&self, name: &str) -> Option<Arc<LogicalTableDefinition>> {
        self.get_table(name)
    }

    fn metric(&self, name: &str) -> Option<Arc<MetricDescriptor>> {
        self.get_metric(name)
    }

    fn table_names(&self) -> Vec<String> {
        TableRegistry::table_names(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_error::ErrorCode;

    const CATALOG: &str = r#"
metrics:
  - name: m1
    source_kind: file_csv
    source_locator: /m1.csv
    field_types: { id: LONG, v: DOUBLE }
tables:
  - name: Facts
    primary_keys: [id]
    field_to_metric: { id: m1, v: m1 }
"#;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = TableRegistry::new(CatalogConfig::from_yaml_str(CATALOG).unwrap()).unwrap();
        assert_eq!(registry.get_table("FACTS").unwrap().name, "Facts");
        assert_eq!(registry.get_table("facts").unwrap().name, "Facts");
        assert!(registry.get_metric("M1").is_none());
        assert_eq!(registry.table_names(), vec!["Facts"]);
    }

    #[test]
    fn test_refresh_swaps_and_keeps_old_snapshots_alive() {
        let registry = TableRegistry::new(CatalogConfig::from_yaml_str(CATALOG).unwrap()).unwrap();
        let before = registry.snapshot();

        let renamed = CATALOG.replace("name: Facts", "name: Readings");
        registry
            .refresh(CatalogConfig::from_yaml_str(&renamed).unwrap())
            .unwrap();

        assert!(registry.get_table("facts").is_none());
        assert!(registry.get_table("readings").is_some());
        assert!(before.table("facts").is_some());
    }

    #[test]
    fn test_invalid_refresh_keeps_current_catalog() {
        let registry = TableRegistry::new(CatalogConfig::from_yaml_str(CATALOG).unwrap()).unwrap();
        let mut broken = CatalogConfig::from_yaml_str(CATALOG).unwrap();
        broken.tables[0].primary_keys = vec!["missing".into()];

        let err = registry.refresh(broken).unwrap_err();
        assert_eq!(err.code, ErrorCode::SchemaViolation);
        assert!(registry.get_table("facts").is_some());
    }
}
