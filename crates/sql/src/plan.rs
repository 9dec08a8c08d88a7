use std::sync::Arc;

use indexmap::IndexMap;
use quarry_common::{LogicalTableDefinition, Predicate};

/// Compiled form of one SELECT.
///
/// Predicate columns are logical field names.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub sql: String,
    pub table: Arc<LogicalTableDefinition>,
    pub select_fields: Vec<String>,
    /// Selected field to owning metric, in select order.
    pub field_metric_map: IndexMap<String, String>,
    /// Equality conjuncts, pushed into metric loads.
    pub predicates: Vec<Predicate>,
    /// Remaining comparisons, evaluated after the join.
    pub residual: Vec<Predicate>,
}

impl QueryPlan {
    pub fn table_name(&self) -> &str {
        &self.table.name
    }

    /// Distinct metrics behind the selected fields, first reference first.
    pub fn selected_metrics(&self) -> Vec<&str> {
        let mut metrics: Vec<&str> = Vec::new();
        for metric in self.field_metric_map.values() {
            if !metrics.contains(&metric.as_str()) {
                metrics.push(metric);
            }
        }
        metrics
    }
}
