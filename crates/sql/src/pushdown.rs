//! Which metrics a plan loads, and which predicates each load receives.
//!
//! Load order:
//! 1. metrics of the selected fields (the first one drives the join),
//! 2. owners of fields referenced in WHERE,
//! 3. owners of primary keys, when more than one metric is loaded.
//!
//! An equality predicate on field `f` goes to the metric owning `f`. When `f`
//! is a primary key it also goes to every other loaded metric that declares
//! the key column, since the join would drop their non-matching rows anyway.

use std::sync::Arc;

use quarry_common::{MetricDescriptor, Predicate};
use quarry_error::{ErrorCode, QuarryError, Result};
use tracing::debug;

use crate::catalog::Catalog;
use crate::plan::QueryPlan;

/// One metric fetch. Predicate columns are metric output columns.
#[derive(Debug, Clone)]
pub struct MetricLoad {
    pub metric: Arc<MetricDescriptor>,
    pub predicates: Vec<Predicate>,
}

#[derive(Debug, Clone)]
pub struct LoadPlan {
    pub loads: Vec<MetricLoad>,
    /// Logical join keys; resolve through the table's `field_to_physical`.
    pub key_columns: Vec<String>,
}

impl LoadPlan {
    pub fn metric_names(&self) -> Vec<&str> {
        self.loads.iter().map(|l| l.metric.name.as_str()).collect()
    }
}

pub fn plan_loads(plan: &QueryPlan, catalog: &dyn Catalog) -> Result<LoadPlan> {
    let table = &plan.table;

    let mut order: Vec<&str> = plan.selected_metrics();
    // The compiler already resolved every field; a miss here means the plan
    // was built against another catalog.
    let owner = |field: &str| {
        table.metric_for(field).ok_or_else(|| {
            QuarryError::new(
                ErrorCode::FieldNotFound,
                format!("field '{}' is not mapped in table '{}'", field, table.name),
            )
        })
    };
    for predicate in plan.predicates.iter().chain(&plan.residual) {
        push_unique(&mut order, owner(&predicate.column)?);
    }
    if order.len() > 1 {
        for key in &table.primary_keys {
            push_unique(&mut order, owner(key)?);
        }
    }

    let mut loads = Vec::with_capacity(order.len());
    for name in order {
        let metric = catalog.metric(name).ok_or_else(|| {
            QuarryError::new(
                ErrorCode::MetricNotFound,
                format!("metric '{}' used by table '{}' is not registered", name, table.name),
            )
        })?;
        loads.push(MetricLoad {
            metric,
            predicates: Vec::new(),
        });
    }

    for predicate in &plan.predicates {
        let field = predicate.column.as_str();
        let column = table.physical_column(field);
        let field_owner = owner(field)?;
        let is_key = table.is_primary_key(field);
        for load in loads.iter_mut() {
            if (load.metric.name == field_owner || is_key) && load.metric.declares(column) {
                load.predicates.push(predicate.with_column(column));
            }
        }
    }

    for load in &loads {
        debug!(
            table = %table.name,
            metric = %load.metric.name,
            predicates = load.predicates.len(),
            "planned metric load"
        );
    }

    Ok(LoadPlan {
        loads,
        key_columns: table.primary_keys.clone(),
    })
}

fn push_unique<'a>(order: &mut Vec<&'a str>, metric: &'a str) {
    if !order.contains(&metric) {
        order.push(metric);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile;
    use quarry_common::{CatalogConfig, Operator, Scalar};

    const CATALOG: &str = r#"
metrics:
  - name: price
    source_kind: file_csv
    source_locator: /p.csv
    field_types: { ticker: STRING, close: DOUBLE }
  - name: volume
    source_kind: file_csv
    source_locator: /v.csv
    field_types: { ticker: STRING, volume: LONG }
tables:
  - name: quotes
    primary_keys: [ticker]
    field_to_metric: { ticker: price, close: price, volume: volume }
"#;

    fn catalog() -> CatalogConfig {
        CatalogConfig::from_yaml_str(CATALOG).unwrap()
    }

    #[test]
    fn test_single_metric_skips_key_owners() {
        let catalog = catalog();
        let plan = compile("SELECT volume FROM quotes", &catalog).unwrap();
        let loads = plan_loads(&plan, &catalog).unwrap();
        assert_eq!(loads.metric_names(), vec!["volume"]);
    }

    #[test]
    fn test_where_fields_pull_in_their_metric() {
        let catalog = catalog();
        let plan = compile("SELECT close FROM quotes WHERE volume > 10", &catalog).unwrap();
        let loads = plan_loads(&plan, &catalog).unwrap();
        // price is also the key owner
        assert_eq!(loads.metric_names(), vec!["price", "volume"]);
        assert!(loads.loads.iter().all(|l| l.predicates.is_empty()));
    }

    #[test]
    fn test_key_predicate_reaches_every_declaring_metric() {
        let catalog = catalog();
        let plan = compile(
            "SELECT close, volume FROM quotes WHERE ticker = 'AAPL'",
            &catalog,
        )
        .unwrap();
        let loads = plan_loads(&plan, &catalog).unwrap();
        assert_eq!(loads.metric_names(), vec!["price", "volume"]);
        for load in &loads.loads {
            assert_eq!(
                load.predicates,
                vec![Predicate::new("ticker", Operator::Eq, Scalar::Utf8("AAPL".into()))]
            );
        }
        assert_eq!(loads.key_columns, vec!["ticker"]);
    }

    #[test]
    fn test_non_key_predicate_stays_with_owner() {
        let catalog = catalog();
        let plan = compile("SELECT ticker, volume FROM quotes WHERE close = 10.5", &catalog).unwrap();
        let loads = plan_loads(&plan, &catalog).unwrap();
        let price = loads.loads.iter().find(|l| l.metric.name == "price").unwrap();
        let volume = loads.loads.iter().find(|l| l.metric.name == "volume").unwrap();
        assert_eq!(price.predicates.len(), 1);
        assert!(volume.predicates.is_empty());
    }
}
