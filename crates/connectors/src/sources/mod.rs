//! Metric loaders.
//!
//! A loader turns the raw payload of a metric source into a [`ColumnarTable`].
//! Loading is split in two: `fetch` (async transport) and `parse` (CPU-bound,
//! run on the blocking pool). Each [`SourceKind`] maps to exactly one loader
//! through [`LoaderRegistry`].
//!
//! | Source kind | Loader |
//! |-------------|--------|
//! | `file_csv`, `http_csv` | [`csv::CsvLoader`] |
//! | `file_json`, `http_json` | [`json::JsonLoader`] |

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexMap;
use quarry_columnar::{ColumnarTable, CompiledPredicate, Field, Schema};
use quarry_common::config::FetchSettings;
use quarry_common::{DataType, MetricDescriptor, Operator, Predicate, SourceKind};
use quarry_error::{ErrorCode, QuarryError, Result};
use tracing::{debug, info};

use crate::transport::Transport;

pub mod csv;
pub mod json;

/// Everything a loader needs for one load, detached from the catalog.
///
/// `predicates` name metric output columns (keys of `field_types`).
#[derive(Debug, Clone)]
pub struct LoadSpec {
    pub metric: String,
    pub locator: String,
    pub field_types: IndexMap<String, DataType>,
    pub data_path: String,
    pub column_alias: HashMap<String, String>,
    pub predicates: Vec<Predicate>,
}

impl LoadSpec {
    pub fn new(metric: &MetricDescriptor, predicates: Vec<Predicate>) -> Self {
        Self {
            metric: metric.name.clone(),
            locator: metric.source_locator.clone(),
            field_types: metric.field_types.clone(),
            data_path: metric.data_path.clone(),
            column_alias: metric.column_alias.clone(),
            predicates,
        }
    }

    pub fn source_column<'a>(&'a self, field: &'a str) -> &'a str {
        self.column_alias
            .get(field)
            .map(String::as_str)
            .unwrap_or(field)
    }

    /// Output schema: declared fields, in order, all nullable.
    pub fn schema(&self) -> Result<Schema> {
        Schema::new(
            self.field_types
                .iter()
                .map(|(name, data_type)| Field::new(name.clone(), *data_type))
                .collect(),
        )
    }

    /// Query parameters for HTTP pushdown: equality predicates only, keyed by
    /// the physical source column.
    pub fn query_params(&self) -> Vec<(String, String)> {
        self.predicates
            .iter()
            .filter(|p| p.operator == Operator::Eq && self.field_types.contains_key(&p.column))
            .map(|p| (self.source_column(&p.column).to_string(), p.value.to_string()))
            .collect()
    }

    /// Binds each predicate on a declared field to its type and physical column.
    ///
    /// Predicates on undeclared columns do not apply to this metric.
    pub fn row_filters(&self) -> Result<Vec<(String, CompiledPredicate)>> {
        let mut filters = Vec::with_capacity(self.predicates.len());
        for predicate in &self.predicates {
            match self.field_types.get(&predicate.column) {
                Some(data_type) => filters.push((
                    self.source_column(&predicate.column).to_string(),
                    CompiledPredicate::compile(predicate, *data_type)
                        .map_err(|e| e.prefixed(format!("metric '{}'", self.metric)))?,
                )),
                None => debug!(
                    metric = %self.metric,
                    column = %predicate.column,
                    "predicate column not declared by metric, skipping"
                ),
            }
        }
        Ok(filters)
    }
}

#[async_trait]
pub trait MetricLoader: Send + Sync {
    /// Format name used in logs (e.g., "csv")
    fn format(&self) -> &'static str;

    /// Retrieves the raw payload. HTTP sources receive the equality
    /// predicates as query parameters.
    async fn fetch(&self, transport: &Transport, spec: &LoadSpec) -> Result<Bytes> {
        transport.fetch(&spec.locator, &spec.query_params()).await
    }

    /// Decodes the payload, dropping rows that fail any predicate before
    /// they are written.
    fn parse(&self, payload: &[u8], spec: &LoadSpec) -> Result<ColumnarTable>;
}

pub struct LoaderRegistry {
    loaders: HashMap<SourceKind, Arc<dyn MetricLoader>>,
    transport: Transport,
}

impl LoaderRegistry {
    pub fn new(transport: Transport) -> Self {
        Self {
            loaders: HashMap::new(),
            transport,
        }
    }

    pub fn register_loader(&mut self, kind: SourceKind, loader: Arc<dyn MetricLoader>) {
        self.loaders.insert(kind, loader);
    }

    pub fn loader_for(&self, kind: SourceKind) -> Result<Arc<dyn MetricLoader>> {
        self.loaders.get(&kind).cloned().ok_or_else(|| {
            QuarryError::new(
                ErrorCode::UnsupportedSourceType,
                format!("no loader registered for source kind '{}'", kind),
            )
        })
    }

    /// Fetch and parse one metric with the given pushdown predicates.
    pub async fn load(
        &self,
        metric: &MetricDescriptor,
        predicates: Vec<Predicate>,
    ) -> Result<ColumnarTable> {
        let loader = self.loader_for(metric.source_kind)?;
        let spec = LoadSpec::new(metric, predicates);

        let started = std::time::Instant::now();
        let payload = loader
            .fetch(&self.transport, &spec)
            .await
            .map_err(|e| e.prefixed(format!("metric '{}'", spec.metric)))?;
        let payload_bytes = payload.len();

        let parser = Arc::clone(&loader);
        let (table, spec) = tokio::task::spawn_blocking(move || {
            let table = parser.parse(&payload, &spec);
            (table, spec)
        })
        .await
        .map_err(|e| {
            QuarryError::new(
                ErrorCode::InternalPanic,
                format!("parse task for metric '{}' failed: {}", metric.name, e),
            )
        })?;
        let table = table?;

        info!(
            metric = %spec.metric,
            format = loader.format(),
            payload_bytes,
            rows = table.row_count(),
            predicates = spec.predicates.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "metric loaded"
        );
        Ok(table)
    }
}

/// Registry with the built-in CSV and JSON loaders for every source kind.
pub fn default_registry(settings: &FetchSettings) -> Result<LoaderRegistry> {
    let mut registry = LoaderRegistry::new(Transport::new(settings)?);
    let csv: Arc<dyn MetricLoader> = Arc::new(csv::CsvLoader);
    let json: Arc<dyn MetricLoader> = Arc::new(json::JsonLoader);
    registry.register_loader(SourceKind::FileCsv, Arc::clone(&csv));
    registry.register_loader(SourceKind::HttpCsv, csv);
    registry.register_loader(SourceKind::FileJson, Arc::clone(&json));
    registry.register_loader(SourceKind::HttpJson, json);
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_common::Scalar;

    fn metric() -> MetricDescriptor {
        MetricDescriptor {
            name: "stock_price".into(),
            source_kind: SourceKind::HttpJson,
            source_locator: "http://feeds.local/prices".into(),
            data_path: String::new(),
            field_types: IndexMap::from([
                ("ticker".to_string(), DataType::String),
                ("close".to_string(), DataType::Double),
            ]),
            column_alias: HashMap::from([("ticker".to_string(), "stkcode".to_string())]),
        }
    }

    #[test]
    fn test_query_params_use_physical_names() {
        let spec = LoadSpec::new(
            &metric(),
            vec![
                Predicate::eq("ticker", Scalar::Utf8("AAPL".into())),
                Predicate::new("close", Operator::Gt, Scalar::Float64(1.0)),
                Predicate::eq("volume", Scalar::Int64(5)),
            ],
        );
        assert_eq!(
            spec.query_params(),
            vec![("stkcode".to_string(), "AAPL".to_string())]
        );
    }

    #[test]
    fn test_row_filters_skip_undeclared_columns() {
        let spec = LoadSpec::new(
            &metric(),
            vec![
                Predicate::eq("ticker", Scalar::Utf8("AAPL".into())),
                Predicate::eq("volume", Scalar::Int64(5)),
            ],
        );
        let filters = spec.row_filters().unwrap();
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].0, "stkcode");
    }

    #[test]
    fn test_default_registry_covers_every_kind() {
        let registry = default_registry(&FetchSettings::default()).unwrap();
        for kind in [
            SourceKind::FileCsv,
            SourceKind::FileJson,
            SourceKind::HttpCsv,
            SourceKind::HttpJson,
        ] {
            assert!(registry.loader_for(kind).is_ok());
        }
        assert_eq!(
            registry.loader_for(SourceKind::FileCsv).unwrap().format(),
            "csv"
        );
    }
}
