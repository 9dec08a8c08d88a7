//! Query orchestration.
//!
//! The `FederationEngine` answers SQL over logical tables:
//!
//! 1. **Compile**: SQL -> `QueryPlan` against the current registry snapshot.
//! 2. **Plan loads**: pick the metrics and the predicates pushed into each.
//! 3. **Load**: every metric concurrently, through the metric cache, bounded
//!    by the load budget (`Semaphore`). Any failure fails the query.
//! 4. **Join**: each metric renamed to the logical fields it serves, then an
//!    inner hash join on the table's primary keys, driver first.
//! 5. **Residual filter and projection** to the selected fields.
//!
//! Whole results are cached by raw SQL text in the query cache.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::try_join_all;
use quarry_columnar::{evaluate, evaluate_predicates, join, ColumnarTable};
use quarry_common::config::{CacheSettings, EngineSettings};
use quarry_common::{CatalogConfig, LogicalTableDefinition, MetricDescriptor, Predicate};
use quarry_connectors::LoaderRegistry;
use quarry_error::{find_closest_match, ErrorCode, QuarryError, Result};
use quarry_sql::{compile, plan_loads, QueryPlan};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::query::cache::{MetricKey, TableCache};
use crate::registry::TableRegistry;

/// Counts a query as active until dropped, including when the caller
/// abandons the future.
struct ActiveQuery<'a>(&'a AtomicUsize);

impl<'a> ActiveQuery<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for ActiveQuery<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

pub struct FederationEngineOptions {
    pub registry: Arc<TableRegistry>,
    pub loaders: Arc<LoaderRegistry>,
    pub engine: EngineSettings,
    pub cache: CacheSettings,
}

pub struct FederationEngine {
    registry: Arc<TableRegistry>,
    loaders: Arc<LoaderRegistry>,
    metric_cache: TableCache<MetricKey>,
    query_cache: TableCache<String>,
    load_budget: Arc<Semaphore>,
    active_queries: Arc<AtomicUsize>,
}

impl FederationEngine {
    pub fn new(options: FederationEngineOptions) -> Self {
        let permits = options.engine.effective_load_concurrency();
        debug!(permits, "load budget configured");
        Self {
            registry: options.registry,
            loaders: options.loaders,
            metric_cache: TableCache::new("metrics", &options.cache.metrics),
            query_cache: TableCache::new("queries", &options.cache.queries),
            load_budget: Arc::new(Semaphore::new(permits)),
            active_queries: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn registry(&self) -> &Arc<TableRegistry> {
        &self.registry
    }

    pub fn metric_cache(&self) -> &TableCache<MetricKey> {
        &self.metric_cache
    }

    pub fn query_cache(&self) -> &TableCache<String> {
        &self.query_cache
    }

    pub fn active_queries(&self) -> usize {
        self.active_queries.load(Ordering::Relaxed)
    }

    /// Compiles without executing.
    pub fn compile(&self, sql: &str) -> Result<QueryPlan> {
        compile(sql, self.registry.snapshot().as_ref())
    }

    /// Runs `sql`, returning the projected result table.
    ///
    /// Identical SQL text shares one cached result.
    pub async fn execute_query(&self, sql: &str) -> Result<Arc<ColumnarTable>> {
        let _active = ActiveQuery::enter(&self.active_queries);
        let start = Instant::now();

        let computed = AtomicBool::new(false);
        let flag = &computed;
        let result = self
            .query_cache
            .get_or_compute(sql.to_string(), move || async move {
                flag.store(true, Ordering::Relaxed);
                self.run_query(sql).await
            })
            .await;

        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(table) => info!(
                target: "queries",
                query = sql,
                duration_ms,
                rows_returned = table.row_count(),
                cache_hit = !computed.load(Ordering::Relaxed),
                success = true
            ),
            Err(e) => warn!(
                target: "queries",
                query = sql,
                duration_ms,
                code = %e.code,
                error = %e.message,
                success = false
            ),
        }
        result
    }

    async fn run_query(&self, sql: &str) -> Result<ColumnarTable> {
        let snapshot = self.registry.snapshot();
        let plan = compile(sql, snapshot.as_ref())?;
        let loads = plan_loads(&plan, snapshot.as_ref())?;

        let tables = try_join_all(
            loads
                .loads
                .iter()
                .map(|load| self.load_metric(&load.metric, load.predicates.clone())),
        )
        .await?;

        // Each metric's columns are renamed to the fields they serve, so two
        // metrics exposing the same physical column cannot shadow each other.
        let with_keys = tables.len() > 1;
        let views = loads
            .loads
            .iter()
            .zip(&tables)
            .map(|(load, table)| {
                logical_view(table, &load.metric.name, &plan.table, with_keys)
            })
            .collect::<Result<Vec<_>>>()?;
        let inputs: Vec<&ColumnarTable> = views.iter().collect();
        let joined = join(&inputs, &loads.key_columns, &HashMap::new())?;

        let filtered = evaluate_predicates(&joined, &plan.residual)?;

        let projection: Vec<(&str, &str)> = plan
            .select_fields
            .iter()
            .map(|f| (f.as_str(), f.as_str()))
            .collect();
        let result = filtered.project(&projection)?;

        debug!(
            table = %plan.table_name(),
            metrics = ?loads.metric_names(),
            joined_rows = joined.row_count(),
            rows = result.row_count(),
            bytes = result.byte_size(),
            "query executed"
        );
        Ok(result)
    }

    /// Loads one metric through the metric cache.
    async fn load_metric(
        &self,
        metric: &Arc<MetricDescriptor>,
        predicates: Vec<Predicate>,
    ) -> Result<Arc<ColumnarTable>> {
        let key = MetricKey::new(&metric.name, &predicates);
        let loaders = &self.loaders;
        let budget = &self.load_budget;
        self.metric_cache
            .get_or_compute(key, move || async move {
                let _permit = budget.acquire().await.map_err(|e| {
                    QuarryError::internal(format!("load budget closed: {}", e))
                })?;
                loaders.load(metric, predicates).await
            })
            .await
    }

    /// Full data of one metric, optionally narrowed by a filter expression.
    ///
    /// A filter that cannot be applied is logged and the unfiltered table is
    /// returned instead.
    pub async fn metric_data(
        &self,
        name: &str,
        filter: Option<&str>,
    ) -> Result<Arc<ColumnarTable>> {
        let metric = self.registry.get_metric(name).ok_or_else(|| {
            let available = self.registry.metric_names();
            let mut err = QuarryError::new(
                ErrorCode::MetricNotFound,
                format!("metric '{}' not found", name),
            );
            if let Some(suggestion) = find_closest_match(name, &available) {
                err = err.with_hint(format!("Did you mean '{}'?", suggestion));
            }
            err
        })?;

        let table = self.load_metric(&metric, Vec::new()).await?;
        let Some(expression) = filter.filter(|f| !f.trim().is_empty()) else {
            return Ok(table);
        };

        match evaluate(&table, expression).map(Cow::into_owned) {
            Ok(filtered) => Ok(Arc::new(filtered)),
            Err(e) => {
                warn!(
                    metric = name,
                    filter = expression,
                    error = %e,
                    "filter failed, returning unfiltered data"
                );
                Ok(table)
            }
        }
    }

    /// Swaps in a new catalog and drops every cached table.
    pub async fn refresh(&self, catalog: CatalogConfig) -> Result<()> {
        self.registry.refresh(catalog)?;
        self.metric_cache.invalidate_all();
        self.query_cache.invalidate_all();
        self.metric_cache.run_pending_tasks().await;
        self.query_cache.run_pending_tasks().await;
        info!(
            tables = self.registry.table_names().len(),
            released_metrics = self.metric_cache.release_count(),
            released_queries = self.query_cache.release_count(),
            "catalog refreshed, caches cleared"
        );
        Ok(())
    }
}

/// The columns of `table` that `metric` serves in `definition`, under their
/// logical field names. Join keys are included when `with_keys` is set.
fn logical_view(
    table: &ColumnarTable,
    metric: &str,
    definition: &LogicalTableDefinition,
    with_keys: bool,
) -> Result<ColumnarTable> {
    let keys = definition
        .primary_keys
        .iter()
        .filter(|_| with_keys)
        .map(String::as_str);
    let owned = definition
        .field_to_metric
        .iter()
        .filter(|(field, owner)| {
            owner.as_str() == metric && !(with_keys && definition.is_primary_key(field))
        })
        .map(|(field, _)| field.as_str());
    let columns: Vec<(&str, &str)> = keys
        .chain(owned)
        .map(|field| (definition.physical_column(field), field))
        .collect();
    table.project(&columns).map_err(|e| e.prefixed(format!("metric '{}'", metric)))
}
