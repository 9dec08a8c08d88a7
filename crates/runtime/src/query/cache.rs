use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use quarry_columnar::ColumnarTable;
use quarry_common::config::CacheTierSettings;
use quarry_common::Predicate;
use quarry_error::Result;
use tracing::{debug, info};

/// Metric tier key: metric name plus the pushed predicates, order-insensitive.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct MetricKey {
    metric: String,
    options: Vec<String>,
}

impl MetricKey {
    pub fn new(metric: &str, predicates: &[Predicate]) -> Self {
        // Debug keeps the literal's type: `= 1` and `= '1'` must not collide.
        let mut options: Vec<String> = predicates
            .iter()
            .map(|p| format!("{}{}{:?}", p.column, p.operator, p.value))
            .collect();
        options.sort();
        options.dedup();
        Self {
            metric: metric.to_string(),
            options,
        }
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }
}

/// Compute-once cache of shared tables.
///
/// Every removal (expiry, capacity eviction, explicit invalidation) goes
/// through one listener that releases the table. If a request still holds the
/// `Arc`, the buffers are freed when that last holder drops it.
pub struct TableCache<K> {
    tier: &'static str,
    enabled: bool,
    cache: Cache<K, Arc<ColumnarTable>>,
    releases: Arc<AtomicUsize>,
}

impl<K> TableCache<K>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
{
    pub fn new(tier: &'static str, settings: &CacheTierSettings) -> Self {
        let releases = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&releases);

        let cache = Cache::builder()
            .max_capacity(settings.max_capacity)
            .time_to_live(Duration::from_secs(settings.ttl_secs))
            .eviction_listener(move |key: Arc<K>, table: Arc<ColumnarTable>, cause| {
                let deferred = match Arc::try_unwrap(table) {
                    Ok(mut owned) => {
                        owned.release();
                        false
                    }
                    Err(_shared) => true,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                debug!(
                    target: "cache",
                    tier,
                    key = ?key,
                    cause = ?cause,
                    deferred,
                    "released cached table"
                );
            })
            .build();

        info!(
            target: "cache",
            tier,
            enabled = settings.enabled,
            max_capacity = settings.max_capacity,
            ttl_secs = settings.ttl_secs,
            "initialized table cache"
        );

        Self {
            tier,
            enabled: settings.enabled,
            cache,
            releases,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the cached table for `key`, computing it at most once across
    /// concurrent callers. Errors are handed to every waiter and not cached.
    pub async fn get_or_compute<F, Fut>(&self, key: K, compute: F) -> Result<Arc<ColumnarTable>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ColumnarTable>>,
    {
        if !self.enabled {
            return compute().await.map(Arc::new);
        }
        self.cache
            .try_get_with(key, async move { compute().await.map(Arc::new) })
            .await
            .map_err(|e| (*e).clone())
    }

    pub async fn get(&self, key: &K) -> Option<Arc<ColumnarTable>> {
        self.cache.get(key).await
    }

    pub async fn invalidate(&self, key: &K) {
        self.cache.invalidate(key).await;
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
        debug!(target: "cache", tier = self.tier, "invalidated all entries");
    }

    /// Applies pending expirations and evictions now.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Tables handed to the release path so far.
    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::Relaxed)
    }
}
