//! Read-through cache layer (§4.5) in front of the store of record for
//! personas, proxies, and keyword sets.
//!
//! The cache never surfaces its own faults to callers — on a backing-store
//! error it logs and falls back, per §7. `metrics` tracks hit ratio, error
//! rate, latency, and derives alerts against the fixed thresholds in §4.5.

pub mod metrics;

pub use metrics::{Alert, AlertLevel, CacheMetrics, MetricsSnapshot};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::warn;

use crate::errors::CacheError;

#[derive(Clone)]
struct Entry<T> {
    value: T,
    inserted_at: Instant,
    ttl: Duration,
}

impl<T> Entry<T> {
    fn is_fresh(&self) -> bool {
        self.inserted_at.elapsed() < self.ttl
    }
}

/// The store of record a cache instance reads through to on a miss. Kept
/// narrow so callers can fake it in tests without standing up SQLite.
pub trait CacheStore<T>: Send + Sync {
    fn load(&self, id: &str) -> Result<Option<T>, CacheError>;
    fn load_batch(&self, ids: &[String]) -> Result<HashMap<String, T>, CacheError>;
}

/// Result of a batch lookup: §4.5 invariant — `found` entries are a subset
/// of `ids`, and `found ∪ missing` exactly accounts for `ids` (§8 invariant 7).
pub struct BatchResult<T> {
    pub found: Vec<T>,
    pub missing_ids: Vec<String>,
}

pub struct ReadThroughCache<T: Clone, S: CacheStore<T>> {
    entries: DashMap<String, Entry<T>>,
    store: Arc<S>,
    default_ttl: Duration,
    metrics: CacheMetrics,
}

impl<T: Clone, S: CacheStore<T>> ReadThroughCache<T, S> {
    pub fn new(store: Arc<S>, default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            store,
            default_ttl,
            metrics: CacheMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// A metrics snapshot that also reports the live entry count (§4.5).
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot_with_entry_count(self.entries.len())
    }

    pub fn get(&self, id: &str) -> Option<T> {
        let started = Instant::now();

        if let Some(entry) = self.entries.get(id) {
            if entry.is_fresh() {
                self.metrics.record_hit(started.elapsed());
                return Some(entry.value.clone());
            }
        }

        match self.store.load(id) {
            Ok(Some(value)) => {
                self.set(id, value.clone(), self.default_ttl);
                self.metrics.record_miss(started.elapsed());
                Some(value)
            }
            Ok(None) => {
                self.metrics.record_miss(started.elapsed());
                None
            }
            Err(err) => {
                warn!(id, error = %err, "cache backing store load failed, falling back to miss");
                self.metrics.record_error(started.elapsed());
                None
            }
        }
    }

    /// `found` need not preserve `ids` order; `missing_ids` exactly accounts
    /// for ids not returned (§4.5, §8 invariant 7).
    pub fn get_batch(&self, ids: &[String]) -> BatchResult<T> {
        let started = Instant::now();
        let mut found = Vec::new();
        let mut still_missing = Vec::new();

        for id in ids {
            if let Some(entry) = self.entries.get(id) {
                if entry.is_fresh() {
                    found.push(entry.value.clone());
                    continue;
                }
            }
            still_missing.push(id.clone());
        }

        if still_missing.is_empty() {
            self.metrics.record_hit(started.elapsed());
            return BatchResult {
                found,
                missing_ids: Vec::new(),
            };
        }

        match self.store.load_batch(&still_missing) {
            Ok(loaded) => {
                let mut missing_ids = Vec::new();
                for id in &still_missing {
                    match loaded.get(id) {
                        Some(value) => {
                            self.set(id, value.clone(), self.default_ttl);
                            found.push(value.clone());
                        }
                        None => missing_ids.push(id.clone()),
                    }
                }
                self.metrics.record_miss(started.elapsed());
                BatchResult { found, missing_ids }
            }
            Err(err) => {
                warn!(error = %err, "cache backing store batch load failed, falling back to miss");
                self.metrics.record_error(started.elapsed());
                BatchResult {
                    found,
                    missing_ids: still_missing,
                }
            }
        }
    }

    pub fn set(&self, id: &str, value: T, ttl: Duration) {
        self.entries.insert(
            id.to_string(),
            Entry {
                value,
                inserted_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Writes through the store of record call this before returning
    /// success; read-through wrappers then `set` fresh entries on next read.
    pub fn invalidate(&self, id: &str) {
        self.entries.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeStore {
        data: Mutex<HashMap<String, String>>,
    }

    impl CacheStore<String> for FakeStore {
        fn load(&self, id: &str) -> Result<Option<String>, CacheError> {
            Ok(self.data.lock().unwrap().get(id).cloned())
        }

        fn load_batch(&self, ids: &[String]) -> Result<HashMap<String, String>, CacheError> {
            let data = self.data.lock().unwrap();
            Ok(ids
                .iter()
                .filter_map(|id| data.get(id).map(|v| (id.clone(), v.clone())))
                .collect())
        }
    }

    fn cache_with(entries: &[(&str, &str)]) -> ReadThroughCache<String, FakeStore> {
        let mut data = HashMap::new();
        for (k, v) in entries {
            data.insert(k.to_string(), v.to_string());
        }
        let store = Arc::new(FakeStore {
            data: Mutex::new(data),
        });
        ReadThroughCache::new(store, Duration::from_secs(600))
    }

    #[test]
    fn get_reads_through_on_miss_and_caches_result() {
        let cache = cache_with(&[("p1", "v1")]);
        assert_eq!(cache.get("p1"), Some("v1".to_string()));
        assert_eq!(cache.metrics().snapshot().misses, 1);
        // second read is a cache hit, not another store load
        assert_eq!(cache.get("p1"), Some("v1".to_string()));
        assert_eq!(cache.metrics().snapshot().hits, 1);
    }

    #[test]
    fn invalidate_forces_next_read_through_the_store() {
        let cache = cache_with(&[("p1", "v1")]);
        cache.get("p1");
        cache.invalidate("p1");
        assert_eq!(cache.metrics().snapshot().misses, 1);
        cache.get("p1");
        assert_eq!(cache.metrics().snapshot().misses, 2);
    }

    #[test]
    fn get_batch_preserves_found_missing_split() {
        let cache = cache_with(&[("p1", "v1"), ("p2", "v2")]);
        let ids = vec!["p1".to_string(), "p2".to_string(), "p3".to_string()];
        let result = cache.get_batch(&ids);
        assert_eq!(result.found.len(), 2);
        assert_eq!(result.missing_ids, vec!["p3".to_string()]);
    }

    #[test]
    fn stale_entry_after_invalidate_reflects_updated_content() {
        let cache = cache_with(&[("p1", "v1")]);
        assert_eq!(cache.get("p1"), Some("v1".to_string()));

        // simulate a write to the store of record followed by invalidate
        let cache = {
            let store = Arc::new(FakeStore {
                data: Mutex::new(HashMap::from([("p1".to_string(), "v2".to_string())])),
            });
            ReadThroughCache::new(store, Duration::from_secs(600))
        };
        cache.invalidate("p1");
        assert_eq!(cache.get("p1"), Some("v2".to_string()));
    }

    #[test]
    fn ttl_of_zero_makes_every_read_a_miss() {
        let store = Arc::new(FakeStore {
            data: Mutex::new(HashMap::from([("p1".to_string(), "v1".to_string())])),
        });
        let cache = ReadThroughCache::new(store, Duration::from_secs(0));
        cache.get("p1");
        cache.get("p1");
        assert_eq!(cache.metrics().snapshot().misses, 2);
    }
}
