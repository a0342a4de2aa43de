//! Read-through cache with per-key single-flight computation.
//!
//! [`KeyedCache::get_or_set`] registers one shared future per missing key.
//! Concurrent callers for the same key await that future instead of running
//! their own computation, while callers for other keys proceed independently.

use crate::clock::SharedClock;
use crate::metrics::{
    record_cache_coalesced, record_cache_compute_failure, record_cache_hit, record_cache_miss,
};
use crate::store::KeyedStore;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries held by each cache (unbounded when absent)
    #[serde(default)]
    pub max_entries: Option<usize>,
    /// Time-to-live for summary results in milliseconds (0 = never expires)
    #[serde(default = "default_summary_ttl_ms")]
    pub summary_ttl_ms: u64,
}

fn default_summary_ttl_ms() -> u64 {
    60_000 // 1 minute
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: None,
            summary_ttl_ms: default_summary_ttl_ms(),
        }
    }
}

impl CacheConfig {
    /// Summary TTL as a Duration
    pub fn summary_ttl(&self) -> Duration {
        Duration::from_millis(self.summary_ttl_ms)
    }
}

/// A computation in flight, shared by every caller waiting on its key
type Flight<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

struct CacheInner<V, E> {
    name: &'static str,
    store: KeyedStore<V>,
    in_flight: DashMap<String, Flight<V, E>>,
}

/// Clears the in-flight marker once a computation settles, including when it
/// panics, so the next caller starts over.
struct FlightGuard<V, E> {
    inner: Arc<CacheInner<V, E>>,
    key: String,
}

impl<V, E> Drop for FlightGuard<V, E> {
    fn drop(&mut self) {
        self.inner.in_flight.remove(&self.key);
    }
}

/// Keyed cache with TTLs and single-flight read-through
pub struct KeyedCache<V, E> {
    inner: Arc<CacheInner<V, E>>,
}

impl<V, E> Clone for KeyedCache<V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V, E> KeyedCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create an unbounded cache
    pub fn new(name: &'static str, clock: SharedClock) -> Self {
        Self::from_store(name, KeyedStore::new(name, clock))
    }

    /// Create a cache from configuration
    pub fn with_config(name: &'static str, clock: SharedClock, config: &CacheConfig) -> Self {
        let store = match config.max_entries {
            Some(capacity) => KeyedStore::with_capacity(name, clock, capacity),
            None => KeyedStore::new(name, clock),
        };

        info!(
            cache = name,
            max_entries = ?config.max_entries,
            "Initialized cache"
        );

        Self::from_store(name, store)
    }

    fn from_store(name: &'static str, store: KeyedStore<V>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                name,
                store,
                in_flight: DashMap::new(),
            }),
        }
    }

    /// Get a cached value; expired entries are evicted and reported as absent
    pub fn get(&self, key: &str) -> Option<V> {
        self.inner.store.get(key)
    }

    /// Store a value. `None` or a zero TTL means the entry never expires.
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        self.inner.store.insert(key, value, ttl);
        debug!(cache = self.inner.name, key = %key, ttl = ?ttl, "Cached value");
    }

    /// Remove an entry. Returns whether a live entry existed.
    pub fn del(&self, key: &str) -> bool {
        let existed = self.inner.store.remove(key);
        debug!(cache = self.inner.name, key = %key, existed, "Invalidated cache entry");
        existed
    }

    /// Whether a live entry exists under `key`
    pub fn has(&self, key: &str) -> bool {
        self.inner.store.contains(key)
    }

    /// Remove every entry. Computations already in flight still publish
    /// their results when they finish.
    pub fn clear(&self) {
        self.inner.store.clear();
        info!(cache = self.inner.name, "Cleared all cache entries");
    }

    /// Return the cached value for `key`, computing and storing it on a miss.
    ///
    /// Concurrent misses on the same key share a single computation: the first
    /// caller registers it and every other caller awaits it, receiving the
    /// same value or the same error. Errors are never cached.
    ///
    /// `compute` only builds the future and is called without any lock held.
    /// Callers racing to start the same key may each call it, but only one of
    /// the resulting futures is ever polled. That future runs on its own task,
    /// so it completes and publishes its value even if every caller waiting on
    /// it is dropped. Must be called from within a Tokio runtime.
    pub async fn get_or_set<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        if let Some(value) = self.inner.store.get(key) {
            debug!(cache = self.inner.name, key = %key, "Cache hit");
            record_cache_hit(self.inner.name);
            return Ok(value);
        }

        let running = self.inner.in_flight.get(key).map(|flight| flight.value().clone());
        let flight = match running {
            Some(flight) => {
                debug!(cache = self.inner.name, key = %key, "Joining in-flight computation");
                record_cache_coalesced(self.inner.name);
                flight
            }
            None => {
                let pending = compute();

                match self.inner.in_flight.entry(key.to_string()) {
                    // Lost the race to start it; `pending` is dropped unpolled
                    Entry::Occupied(occupied) => {
                        debug!(
                            cache = self.inner.name,
                            key = %key,
                            "Joining in-flight computation"
                        );
                        record_cache_coalesced(self.inner.name);
                        occupied.get().clone()
                    }
                    Entry::Vacant(vacant) => {
                        // A computation may have published between the lookup
                        // above and taking the in-flight slot
                        if let Some(value) = self.inner.store.get(key) {
                            record_cache_hit(self.inner.name);
                            return Ok(value);
                        }

                        debug!(cache = self.inner.name, key = %key, "Cache miss");
                        record_cache_miss(self.inner.name);

                        let flight = self.start_flight(key, ttl, pending);
                        vacant.insert(flight.clone());
                        flight
                    }
                }
            }
        };

        flight.await
    }

    fn start_flight<Fut>(&self, key: &str, ttl: Option<Duration>, compute: Fut) -> Flight<V, E>
    where
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let guard = FlightGuard {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
        };

        let task = tokio::spawn(async move {
            // Owned by the task so a panic in `compute` drops it
            let guard = guard;
            let result = compute.await;

            match &result {
                Ok(value) => guard.inner.store.insert(&guard.key, value.clone(), ttl),
                Err(_) => {
                    warn!(
                        cache = guard.inner.name,
                        key = %guard.key,
                        "Cache computation failed, nothing stored"
                    );
                    record_cache_compute_failure(guard.inner.name);
                }
            }

            // Publish before releasing the in-flight slot
            drop(guard);
            result
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(err) => panic!("cache computation did not complete: {}", err),
            }
        }
        .boxed()
        .shared()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.inner.store.len(),
            in_flight: self.inner.in_flight.len(),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub in_flight: usize,
}
