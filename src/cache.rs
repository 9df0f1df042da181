//! Deduplicating rehost cache.
//!
//! Memoizes `source URL → hosted URL` with a bounded LRU and a fixed
//! expire-after-write TTL. The empty string is a legitimate cached value: it
//! records a failed rehost, so a known-bad URL is not hammered again until
//! its entry expires.
//!
//! ## Single computation per key
//!
//! A miss does not run the loader inline. It spawns the loader as a tokio
//! task and parks a [`Shared`] handle to it in an in-flight map. Every
//! caller that misses on the same key while the task runs clones that
//! handle instead of starting a second load, so K concurrent callers cause
//! exactly one upstream fetch and all observe the same value.
//!
//! Because the load runs as its own task, a caller that gives up (batch
//! deadline, cancellation) only drops its handle. The load keeps going,
//! bounded by the fetch timeout, and its result still lands in the cache
//! for the next caller.

use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, trace};

/// Default maximum number of entries.
pub const DEFAULT_CAPACITY: usize = 300;

/// Default time-to-live after write.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

type PendingLoad = Shared<BoxFuture<'static, String>>;

struct CacheEntry {
    value: String,
    written_at: Instant,
}

struct CacheState {
    entries: LruCache<String, CacheEntry>,
    in_flight: HashMap<String, PendingLoad>,
}

impl CacheState {
    /// Live value for `key`, promoting it in the LRU. Expired entries are
    /// dropped on the way.
    fn lookup(&mut self, key: &str, ttl: Duration) -> Option<String> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.written_at.elapsed() < ttl => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            trace!("Cache entry expired: {}", key);
            self.entries.pop(key);
        }
        None
    }
}

/// Bounded, TTL-limited, request-coalescing `String → String` cache.
///
/// Cloning is cheap and clones share the same entries.
#[derive(Clone)]
pub struct RehostCache {
    state: Arc<Mutex<CacheState>>,
    ttl: Duration,
    stats: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
}

impl RehostCache {
    /// Creates a cache holding at most `capacity` entries for `ttl` each.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Arc::new(Mutex::new(CacheState {
                entries: LruCache::new(cap),
                in_flight: HashMap::new(),
            })),
            ttl,
            stats: Arc::new(Counters::default()),
        }
    }

    /// Return the cached value for `key`, or compute it with `load`.
    ///
    /// `load` is invoked only when there is neither a live entry nor a load
    /// already in flight for `key`. Its result (empty string included) is
    /// cached for the TTL. A panicking loader is recorded as the empty
    /// string.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn get_with<F, Fut>(&self, key: &str, load: F) -> String
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = String> + Send + 'static,
    {
        let pending = {
            let mut state = self.state.lock();

            if let Some(value) = state.lookup(key, self.ttl) {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Rehost cache hit: {}", key);
                return value;
            }

            match state.in_flight.get(key) {
                Some(pending) => {
                    self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
                    debug!("Joining in-flight rehost: {}", key);
                    pending.clone()
                }
                None => {
                    self.stats.misses.fetch_add(1, Ordering::Relaxed);
                    debug!("Rehost cache miss: {}", key);
                    let pending = self.spawn_load(key.to_string(), load());
                    state.in_flight.insert(key.to_string(), pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    /// Spawn `fut` and return a shareable handle to its result. The task
    /// publishes its value and clears the in-flight slot under the same lock
    /// acquisition, so no caller can observe neither.
    fn spawn_load<Fut>(&self, key: String, fut: Fut) -> PendingLoad
    where
        Fut: Future<Output = String> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let task = tokio::spawn(async move {
            let value = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(v) => v,
                Err(_) => {
                    error!("Rehost loader panicked for {}", key);
                    String::new()
                }
            };
            let mut state = state.lock();
            state.entries.put(
                key.clone(),
                CacheEntry {
                    value: value.clone(),
                    written_at: Instant::now(),
                },
            );
            state.in_flight.remove(&key);
            value
        });

        async move {
            match task.await {
                Ok(v) => v,
                Err(e) => {
                    error!("Rehost task failed: {}", e);
                    String::new()
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Peek without promoting or counting. Expired entries read as absent.
    pub fn peek(&self, key: &str) -> Option<String> {
        let state = self.state.lock();
        state
            .entries
            .peek(key)
            .filter(|e| e.written_at.elapsed() < self.ttl)
            .map(|e| e.value.clone())
    }

    /// Drop the entry for `key`, forcing the next lookup to reload.
    pub fn invalidate(&self, key: &str) {
        let mut state = self.state.lock();
        if state.entries.pop(key).is_some() {
            debug!("Invalidated rehost cache entry: {}", key);
        }
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
        debug!("Cleared rehost cache");
    }

    /// Number of stored entries, expired ones included until next touched.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of loads currently running.
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.stats.hits.load(Ordering::Relaxed);
        let misses = self.stats.misses.load(Ordering::Relaxed);
        let coalesced = self.stats.coalesced.load(Ordering::Relaxed);
        let total = hits + misses + coalesced;
        let hit_rate = if total > 0 {
            ((hits + coalesced) as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        CacheStats {
            hits,
            misses,
            coalesced,
            hit_rate,
            size: self.len(),
        }
    }
}

impl Default for RehostCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

impl std::fmt::Debug for RehostCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RehostCache")
            .field("ttl", &self.ttl)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Lookups answered from a live entry.
    pub hits: u64,
    /// Lookups that started a load.
    pub misses: u64,
    /// Lookups that joined a load already in flight.
    pub coalesced: u64,
    /// Share of lookups that did not start a load, as a percentage.
    pub hit_rate: f64,
    /// Current number of entries.
    pub size: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Rehost cache: {} entries, {:.1}% hit rate ({} hits, {} coalesced, {} misses)",
            self.size, self.hit_rate, self.hits, self.coalesced, self.misses
        )
    }
}
