//! Size-bounded result cache with per-entry TTL and LRU eviction.
//!
//! # Architecture
//!
//! All entries live in one [`LruCache`] behind a single store-wide mutex, so
//! lookups, inserts and eviction bookkeeping for any key are serialized
//! against each other. Recency is updated on every successful lookup, which
//! makes eviction order "least recently accessed" rather than "oldest
//! inserted".
//!
//! Eviction runs synchronously inside [`CacheStore::set`]: the tracked size
//! never exceeds `max_size_bytes`. A value that would not fit even into an
//! empty store is rejected with [`QueryError::Capacity`].
//!
//! Expiry is checked lazily on lookup using the tokio clock, so tests can
//! drive it with paused time.
//!
//! # Example
//!
//! ```rust,ignore
//! use querygate_domain::cache::{CacheStore, CacheStoreConfig};
//! use querygate_domain::{fingerprint, TtlPolicy};
//!
//! let store = CacheStore::new(CacheStoreConfig::default(), metrics);
//! let key = fingerprint("GetAccounts", &serde_json::json!({}))?;
//! store.set(key.clone(), Arc::new(json!({"accounts": []})), TtlPolicy::from_secs(60))?;
//! assert!(store.get(&key).is_some());
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use lru::LruCache;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::{QueryError, QueryResult};
use crate::fingerprint::CacheKey;
use crate::metrics::MetricsRecorder;
use crate::volatility::TtlPolicy;

/// Cached payload. Opaque to the store; shared cheaply between waiters.
pub type Payload = Arc<Value>;

/// Default ceiling: 50 MiB.
pub const DEFAULT_MAX_SIZE_BYTES: usize = 50 * 1024 * 1024;

/// Configuration for the cache store.
#[derive(Debug, Clone)]
pub struct CacheStoreConfig {
    /// Upper bound on the summed approximate size of all entries.
    pub max_size_bytes: usize,
}

impl Default for CacheStoreConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
        }
    }
}

impl CacheStoreConfig {
    pub fn with_max_size_bytes(mut self, max_size_bytes: usize) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }
}

/// One stored result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub value: Payload,
    pub created_at: Instant,
    /// `None` pins the entry until invalidated or evicted for space.
    pub expires_at: Option<Instant>,
    pub size_bytes: usize,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// Approximate footprint of an entry: rendered key plus serialized payload.
pub fn approximate_size(key: &CacheKey, value: &Value) -> usize {
    key.to_string().len() + value.to_string().len()
}

struct StoreState {
    entries: LruCache<CacheKey, CacheEntry>,
    size_bytes: usize,
}

impl StoreState {
    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.pop(key)?;
        self.size_bytes -= entry.size_bytes;
        Some(entry)
    }
}

enum Lookup {
    Hit(Payload),
    Expired,
    Miss,
}

/// The result cache.
///
/// Thread-safe; share it behind an `Arc`.
pub struct CacheStore {
    config: CacheStoreConfig,
    state: Mutex<StoreState>,
    metrics: Arc<MetricsRecorder>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock("debug");
        f.debug_struct("CacheStore")
            .field("config", &self.config)
            .field("entry_count", &state.entries.len())
            .field("size_bytes", &state.size_bytes)
            .finish()
    }
}

impl CacheStore {
    /// Creates an empty store.
    pub fn new(config: CacheStoreConfig, metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            config,
            state: Mutex::new(StoreState {
                entries: LruCache::unbounded(),
                size_bytes: 0,
            }),
            metrics,
        }
    }

    pub fn config(&self) -> &CacheStoreConfig {
        &self.config
    }

    /// Looks up a live entry, refreshing its recency.
    ///
    /// Returns `None` if the key was never stored, has expired, or was
    /// evicted. Every call records a hit or a miss.
    pub fn get(&self, key: &CacheKey) -> Option<Payload> {
        let now = Instant::now();
        let lookup = {
            let mut state = self.lock("get");
            let lookup = match state.entries.get(key) {
                Some(entry) if !entry.is_expired(now) => Lookup::Hit(Arc::clone(&entry.value)),
                Some(_) => Lookup::Expired,
                None => Lookup::Miss,
            };
            if matches!(lookup, Lookup::Expired) {
                state.remove(key);
                self.publish_size(&state);
            }
            lookup
        };

        match lookup {
            Lookup::Hit(value) => {
                self.metrics.record_hit();
                Some(value)
            }
            Lookup::Expired => {
                trace!(%key, "cache entry expired");
                self.metrics.record_miss();
                None
            }
            Lookup::Miss => {
                self.metrics.record_miss();
                None
            }
        }
    }

    /// Stores `value` under `key`, evicting least recently used entries
    /// until it fits.
    ///
    /// A zero TTL stores nothing. A value larger than the whole ceiling is
    /// rejected with [`QueryError::Capacity`]; any older entry for the key is
    /// dropped in that case so it cannot be served stale.
    pub fn set(&self, key: CacheKey, value: Payload, ttl: TtlPolicy) -> QueryResult<()> {
        if ttl.is_zero() {
            self.remove(&key);
            return Ok(());
        }

        let size_bytes = approximate_size(&key, &value);
        let max_bytes = self.config.max_size_bytes;
        if size_bytes > max_bytes {
            self.remove(&key);
            debug!(%key, size_bytes, max_bytes, "value too large to cache");
            return Err(QueryError::Capacity {
                size_bytes,
                max_bytes,
            });
        }

        let created_at = Instant::now();
        let expires_at = match ttl {
            // An expiry past what Instant can hold never arrives.
            TtlPolicy::Expires(ttl) => created_at.checked_add(ttl),
            TtlPolicy::Never => None,
        };

        let evicted = {
            let mut state = self.lock("set");
            state.remove(&key);

            let mut evicted = 0u64;
            while state.size_bytes + size_bytes > max_bytes {
                match state.entries.pop_lru() {
                    Some((evicted_key, entry)) => {
                        state.size_bytes -= entry.size_bytes;
                        evicted += 1;
                        trace!(key = %evicted_key, "evicted least recently used entry");
                    }
                    None => break,
                }
            }

            state.entries.put(
                key.clone(),
                CacheEntry {
                    key,
                    value,
                    created_at,
                    expires_at,
                    size_bytes,
                },
            );
            state.size_bytes += size_bytes;
            self.publish_size(&state);
            evicted
        };

        self.metrics.record_evictions(evicted);
        Ok(())
    }

    /// Removes a single entry. Returns true if one was present.
    pub fn remove(&self, key: &CacheKey) -> bool {
        let mut state = self.lock("remove");
        let removed = state.remove(key).is_some();
        if removed {
            self.publish_size(&state);
        }
        removed
    }

    /// Removes every entry whose key matches `predicate` and returns how many
    /// were removed.
    pub fn invalidate<F>(&self, predicate: F) -> usize
    where
        F: Fn(&CacheKey) -> bool,
    {
        let mut state = self.lock("invalidate");
        let doomed: Vec<CacheKey> = state
            .entries
            .iter()
            .filter(|(key, _)| predicate(key))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            state.remove(key);
        }
        self.publish_size(&state);
        doomed.len()
    }

    /// Removes expired entries eagerly and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock("purge_expired");
        let expired: Vec<CacheKey> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            state.remove(key);
        }
        self.publish_size(&state);
        expired.len()
    }

    /// Removes all entries. Counters are left untouched.
    pub fn clear(&self) {
        let mut state = self.lock("clear");
        state.entries.clear();
        state.size_bytes = 0;
        self.publish_size(&state);
    }

    /// Returns true if a live entry exists, without touching recency or
    /// hit/miss counters.
    pub fn contains(&self, key: &CacheKey) -> bool {
        let now = Instant::now();
        self.lock("contains")
            .entries
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Number of stored entries, including ones that expired but were not
    /// yet looked up.
    pub fn len(&self) -> usize {
        self.lock("len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tracked total size of all entries.
    pub fn size_bytes(&self) -> usize {
        self.lock("size_bytes").size_bytes
    }

    fn publish_size(&self, state: &StoreState) {
        self.metrics
            .set_store_size(state.size_bytes as u64, state.entries.len() as u64);
    }

    fn lock(&self, op: &'static str) -> MutexGuard<'_, StoreState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(
                    op,
                    result = "poisoned_recovered",
                    "Recovered from poisoned cache lock"
                );
                poisoned.into_inner()
            }
        }
    }
}
