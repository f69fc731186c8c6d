//! # Query Cache
//!
//! TTL + LRU store for successful query responses, built on `lru::LruCache`.
//!
//! - Expired entries are purged lazily at the start of each `get`, so there
//!   is no background sweeper.
//! - A hit refreshes recency. Inserting at capacity evicts the least
//!   recently used entry first.
//! - Responses are stored type-erased. A lookup with the wrong response
//!   type is reported as a miss and leaves recency untouched.
//!
//! The cache is not synchronized; it lives inside the bus state lock.

use bus_types::Response;
use lru::LruCache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::any::{type_name, Any};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Longest TTL honored. Larger values are clamped so the expiry instant
/// cannot overflow.
pub const MAX_CACHE_TTL: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Counters reported by [`QueryCache::statistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    /// Live entries at the time of the snapshot.
    pub entries: usize,
    /// Entries dropped to make room (LRU).
    pub evictions: u64,
    /// Entries removed by `invalidate`/`invalidate_all`.
    pub invalidations: u64,
    /// Entries dropped because their TTL elapsed.
    pub expirations: u64,
}

impl CacheStatistics {
    /// Hit ratio in `[0, 1]`, or `0.0` before any lookup.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheEntry {
    response: Arc<dyn Any + Send + Sync>,
    expires_at: Instant,
    hit_count: u64,
}

/// TTL/LRU response cache.
pub struct QueryCache {
    entries: LruCache<String, CacheEntry>,
    capacity: usize,
    /// Earliest expiry among live entries. Lets `get` skip the purge scan.
    next_expiry: Option<Instant>,
    stats: CacheStatistics,
}

impl QueryCache {
    /// Create a cache holding at most `capacity` responses.
    /// A capacity of zero disables caching.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let bound = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(bound),
            capacity,
            next_expiry: None,
            stats: CacheStatistics::default(),
        }
    }

    /// Look up a cached response.
    pub fn get<R>(&mut self, key: &str) -> Option<Response<R>>
    where
        R: Clone + Send + Sync + 'static,
    {
        self.purge_expired(Instant::now());

        let type_matches = self
            .entries
            .peek(key)
            .map(|entry| entry.response.is::<Response<R>>());
        if type_matches == Some(false) {
            trace!(key, expected = type_name::<R>(), "Cached response type differs");
        }

        let hit = match type_matches {
            Some(true) => self.entries.get_mut(key).and_then(|entry| {
                entry.hit_count += 1;
                entry.response.downcast_ref::<Response<R>>().cloned()
            }),
            _ => None,
        };

        if hit.is_some() {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }
        hit
    }

    /// Store a response for `ttl`. Replaces any existing entry for `key`.
    /// TTLs above [`MAX_CACHE_TTL`] are clamped.
    pub fn set<R>(&mut self, key: impl Into<String>, response: Response<R>, ttl: Duration)
    where
        R: Send + Sync + 'static,
    {
        if self.capacity == 0 {
            return;
        }
        let key = key.into();
        let now = Instant::now();

        if !self.entries.contains(&key) {
            self.purge_expired(now);
            while self.entries.len() >= self.capacity {
                let Some((evicted, _)) = self.entries.pop_lru() else {
                    break;
                };
                self.stats.evictions += 1;
                trace!(key = %evicted, "Evicted least recently used response");
            }
        }

        let expires_at = now + ttl.min(MAX_CACHE_TTL);
        self.entries.put(
            key,
            CacheEntry {
                response: Arc::new(response),
                expires_at,
                hit_count: 0,
            },
        );
        self.next_expiry = Some(self.next_expiry.map_or(expires_at, |e| e.min(expires_at)));
    }

    /// Drop one entry. Returns whether it existed.
    pub fn invalidate(&mut self, key: &str) -> bool {
        let removed = self.entries.pop(key).is_some();
        if removed {
            self.stats.invalidations += 1;
        }
        removed
    }

    /// Drop every entry.
    pub fn invalidate_all(&mut self) {
        self.stats.invalidations += self.entries.len() as u64;
        self.entries.clear();
        self.next_expiry = None;
    }

    /// Whether a live entry exists for `key`. Does not touch recency or
    /// counters.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .peek(key)
            .is_some_and(|entry| entry.expires_at > now)
    }

    /// Number of hits served by the entry for `key`.
    #[must_use]
    pub fn hit_count(&self, key: &str) -> Option<u64> {
        self.entries.peek(key).map(|entry| entry.hit_count)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn statistics(&self) -> CacheStatistics {
        CacheStatistics {
            entries: self.entries.len(),
            ..self.stats
        }
    }

    fn purge_expired(&mut self, now: Instant) {
        if self.next_expiry.map_or(true, |next| next > now) {
            return;
        }

        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.entries.pop(key);
        }
        self.stats.expirations += expired.len() as u64;
        self.next_expiry = self.entries.iter().map(|(_, e)| e.expires_at).min();

        if !expired.is_empty() {
            trace!(count = expired.len(), "Purged expired responses");
        }
    }
}

/// Derive a cache key from the declared types, the payload and the
/// destination layer.
///
/// The payload goes through `serde_json::Value` first so map fields are
/// hashed in sorted key order.
///
/// # Errors
///
/// Fails if the payload cannot be serialized.
pub fn derive_cache_key<T, R>(
    payload: &T,
    destination: Option<bus_types::Layer>,
) -> Result<String, serde_json::Error>
where
    T: Serialize,
{
    let canonical = serde_json::to_value(payload)?;
    let mut hasher = Sha256::new();
    hasher.update(type_name::<T>().as_bytes());
    hasher.update([0u8]);
    hasher.update(type_name::<R>().as_bytes());
    hasher.update([0u8]);
    hasher.update(serde_json::to_vec(&canonical)?);
    if let Some(destination) = destination {
        hasher.update([0u8]);
        hasher.update(destination.as_str().as_bytes());
    }
    Ok(hex::encode(hasher.finalize()))
}
