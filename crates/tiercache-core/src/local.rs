//! In-process L1 tier: a bounded LRU map with per-entry expiry.
//!
//! Recency is updated on every read and write. When the map is full and a new
//! key arrives, exactly one least-recently-used entry is evicted. Overwriting
//! an existing key never evicts. Expired entries are dropped lazily on read,
//! or in bulk by [`LocalCache::purge_expired`].

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::MAX_TTL;
use crate::error::{CacheError, Result};

/// Deadline `ttl` from `now`, clamped to [`MAX_TTL`].
pub(crate) fn deadline(now: Instant, ttl: Duration) -> Instant {
    let ttl = ttl.min(MAX_TTL);
    now.checked_add(ttl)
        .or_else(|| now.checked_add(Duration::from_secs(365 * 24 * 60 * 60)))
        .unwrap_or(now)
}

/// A value held by the local tier together with its deadline.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: deadline(Instant::now(), ttl),
        }
    }

    /// An entry is expired at and after its deadline.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Snapshot of the local tier counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LocalStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    /// Entries dropped to make room for a new key.
    pub evictions: u64,
    /// Entries dropped because their TTL elapsed.
    pub expirations: u64,
}

impl LocalStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

/// Size-bounded LRU cache with TTL, guarded by a single mutex.
///
/// Every operation is a short map update, so the lock is never held across
/// an await point or any user code.
pub struct LocalCache<V> {
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
    capacity: NonZeroUsize,
    default_ttl: Duration,
    counters: Counters,
}

impl<V: Clone> LocalCache<V> {
    /// Create a cache holding at most `max_size` entries.
    ///
    /// Fails if `max_size` or `default_ttl` is zero.
    pub fn new(max_size: usize, default_ttl: Duration) -> Result<Self> {
        let capacity = NonZeroUsize::new(max_size)
            .ok_or_else(|| CacheError::invalid_config("local cache max_size must be > 0"))?;
        if default_ttl.is_zero() {
            return Err(CacheError::invalid_config(
                "local cache default TTL must be > 0",
            ));
        }

        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
            capacity,
            default_ttl,
            counters: Counters::default(),
        })
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Get a live value and mark it most-recently-used.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let expired = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(key);
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert or overwrite `key` using the default TTL.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, None);
    }

    /// Insert or overwrite `key`.
    ///
    /// Returns `true` if an older entry was evicted to make room.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) -> bool {
        let key = key.into();
        let entry = CacheEntry::new(value, ttl.unwrap_or(self.default_ttl));
        let mut entries = self.entries.lock();

        let mut evicted = false;
        if !entries.contains(&key) && entries.len() >= self.capacity.get() {
            if let Some((victim, _)) = entries.pop_lru() {
                tracing::trace!(key = %victim, "evicted least recently used entry");
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                evicted = true;
            }
        }
        entries.put(key, entry);
        self.counters.sets.fetch_add(1, Ordering::Relaxed);
        evicted
    }

    /// Remove `key`; returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.entries.lock().pop(key).is_some();
        if removed {
            self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Whether `key` holds a live entry. Does not touch recency or counters.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .lock()
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }

        if !expired.is_empty() {
            self.counters
                .expirations
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
        }
        expired.len()
    }

    pub fn stats(&self) -> LocalStats {
        LocalStats {
            size: self.len(),
            capacity: self.capacity.get(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            sets: self.counters.sets.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
        }
    }
}
