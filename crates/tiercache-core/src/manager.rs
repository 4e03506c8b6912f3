//! Fetch-through orchestration across both tiers.
//!
//! ## Lookup Order
//!
//! ```text
//! get(key) → L1 (LRU) → L2 (remote) → fetch()
//!              hit ↩       hit: promote to L1 ↩
//!                                     value: write L1 + L2 ↩
//! ```
//!
//! Writes and deletes hit both tiers concurrently and wait for both. A remote
//! failure is logged and counted; the local write always lands.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

use crate::config::CacheConfig;
use crate::error::Result;
use crate::local::{LocalCache, LocalStats};
use crate::metrics;
use crate::pubsub::{InvalidationListener, InvalidationMessage};
use crate::remote::{
    RedisStore, RemoteCache, RemoteHealth, RemoteStats, RemoteStore, escape_glob,
};
use crate::stats::{FetchOutcome, StatsCollector, StatsSnapshot, StatsSummary, Tier};

/// Bounds required of cached values: native in L1, MessagePack in L2.
pub trait Cacheable: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Cacheable for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Structured health report for liveness checks.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub remote: RemoteHealth,
    pub local_size: usize,
}

/// Combined tier statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub local: LocalStats,
    pub remote: RemoteStats,
    pub tiers: StatsSnapshot,
}

type InFlight = DashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// A caller's claim on a key's in-flight fetch.
///
/// Dropping it, including when the owning future is cancelled, releases the
/// lock and removes the map entry once no other caller holds it.
struct InFlightSlot<'a> {
    in_flight: &'a InFlight,
    key: String,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.in_flight
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Two-tier cache with fetch-through population.
///
/// Constructed explicitly and shared through an `Arc`; there is no global
/// instance.
pub struct CacheManager<V> {
    local: Arc<LocalCache<V>>,
    remote: Arc<RemoteCache>,
    namespace: String,
    default_ttl: Duration,
    stats: StatsCollector,
    in_flight: Option<InFlight>,
    instance_id: String,
    invalidation_channel: Option<String>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<V: Cacheable> CacheManager<V> {
    /// Build both tiers around `store`.
    ///
    /// The remote tier starts disconnected; call [`CacheManager::connect_remote`].
    pub fn new(config: &CacheConfig, store: Arc<dyn RemoteStore>) -> Result<Self> {
        config.validate()?;

        let local = LocalCache::new(config.max_size, config.default_ttl())?;
        let remote = RemoteCache::with_config(store, config.namespace.clone(), &config.remote);

        Ok(Self {
            local: Arc::new(local),
            remote: Arc::new(remote),
            namespace: config.namespace.clone(),
            default_ttl: config.default_ttl(),
            stats: StatsCollector::new(),
            in_flight: config.coalesce_fetches.then(DashMap::new),
            instance_id: uuid::Uuid::new_v4().to_string(),
            invalidation_channel: config.remote.invalidation_channel.clone(),
            listener: Mutex::new(None),
        })
    }

    /// Build from configuration, connecting to Redis when the remote tier is
    /// enabled.
    ///
    /// An unreachable Redis is not an error: the manager runs L1-only.
    pub async fn from_config(config: &CacheConfig) -> Result<Self> {
        let store = Arc::new(RedisStore::new(&config.remote));
        let manager = Self::new(config, store)?;

        if !config.remote.enabled {
            tracing::info!("Remote cache disabled, using local cache only");
            return Ok(manager);
        }

        tracing::info!(url = %config.remote.url, "Connecting to remote cache");
        if manager.connect_remote().await {
            if let Some(channel) = manager.invalidation_channel.clone() {
                let handle = InvalidationListener {
                    redis_url: config.remote.url.clone(),
                    channel,
                    instance_id: manager.instance_id.clone(),
                    local_cache: Arc::clone(&manager.local),
                }
                .start();
                *manager.listener.lock() = Some(handle);
            }
        }
        Ok(manager)
    }

    /// Connect the remote tier with the configured retry policy.
    pub async fn connect_remote(&self) -> bool {
        self.remote.connect().await
    }

    pub fn local(&self) -> &LocalCache<V> {
        &self.local
    }

    pub fn remote(&self) -> &RemoteCache {
        &self.remote
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Unique id stamped on invalidation messages from this instance.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// The key as stored in both tiers.
    pub fn namespaced_key(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    /// Look `key` up in L1 then L2, promoting L2 hits.
    pub async fn get(&self, key: &str) -> Option<V> {
        let started = Instant::now();
        let value = self.lookup(&self.namespaced_key(key)).await;
        self.stats.record_request(started.elapsed(), value.is_some());
        value
    }

    /// Look `key` up and, on a miss at both tiers, run `fetch` and cache its
    /// value.
    ///
    /// `fetch` runs at most once. Its error is returned unchanged and nothing
    /// is cached for a failed or empty fetch.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: &str,
        fetch: F,
    ) -> std::result::Result<Option<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<V>, E>>,
    {
        let started = Instant::now();
        let full_key = self.namespaced_key(key);

        if let Some(value) = self.lookup(&full_key).await {
            self.stats.record_request(started.elapsed(), true);
            return Ok(Some(value));
        }

        let mut in_flight_slot = None;
        if let Some(in_flight) = &self.in_flight {
            let lock = Arc::clone(in_flight.entry(full_key.clone()).or_default().value());
            let mut slot = InFlightSlot {
                in_flight,
                key: full_key.clone(),
                guard: None,
            };
            slot.guard = Some(lock.lock_owned().await);
            // Another caller may have populated the key while we waited.
            if let Some(value) = self.recheck(&full_key).await {
                drop(slot);
                self.stats.record_request(started.elapsed(), true);
                return Ok(Some(value));
            }
            in_flight_slot = Some(slot);
        }

        let result = fetch().await;
        let result = match result {
            Ok(Some(value)) => {
                self.stats.record_fetch(FetchOutcome::Value);
                self.write_through(&full_key, value.clone(), None).await;
                Ok(Some(value))
            }
            Ok(None) => {
                self.stats.record_fetch(FetchOutcome::Empty);
                Ok(None)
            }
            Err(e) => {
                self.stats.record_fetch(FetchOutcome::Error);
                tracing::debug!(key = %full_key, "fetch failed, nothing cached");
                Err(e)
            }
        };

        drop(in_flight_slot);
        self.stats.record_request(started.elapsed(), false);
        result
    }

    /// Write `value` to both tiers. `ttl` defaults to the configured TTL.
    pub async fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        self.write_through(&self.namespaced_key(key), value, ttl).await;
    }

    /// Remove `key` from both tiers; returns whether either held it.
    pub async fn delete(&self, key: &str) -> bool {
        let full_key = self.namespaced_key(key);

        let (local_removed, remote_result) = tokio::join!(
            async { self.local.delete(&full_key) },
            self.remote.try_delete(&full_key),
        );

        if local_removed {
            self.stats.record_delete(Tier::L1);
        }
        let remote_removed = match remote_result {
            Ok(removed) => {
                if removed {
                    self.stats.record_delete(Tier::L2);
                }
                removed
            }
            Err(e) => {
                self.remote_failed("delete", &full_key, &e);
                false
            }
        };

        self.publish(InvalidationMessage::key(&self.instance_id, &full_key))
            .await;
        tracing::debug!(key = %full_key, local_removed, remote_removed, "cache invalidated");
        local_removed || remote_removed
    }

    /// Remove every key matching `pattern` (relative to the namespace) from L2
    /// and clear L1 entirely. Returns the number of L2 keys removed.
    pub async fn delete_pattern(&self, pattern: &str) -> u64 {
        let cleared = self.local.len();

        let ((), remote_result) = tokio::join!(
            async { self.local.clear() },
            self.remote.try_delete_pattern(pattern),
        );

        let deleted = match remote_result {
            Ok(deleted) => deleted,
            Err(e) => {
                self.remote_failed("delete_pattern", pattern, &e);
                0
            }
        };

        let scoped = self.remote.scoped(pattern);
        self.publish(InvalidationMessage::pattern(&self.instance_id, &scoped))
            .await;
        tracing::debug!(
            pattern = %scoped,
            local_cleared = cleared,
            remote_deleted = deleted,
            "cache pattern invalidated"
        );
        deleted
    }

    /// Invalidate a single key after upstream data changed.
    pub async fn invalidate(&self, key: &str) -> bool {
        self.delete(key).await
    }

    /// Invalidate every key starting with `prefix`.
    ///
    /// Glob characters in `prefix` are matched literally.
    pub async fn invalidate_pattern(&self, prefix: &str) -> u64 {
        self.delete_pattern(&format!("{}*", escape_glob(prefix))).await
    }

    /// Empty both tiers (L2 only within the namespace).
    pub async fn clear(&self) {
        self.delete_pattern("*").await;
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn summary(&self) -> StatsSummary {
        self.stats.summary(self.local.len(), self.remote.is_connected())
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            local: self.local.stats(),
            remote: self.remote.stats().await,
            tiers: self.stats.snapshot(),
        }
    }

    /// Healthy unless the remote tier is connected but not answering.
    pub async fn health(&self) -> HealthReport {
        let remote = self.remote.health().await;
        HealthReport {
            healthy: !remote.connected || remote.reachable,
            remote,
            local_size: self.local.len(),
        }
    }

    /// Periodically purge expired L1 entries and refresh gauges.
    ///
    /// The task runs until the handle is aborted.
    pub fn spawn_maintenance(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let purged = manager.local.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "purged expired local cache entries");
                }
                metrics::set_entries(Tier::L1.as_str(), manager.local.len());
                metrics::set_remote_connected(manager.remote.is_connected());
            }
        })
    }

    /// Stop the invalidation listener and disconnect the remote tier.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
        }
        self.remote.disconnect().await;
        tracing::info!("Cache manager shut down");
    }

    async fn lookup(&self, full_key: &str) -> Option<V> {
        if let Some(value) = self.local.get(full_key) {
            tracing::debug!(key = %full_key, "cache hit (L1)");
            self.stats.record_hit(Tier::L1);
            return Some(value);
        }
        self.stats.record_miss(Tier::L1);

        match self.remote.try_get::<V>(full_key).await {
            Ok(Some(value)) => {
                tracing::debug!(key = %full_key, "cache hit (L2)");
                self.stats.record_hit(Tier::L2);
                self.promote(full_key, value.clone());
                return Some(value);
            }
            Ok(None) => {}
            Err(e) => self.remote_failed("get", full_key, &e),
        }
        self.stats.record_miss(Tier::L2);
        tracing::debug!(key = %full_key, "cache miss");
        None
    }

    /// Re-read both tiers after waiting on an in-flight fetch.
    ///
    /// Only hits are counted; the misses were recorded by the first lookup.
    async fn recheck(&self, full_key: &str) -> Option<V> {
        if let Some(value) = self.local.get(full_key) {
            self.stats.record_hit(Tier::L1);
            return Some(value);
        }
        let value = self.remote.get::<V>(full_key).await?;
        self.stats.record_hit(Tier::L2);
        self.promote(full_key, value.clone());
        Some(value)
    }

    /// Copy an L2 hit into L1 with L1's default TTL.
    fn promote(&self, full_key: &str, value: V) {
        if self.local.set_with_ttl(full_key, value, None) {
            self.stats.record_evictions(Tier::L1, 1);
        }
        self.stats.record_set(Tier::L1);
    }

    async fn write_through(&self, full_key: &str, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);

        let (evicted, remote_result) = tokio::join!(
            async { self.local.set_with_ttl(full_key, value.clone(), Some(ttl)) },
            self.remote.try_set(full_key, &value, Some(ttl)),
        );

        self.stats.record_set(Tier::L1);
        if evicted {
            self.stats.record_evictions(Tier::L1, 1);
        }
        match remote_result {
            Ok(()) => self.stats.record_set(Tier::L2),
            Err(e) => self.remote_failed("set", full_key, &e),
        }
        tracing::debug!(key = %full_key, ttl_secs = ttl.as_secs(), "cache set");
    }

    fn remote_failed(&self, op: &'static str, key: &str, error: &crate::error::CacheError) {
        if !matches!(error, crate::error::CacheError::Disconnected) {
            self.stats.record_error(Tier::L2);
        }
        self.remote.report(op, key, error);
    }

    async fn publish(&self, message: InvalidationMessage) {
        let Some(channel) = &self.invalidation_channel else {
            return;
        };
        if let Err(e) = self.remote.try_publish(channel, &message.encode()).await {
            self.remote_failed("publish", channel, &e);
        }
    }
}

impl<V> Drop for CacheManager<V> {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}
