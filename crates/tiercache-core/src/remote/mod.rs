//! Shared L2 tier.
//!
//! [`RemoteCache`] wraps a [`RemoteStore`] and owns the failure policy: every
//! round trip is bounded by the configured timeout, connection and payload
//! errors are logged and counted, and the infallible operations degrade to a
//! miss or a no-op so a store outage never reaches the caller.
//!
//! Keys are passed to the store verbatim. Patterns given to
//! [`RemoteCache::delete_pattern`] are relative to the namespace, so a bulk
//! delete can never reach outside it.

mod memory;
mod redis_store;

pub use memory::{MemoryStore, escape_glob, glob_to_regex};
pub use redis_store::RedisStore;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::{RemoteConfig, RetryPolicy};
use crate::error::{CacheError, Result};
use crate::metrics;

/// Server-side figures reported by a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreInfo {
    pub used_memory: Option<u64>,
    pub connected_clients: Option<u64>,
}

/// A network key-value store with TTL and glob deletion.
///
/// Implementations report failures as `CacheError`; they do not apply
/// timeouts or swallow errors themselves.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Establish (or re-establish) the connection. One attempt.
    async fn connect(&self) -> Result<()>;

    /// Drop the connection, if any.
    async fn disconnect(&self);

    async fn ping(&self) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value`; without a TTL the key never expires.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete every key matching a glob pattern; returns the count.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64>;

    async fn publish(&self, channel: &str, message: &str) -> Result<()>;

    async fn info(&self) -> Result<StoreInfo>;

    /// Short backend name for stats and logs.
    fn name(&self) -> &'static str;
}

/// Remote tier statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RemoteStats {
    pub backend: &'static str,
    pub connected: bool,
    pub approximate_memory_used: Option<u64>,
    pub client_count: Option<u64>,
    pub errors: u64,
}

/// Remote tier health for liveness/readiness checks.
#[derive(Debug, Clone, Serialize)]
pub struct RemoteHealth {
    pub connected: bool,
    pub reachable: bool,
    pub latency_ms: Option<u64>,
}

/// Fault-tolerant client for the shared store.
pub struct RemoteCache {
    store: Arc<dyn RemoteStore>,
    namespace: String,
    timeout: Duration,
    retry: RetryPolicy,
    connected: AtomicBool,
    errors: AtomicU64,
}

impl RemoteCache {
    /// Wrap `store`. The cache starts disconnected; call [`RemoteCache::connect`].
    pub fn new(
        store: Arc<dyn RemoteStore>,
        namespace: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            timeout,
            retry,
            connected: AtomicBool::new(false),
            errors: AtomicU64::new(0),
        }
    }

    pub fn with_config(
        store: Arc<dyn RemoteStore>,
        namespace: impl Into<String>,
        config: &RemoteConfig,
    ) -> Self {
        Self::new(store, namespace, config.timeout(), config.retry_policy())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn backend(&self) -> &'static str {
        self.store.name()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Connect with exponential backoff.
    ///
    /// Returns `false` once every attempt failed; the cache then stays
    /// disconnected and all operations report miss/no-op.
    pub async fn connect(&self) -> bool {
        let attempts = self.retry.attempts.max(1);

        for attempt in 0..attempts {
            match tokio::time::timeout(self.timeout, self.store.connect()).await {
                Ok(Ok(())) => {
                    self.connected.store(true, Ordering::Release);
                    metrics::set_remote_connected(true);
                    tracing::info!(
                        backend = self.store.name(),
                        attempt = attempt + 1,
                        "Connected to remote cache store"
                    );
                    return true;
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        backend = self.store.name(),
                        attempt = attempt + 1,
                        attempts,
                        error = %e,
                        "Remote cache connection attempt failed"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        backend = self.store.name(),
                        attempt = attempt + 1,
                        attempts,
                        timeout_ms = self.timeout_ms(),
                        "Remote cache connection attempt timed out"
                    );
                }
            }

            if attempt + 1 < attempts {
                tokio::time::sleep(self.retry.backoff(attempt)).await;
            }
        }

        self.connected.store(false, Ordering::Release);
        metrics::set_remote_connected(false);
        tracing::error!(
            backend = self.store.name(),
            attempts,
            "Remote cache unreachable, continuing with local cache only"
        );
        false
    }

    /// Force the disconnected state and release the store connection.
    pub async fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        metrics::set_remote_connected(false);
        self.store.disconnect().await;
        tracing::info!(backend = self.store.name(), "Remote cache disconnected");
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// Run one store round trip under the per-call timeout.
    async fn call<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if !self.is_connected() {
            return Err(CacheError::Disconnected);
        }
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.timeout_ms())),
        }
    }

    /// Log and count a failed operation.
    ///
    /// Being disconnected is the expected degraded mode and is not counted.
    pub fn report(&self, op: &'static str, key: &str, error: &CacheError) {
        if matches!(error, CacheError::Disconnected) {
            tracing::debug!(op, key = %key, "remote cache disconnected, skipping");
            return;
        }
        self.errors.fetch_add(1, Ordering::Relaxed);
        metrics::record_tier_error("L2", op);
        tracing::warn!(op, key = %key, error = %error, "remote cache operation failed");
    }

    /// `pattern` under the namespace; the namespace itself matches literally.
    pub fn scoped(&self, pattern: &str) -> String {
        format!("{}{}", escape_glob(&self.namespace), pattern)
    }

    pub async fn try_get<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>> {
        match self.call(self.store.get(key)).await? {
            Some(bytes) => Ok(Some(rmp_serde::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn try_set<V: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &V,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let bytes = rmp_serde::to_vec(value)?;
        self.call(self.store.set(key, &bytes, ttl)).await
    }

    pub async fn try_delete(&self, key: &str) -> Result<bool> {
        self.call(self.store.delete(key)).await
    }

    pub async fn try_delete_pattern(&self, pattern: &str) -> Result<u64> {
        let scoped = self.scoped(pattern);
        self.call(self.store.delete_pattern(&scoped)).await
    }

    pub async fn try_publish(&self, channel: &str, message: &str) -> Result<()> {
        self.call(self.store.publish(channel, message)).await
    }

    /// Fetch and decode a value; any failure reads as a miss.
    pub async fn get<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
        match self.try_get(key).await {
            Ok(value) => value,
            Err(e) => {
                self.report("get", key, &e);
                None
            }
        }
    }

    /// Encode and store a value. Returns whether the write landed.
    pub async fn set<V: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &V,
        ttl: Option<Duration>,
    ) -> bool {
        match self.try_set(key, value, ttl).await {
            Ok(()) => true,
            Err(e) => {
                self.report("set", key, &e);
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        match self.try_delete(key).await {
            Ok(existed) => existed,
            Err(e) => {
                self.report("delete", key, &e);
                false
            }
        }
    }

    /// Delete keys matching `pattern` inside the namespace.
    pub async fn delete_pattern(&self, pattern: &str) -> u64 {
        match self.try_delete_pattern(pattern).await {
            Ok(count) => count,
            Err(e) => {
                self.report("delete_pattern", pattern, &e);
                0
            }
        }
    }

    /// Delete every key in the namespace.
    pub async fn clear(&self) -> u64 {
        self.delete_pattern("*").await
    }

    pub async fn stats(&self) -> RemoteStats {
        let connected = self.is_connected();
        let info = if connected {
            match self.call(self.store.info()).await {
                Ok(info) => info,
                Err(e) => {
                    self.report("info", "", &e);
                    StoreInfo::default()
                }
            }
        } else {
            StoreInfo::default()
        };

        RemoteStats {
            backend: self.store.name(),
            connected,
            approximate_memory_used: info.used_memory,
            client_count: info.connected_clients,
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    /// Ping the store within the per-call timeout.
    pub async fn health(&self) -> RemoteHealth {
        let connected = self.is_connected();
        if !connected {
            return RemoteHealth {
                connected,
                reachable: false,
                latency_ms: None,
            };
        }

        let started = Instant::now();
        match self.call(self.store.ping()).await {
            Ok(()) => RemoteHealth {
                connected,
                reachable: true,
                latency_ms: Some(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)),
            },
            Err(e) => {
                tracing::warn!(error = %e, "remote cache health check failed");
                RemoteHealth {
                    connected,
                    reachable: false,
                    latency_ms: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        visits: u32,
    }

    fn retry(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    async fn connected_cache() -> (Arc<MemoryStore>, RemoteCache) {
        let store = Arc::new(MemoryStore::new());
        let cache = RemoteCache::new(store.clone(), "test:", Duration::from_millis(500), retry(1));
        assert!(cache.connect().await);
        (store, cache)
    }

    #[tokio::test]
    async fn test_round_trip_typed_value() {
        let (_, cache) = connected_cache().await;
        let profile = Profile {
            name: "ada".to_string(),
            visits: 3,
        };

        assert!(cache.set("test:p1", &profile, Some(Duration::from_secs(60))).await);
        assert_eq!(cache.get::<Profile>("test:p1").await, Some(profile));
        assert_eq!(cache.get::<Profile>("test:missing").await, None);
    }

    #[tokio::test]
    async fn test_disconnected_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let cache = RemoteCache::new(store.clone(), "test:", Duration::from_millis(500), retry(1));

        assert!(!cache.is_connected());
        assert!(!cache.set("test:k", &1u32, None).await);
        assert_eq!(cache.get::<u32>("test:k").await, None);
        assert!(!cache.delete("test:k").await);
        assert_eq!(cache.clear().await, 0);
        assert!(store.is_empty());
        assert_eq!(cache.stats().await.errors, 0);
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_retries() {
        let store = Arc::new(MemoryStore::new());
        store.set_available(false);
        let cache = RemoteCache::new(store.clone(), "test:", Duration::from_millis(100), retry(3));

        assert!(!cache.connect().await);
        assert!(!cache.is_connected());
        assert_eq!(store.connect_attempts(), 3);
        assert_eq!(cache.get::<u32>("test:k").await, None);
    }

    #[tokio::test]
    async fn test_corrupt_payload_reads_as_miss() {
        let (store, cache) = connected_cache().await;
        store.insert_raw("test:bad", vec![0xc1, 0xff, 0x00]);

        assert_eq!(cache.get::<Profile>("test:bad").await, None);
        assert!(cache.try_get::<Profile>("test:bad").await.is_err());
        assert_eq!(cache.stats().await.errors, 1);
    }

    #[tokio::test]
    async fn test_outage_degrades_to_miss() {
        let (store, cache) = connected_cache().await;
        assert!(cache.set("test:k", &7u32, None).await);

        store.set_available(false);
        assert_eq!(cache.get::<u32>("test:k").await, None);
        assert!(!cache.set("test:k", &8u32, None).await);
        assert_eq!(cache.delete_pattern("*").await, 0);

        let health = cache.health().await;
        assert!(health.connected);
        assert!(!health.reachable);
        assert!(cache.stats().await.errors >= 3);
    }

    #[tokio::test]
    async fn test_patterns_stay_in_namespace() {
        let (store, cache) = connected_cache().await;
        cache.set("test:user:1", &1u32, None).await;
        cache.set("test:user:2", &2u32, None).await;
        cache.set("test:post:1", &3u32, None).await;
        cache.set("other:user:1", &4u32, None).await;

        assert_eq!(cache.delete_pattern("user:*").await, 2);
        assert_eq!(cache.get::<u32>("test:post:1").await, Some(3));

        assert_eq!(cache.clear().await, 1);
        assert!(store.contains("other:user:1"));
    }

    #[tokio::test]
    async fn test_stats_and_health_when_connected() {
        let (_, cache) = connected_cache().await;
        cache.set("test:k", &"value", None).await;

        let stats = cache.stats().await;
        assert!(stats.connected);
        assert_eq!(stats.backend, "memory");
        assert!(stats.approximate_memory_used.unwrap_or(0) > 0);
        assert_eq!(stats.client_count, Some(1));

        let health = cache.health().await;
        assert!(health.reachable);
        assert!(health.latency_ms.is_some());

        cache.disconnect().await;
        assert!(!cache.health().await.connected);
    }
}
