//! Integration tests for the Redis tier.
//!
//! These tests spin up a real Redis instance with testcontainers and need a
//! container runtime: `cargo test -- --ignored`.

use std::sync::Arc;
use std::time::Duration;

use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tiercache_core::{CacheConfig, CacheManager, RedisStore, RemoteStore};
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

/// Get or create the shared Redis container
async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{}", host_port);

            (container, url)
        })
        .await;

    url.clone()
}

async fn redis_config(namespace: &str) -> CacheConfig {
    let mut config = CacheConfig {
        max_size: 100,
        namespace: namespace.to_string(),
        ..Default::default()
    };
    config.remote.enabled = true;
    config.remote.url = get_redis_url().await;
    config.remote.pool_size = 5;
    config.remote.timeout_ms = 5000;
    config
}

#[tokio::test]
#[ignore = "requires a container runtime"]
async fn test_redis_connection_and_round_trip() {
    let config = redis_config("rt:").await;
    let cache = CacheManager::<String>::from_config(&config).await.unwrap();

    assert!(cache.remote().is_connected());
    assert!(cache.health().await.remote.reachable);

    cache.set("greeting", "hello".to_string(), None).await;
    assert_eq!(cache.get("greeting").await.as_deref(), Some("hello"));

    let stats = cache.stats().await;
    assert_eq!(stats.remote.backend, "redis");
    assert!(stats.remote.approximate_memory_used.is_some());
    assert!(stats.remote.client_count.unwrap_or(0) >= 1);
}

#[tokio::test]
#[ignore = "requires a container runtime"]
async fn test_redis_l2_promotion_across_instances() {
    let config = redis_config("promo:").await;

    let cache1 = CacheManager::<String>::from_config(&config).await.unwrap();
    cache1.set("shared", "value".to_string(), None).await;

    // A second instance sees the value through L2 and promotes it.
    let cache2 = CacheManager::<String>::from_config(&config).await.unwrap();
    assert_eq!(cache2.get("shared").await.as_deref(), Some("value"));
    assert!(cache2.local().contains("promo:shared"));
    assert_eq!(cache2.stats_snapshot().l2.hits, 1);
}

#[tokio::test]
#[ignore = "requires a container runtime"]
async fn test_redis_ttl_expiry() {
    let config = redis_config("ttl:").await;
    let cache = CacheManager::<u32>::from_config(&config).await.unwrap();

    cache.set("short", 1, Some(Duration::from_secs(1))).await;
    cache.local().clear();
    assert_eq!(cache.get("short").await, Some(1));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    cache.local().clear();
    assert_eq!(cache.get("short").await, None);
}

#[tokio::test]
#[ignore = "requires a container runtime"]
async fn test_redis_pattern_delete_is_namespaced() {
    let config = redis_config("pat:").await;
    let cache = CacheManager::<u32>::from_config(&config).await.unwrap();
    let other = CacheManager::<u32>::from_config(&redis_config("other:").await)
        .await
        .unwrap();

    for i in 0..250 {
        cache.set(&format!("item:{i}"), i, None).await;
    }
    other.set("item:1", 1, None).await;

    assert_eq!(cache.invalidate_pattern("item:").await, 250);
    other.local().clear();
    assert_eq!(other.get("item:1").await, Some(1));
}

#[tokio::test]
#[ignore = "requires a container runtime"]
async fn test_redis_cross_instance_invalidation() {
    let mut config = redis_config("pubsub:").await;
    config.remote.invalidation_channel = Some("tiercache:test:invalidate".to_string());

    let cache1 = CacheManager::<u32>::from_config(&config).await.unwrap();
    let cache2 = CacheManager::<u32>::from_config(&config).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    cache1.set("k", 1, None).await;
    assert_eq!(cache2.get("k").await, Some(1));
    assert!(cache2.local().contains("pubsub:k"));

    cache1.delete("k").await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(!cache2.local().contains("pubsub:k"));
    cache1.shutdown().await;
    cache2.shutdown().await;
}

#[tokio::test]
async fn test_graceful_degradation_invalid_url() {
    let mut config = CacheConfig::default();
    config.remote.enabled = true;
    config.remote.url = "redis://127.0.0.1:1".to_string();
    config.remote.timeout_ms = 500;
    config.remote.retry_attempts = 2;
    config.remote.retry_backoff_ms = 10;
    config.remote.max_backoff_ms = 20;

    // Falls back to L1-only instead of failing.
    let cache = CacheManager::<String>::from_config(&config).await.unwrap();
    assert!(!cache.remote().is_connected());

    cache.set("fallback", "value".to_string(), None).await;
    assert_eq!(cache.get("fallback").await.as_deref(), Some("value"));
    assert!(cache.health().await.healthy);
}

#[tokio::test]
async fn test_disabled_remote() {
    let cache = CacheManager::<String>::from_config(&CacheConfig::default())
        .await
        .unwrap();

    assert!(!cache.remote().is_connected());
    assert_eq!(cache.remote().backend(), "redis");
    assert!(!cache.summary().remote_connected);
}

#[tokio::test]
async fn test_unconnected_store_ping_fails() {
    let store: Arc<dyn RemoteStore> = Arc::new(RedisStore::new(&CacheConfig::default().remote));
    assert!(store.ping().await.is_err());
}
