//! Redis-backed [`RemoteStore`] over a deadpool connection pool.

use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use redis::AsyncCommands;
use std::sync::Arc;

use super::{RemoteStore, StoreInfo};
use crate::config::{MAX_TTL, RemoteConfig};
use crate::error::{CacheError, Result};

/// Keys fetched per `SCAN` round trip during pattern deletes.
const SCAN_BATCH: usize = 100;

/// Pooled Redis client.
///
/// The pool is created by `connect` and swapped in atomically, so the hot path
/// only loads a pointer.
pub struct RedisStore {
    url: String,
    pool_size: usize,
    timeout: Duration,
    pool: ArcSwapOption<Pool>,
}

impl RedisStore {
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            url: config.url.clone(),
            pool_size: config.pool_size,
            timeout: config.timeout(),
            pool: ArcSwapOption::empty(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn create_pool(&self) -> Result<Pool> {
        let mut redis_config = deadpool_redis::Config::from_url(&self.url);
        let pool_config = redis_config
            .pool
            .get_or_insert_with(|| deadpool_redis::PoolConfig::new(self.pool_size));
        pool_config.max_size = self.pool_size;
        pool_config.timeouts.wait = Some(self.timeout);
        pool_config.timeouts.create = Some(self.timeout);
        pool_config.timeouts.recycle = Some(self.timeout);

        redis_config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| CacheError::connection(format!("failed to create Redis pool: {e}")))
    }

    async fn conn(&self) -> Result<Connection> {
        let pool = self.pool.load_full().ok_or(CacheError::Disconnected)?;
        Ok(pool.get().await?)
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn connect(&self) -> Result<()> {
        let pool = self.create_pool()?;

        // Check out a connection so a bad URL fails here, not on first use.
        let mut conn = pool.get().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        drop(conn);
        tracing::debug!(url = %self.url, reply = %pong, "Redis PING");

        if let Some(previous) = self.pool.swap(Some(Arc::new(pool))) {
            previous.close();
        }
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(pool) = self.pool.swap(None) {
            pool.close();
        }
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        Ok(conn.get::<_, Option<Vec<u8>>>(key).await?)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn().await?;
        match ttl {
            Some(ttl) => {
                let ttl = ttl.min(MAX_TTL);
                let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
                conn.pset_ex::<_, _, ()>(key, value, millis).await?;
            }
            None => conn.set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        let mut conn = self.conn().await?;
        let mut cursor: u64 = 0;
        let mut total_deleted = 0;

        // SCAN instead of KEYS so a large keyspace never blocks the server.
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let deleted: u64 = conn.del(&keys).await?;
                total_deleted += deleted;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        tracing::debug!(pattern = %pattern, deleted = total_deleted, "Redis pattern delete");
        Ok(total_deleted)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.publish::<_, _, ()>(channel, message).await?;
        Ok(())
    }

    async fn info(&self) -> Result<StoreInfo> {
        let mut conn = self.conn().await?;
        let raw: String = redis::cmd("INFO").query_async(&mut conn).await?;
        Ok(parse_info(&raw))
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Pull the figures we report out of an `INFO` reply.
fn parse_info(raw: &str) -> StoreInfo {
    let mut info = StoreInfo::default();
    for line in raw.lines() {
        let Some((field, value)) = line.trim().split_once(':') else {
            continue;
        };
        match field {
            "used_memory" => info.used_memory = value.parse().ok(),
            "connected_clients" => info.connected_clients = value.parse().ok(),
            _ => {}
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_info() {
        let raw = "# Clients\r\nconnected_clients:4\r\nblocked_clients:0\r\n\r\n# Memory\r\nused_memory:1048576\r\nused_memory_human:1.00M\r\n";
        let info = parse_info(raw);
        assert_eq!(info.connected_clients, Some(4));
        assert_eq!(info.used_memory, Some(1_048_576));
    }

    #[test]
    fn test_parse_info_missing_fields() {
        assert_eq!(parse_info("# Server\r\nredis_version:7.2.0\r\n"), StoreInfo::default());
    }

    #[tokio::test]
    async fn test_unconnected_store_reports_disconnected() {
        let store = RedisStore::new(&RemoteConfig::default());
        assert!(matches!(store.get("k").await, Err(CacheError::Disconnected)));
        assert!(matches!(store.ping().await, Err(CacheError::Disconnected)));
    }
}
