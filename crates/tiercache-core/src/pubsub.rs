//! Redis Pub/Sub for cross-instance L1 invalidation.
//!
//! ## How It Works
//!
//! 1. `CacheManager::delete` / `delete_pattern` publish an [`InvalidationMessage`]
//! 2. Every instance runs an [`InvalidationListener`] on the same channel
//! 3. On receipt the listener drops the key (or the whole L1 for a pattern)
//!
//! ```text
//! Instance 1: cache.delete("user:1")
//!   ↓
//! Redis Pub/Sub: PUBLISH <channel> "<instance-1>|key:cache:user:1"
//!   ↓
//! Instance 2: Listener receives → removes "cache:user:1" from L1
//! Instance 1: Listener receives its own message → ignored
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::local::LocalCache;

/// What a peer asked us to drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    /// A single namespaced key
    Key(String),
    /// A namespaced glob pattern; the local tier is cleared entirely
    Pattern(String),
}

/// Wire format: `<origin>|key:<key>` or `<origin>|pattern:<pattern>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationMessage {
    pub origin: String,
    pub invalidation: Invalidation,
}

impl InvalidationMessage {
    pub fn key(origin: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            invalidation: Invalidation::Key(key.into()),
        }
    }

    pub fn pattern(origin: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            invalidation: Invalidation::Pattern(pattern.into()),
        }
    }

    pub fn encode(&self) -> String {
        match &self.invalidation {
            Invalidation::Key(key) => format!("{}|key:{}", self.origin, key),
            Invalidation::Pattern(pattern) => format!("{}|pattern:{}", self.origin, pattern),
        }
    }

    pub fn decode(payload: &str) -> Option<Self> {
        let (origin, body) = payload.split_once('|')?;
        let invalidation = if let Some(key) = body.strip_prefix("key:") {
            Invalidation::Key(key.to_string())
        } else if let Some(pattern) = body.strip_prefix("pattern:") {
            Invalidation::Pattern(pattern.to_string())
        } else {
            return None;
        };
        Some(Self {
            origin: origin.to_string(),
            invalidation,
        })
    }

    /// Apply to a local tier unless we published it ourselves.
    ///
    /// Returns whether anything was applied.
    pub fn apply<V: Clone>(&self, instance_id: &str, local: &LocalCache<V>) -> bool {
        if self.origin == instance_id {
            return false;
        }
        match &self.invalidation {
            Invalidation::Key(key) => {
                local.delete(key);
            }
            Invalidation::Pattern(_) => local.clear(),
        }
        true
    }
}

/// Cache invalidation listener that subscribes to Redis Pub/Sub.
pub struct InvalidationListener<V> {
    pub redis_url: String,
    pub channel: String,
    pub instance_id: String,
    pub local_cache: Arc<LocalCache<V>>,
}

impl<V> InvalidationListener<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Start listening for invalidation events.
    ///
    /// Spawns a background task that reconnects with exponential backoff if
    /// the subscription drops. Abort the returned handle to stop it.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut backoff = Duration::from_secs(1);
            const MAX_BACKOFF: Duration = Duration::from_secs(300);

            loop {
                match self.run().await {
                    Ok(()) => {
                        backoff = Duration::from_secs(1);
                    }
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            channel = %self.channel,
                            backoff_secs = backoff.as_secs(),
                            "Cache invalidation listener error, reconnecting..."
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        })
    }

    async fn run(&self) -> Result<(), String> {
        use futures_util::StreamExt;

        // Pub/sub needs a dedicated connection, not a pooled one.
        let client = redis::Client::open(self.redis_url.as_str())
            .map_err(|e| format!("failed to create Redis client: {e}"))?;

        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| format!("failed to get pub/sub connection: {e}"))?;

        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| format!("failed to subscribe: {e}"))?;

        tracing::info!(channel = %self.channel, "Subscribed to cache invalidation channel");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let Ok(payload) = msg.get_payload::<String>() else {
                tracing::warn!("failed to parse invalidation message payload");
                continue;
            };
            match InvalidationMessage::decode(&payload) {
                Some(message) => {
                    if message.apply(&self.instance_id, &self.local_cache) {
                        tracing::debug!(invalidation = ?message.invalidation, "applied remote invalidation");
                    }
                }
                None => tracing::warn!(payload = %payload, "unrecognized invalidation message"),
            }
        }

        Err("pub/sub connection closed".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_round_trip() {
        let key = InvalidationMessage::key("node-a", "cache:user:1");
        assert_eq!(key.encode(), "node-a|key:cache:user:1");
        assert_eq!(InvalidationMessage::decode(&key.encode()), Some(key));

        let pattern = InvalidationMessage::pattern("node-a", "cache:user:*");
        assert_eq!(InvalidationMessage::decode(&pattern.encode()), Some(pattern));

        assert_eq!(InvalidationMessage::decode("no-separator"), None);
        assert_eq!(InvalidationMessage::decode("node|bogus:x"), None);
    }

    #[test]
    fn test_apply_skips_own_messages() {
        let local = LocalCache::new(10, Duration::from_secs(60)).unwrap();
        local.set("cache:a", 1u32);
        local.set("cache:b", 2u32);

        let own = InvalidationMessage::key("me", "cache:a");
        assert!(!own.apply("me", &local));
        assert!(local.contains("cache:a"));

        let peer = InvalidationMessage::key("peer", "cache:a");
        assert!(peer.apply("me", &local));
        assert!(!local.contains("cache:a"));
        assert!(local.contains("cache:b"));

        let wipe = InvalidationMessage::pattern("peer", "cache:*");
        assert!(wipe.apply("me", &local));
        assert!(local.is_empty());
    }
}
