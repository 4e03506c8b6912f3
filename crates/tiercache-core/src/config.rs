use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{CacheError, Result};

/// Longest TTL either tier honours; larger values are clamped to it.
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Two-tier cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Local (L1) cache max entries
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    /// Default expiry for both tiers, in seconds
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Prefix applied to every logical key before it reaches either tier
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Serialize concurrent fetches for the same missing key.
    /// Default: false (every caller runs its own fetch)
    #[serde(default)]
    pub coalesce_fetches: bool,

    /// Remote (L2) store configuration
    #[serde(default)]
    pub remote: RemoteConfig,
}

fn default_max_size() -> usize {
    10000
}

fn default_ttl_secs() -> u64 {
    3600 // 1 hour
}

fn default_namespace() -> String {
    "cache:".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            default_ttl_secs: default_ttl_secs(),
            namespace: default_namespace(),
            coalesce_fetches: false,
            remote: RemoteConfig::default(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(CacheError::invalid_config("cache.max_size must be > 0"));
        }
        if self.default_ttl_secs == 0 {
            return Err(CacheError::invalid_config(
                "cache.default_ttl_secs must be > 0",
            ));
        }
        self.remote.validate()
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs).min(MAX_TTL)
    }
}

/// Remote (Redis) store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Enable the remote tier (gracefully degrades without it)
    /// Default: false (L1-only)
    #[serde(default)]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_remote_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Per-call timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Connection attempts made by `connect` before giving up
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Initial backoff between connection attempts, doubled after each failure
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Upper bound for the connection backoff
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Pub/sub channel for cross-instance L1 invalidation.
    /// Disabled when unset.
    #[serde(default)]
    pub invalidation_channel: Option<String>,
}

fn default_remote_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    5000
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_remote_url(),
            pool_size: default_pool_size(),
            timeout_ms: default_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            invalidation_channel: None,
        }
    }
}

impl RemoteConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(CacheError::invalid_config(
                "cache.remote.timeout_ms must be > 0",
            ));
        }
        if self.retry_attempts == 0 {
            return Err(CacheError::invalid_config(
                "cache.remote.retry_attempts must be > 0",
            ));
        }
        if self.max_backoff_ms < self.retry_backoff_ms {
            return Err(CacheError::invalid_config(
                "cache.remote.max_backoff_ms must be >= cache.remote.retry_backoff_ms",
            ));
        }
        if self.enabled {
            if self.url.trim().is_empty() {
                return Err(CacheError::invalid_config(
                    "cache.remote.enabled=true requires cache.remote.url",
                ));
            }
            if self.pool_size == 0 {
                return Err(CacheError::invalid_config(
                    "cache.remote.pool_size must be > 0",
                ));
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts,
            initial_backoff: Duration::from_millis(self.retry_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

/// Exponential backoff used while establishing the remote connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Backoff to wait after the given (zero-based) failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RemoteConfig::default().retry_policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = CacheConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.default_ttl(), Duration::from_secs(3600));
        assert!(!cfg.remote.enabled);
    }

    #[test]
    fn rejects_zero_max_size() {
        let cfg = CacheConfig {
            max_size: 0,
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, CacheError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_enabled_remote_without_url() {
        let mut cfg = CacheConfig::default();
        cfg.remote.enabled = true;
        cfg.remote.url = "  ".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_ttl_is_clamped() {
        let cfg = CacheConfig {
            default_ttl_secs: u64::MAX,
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.default_ttl(), MAX_TTL);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(350));
        assert_eq!(policy.backoff(31), Duration::from_millis(350));
    }

    #[test]
    fn deserializes_partial_toml_like_json() {
        let cfg: CacheConfig =
            serde_json::from_str(r#"{"max_size": 5, "remote": {"enabled": true}}"#).unwrap();
        assert_eq!(cfg.max_size, 5);
        assert_eq!(cfg.namespace, "cache:");
        assert!(cfg.remote.enabled);
        assert_eq!(cfg.remote.retry_attempts, 3);
    }
}
