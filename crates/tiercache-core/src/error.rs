use thiserror::Error;

/// Errors raised inside the cache tiers.
///
/// Only `InvalidConfig` ever reaches a caller, and only from constructors.
/// Everything else is logged and counted at the tier boundary and turned into
/// a miss or a no-op.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),

    #[error("Remote store connection error: {0}")]
    Connection(String),

    #[error("Remote store operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Failed to serialize cache value: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("Failed to deserialize cache value: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("Remote store is disconnected")]
    Disconnected,
}

impl CacheError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Whether the error means the store could not be reached at all.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_) | Self::Disconnected)
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        Self::Connection(e.to_string())
    }
}

impl From<deadpool_redis::PoolError> for CacheError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Self::Connection(e.to_string())
    }
}

/// Result type for cache tier operations
pub type Result<T> = std::result::Result<T, CacheError>;
