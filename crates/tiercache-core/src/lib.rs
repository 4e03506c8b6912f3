//! Two-tier caching for read-heavy lookups.
//!
//! ## Architecture
//!
//! - **L1 ([`LocalCache`])**: in-process LRU with per-entry TTL, per-instance
//! - **L2 ([`RemoteCache`])**: shared Redis store, tolerant of connection loss
//! - **[`CacheManager`]**: fetch-through lookups, promotion, dual writes
//! - **[`StatsCollector`]**: per-tier counters and derived hit rates
//!
//! ## Cache Hierarchy
//!
//! ```text
//! get → L1 (LRU) → L2 (Redis) → fetch()
//!         ↓            ↓            ↓
//!     <1µs latency  ~ms latency  source of truth
//! ```
//!
//! ## Graceful Degradation
//!
//! If Redis is unavailable or disabled, the manager runs L1-only and falls
//! back to the fetch function on every L1 miss.

pub mod config;
pub mod error;
pub mod local;
pub mod manager;
pub mod metrics;
pub mod pubsub;
pub mod remote;
pub mod stats;

pub use config::{CacheConfig, MAX_TTL, RemoteConfig, RetryPolicy};
pub use error::{CacheError, Result};
pub use local::{CacheEntry, LocalCache, LocalStats};
pub use manager::{CacheManager, CacheStats, Cacheable, HealthReport};
pub use pubsub::{Invalidation, InvalidationListener, InvalidationMessage};
pub use remote::{
    MemoryStore, RedisStore, RemoteCache, RemoteHealth, RemoteStats, RemoteStore, StoreInfo,
    escape_glob,
};
pub use stats::{StatsCollector, StatsSnapshot, StatsSummary, Tier, TierStats};
