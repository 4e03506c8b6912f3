//! Passive hit/miss accounting for the cache manager.
//!
//! Counters are plain atomics so statistics are available whether or not a
//! metrics recorder is installed; every update is mirrored to the `metrics`
//! facade as well. Derived rates are computed on read and never stored.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::metrics;

/// Cache tier designation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Tier {
    /// In-process LRU
    L1,
    /// Shared remote store
    L2,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::L1 => "L1",
            Tier::L2 => "L2",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    errors: AtomicU64,
}

impl TierCounters {
    fn snapshot(&self) -> TierStats {
        TierStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Per-tier counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub errors: u64,
}

impl TierStats {
    /// `hits / (hits + misses)`, or 0 when the tier was never queried.
    pub fn hit_rate(&self) -> f64 {
        ratio(self.hits, self.hits + self.misses)
    }
}

/// Full counter snapshot across both tiers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    pub l1: TierStats,
    pub l2: TierStats,
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub fetches: u64,
    pub fetch_errors: u64,
    #[serde(skip)]
    pub total_response_time: Duration,
}

impl StatsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        ratio(self.cache_hits, self.total_requests)
    }

    pub fn avg_response_time_ms(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_response_time.as_secs_f64() * 1000.0 / self.total_requests as f64
        }
    }
}

/// Human-readable summary served to operators.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub hit_rate: f64,
    pub avg_response_time_ms: f64,
    pub local_cache_size: usize,
    pub remote_connected: bool,
}

/// Counts lookups at every tier boundary.
#[derive(Default)]
pub struct StatsCollector {
    l1: TierCounters,
    l2: TierCounters,
    requests: AtomicU64,
    request_hits: AtomicU64,
    request_nanos: AtomicU64,
    fetches: AtomicU64,
    fetch_errors: AtomicU64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn tier(&self, tier: Tier) -> &TierCounters {
        match tier {
            Tier::L1 => &self.l1,
            Tier::L2 => &self.l2,
        }
    }

    pub fn record_hit(&self, tier: Tier) {
        self.tier(tier).hits.fetch_add(1, Ordering::Relaxed);
        metrics::record_hit(tier.as_str());
    }

    pub fn record_miss(&self, tier: Tier) {
        self.tier(tier).misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_miss(tier.as_str());
    }

    pub fn record_set(&self, tier: Tier) {
        self.tier(tier).sets.fetch_add(1, Ordering::Relaxed);
        metrics::record_set(tier.as_str());
    }

    pub fn record_delete(&self, tier: Tier) {
        self.tier(tier).deletes.fetch_add(1, Ordering::Relaxed);
        metrics::record_delete(tier.as_str());
    }

    pub fn record_evictions(&self, tier: Tier, count: u64) {
        if count == 0 {
            return;
        }
        self.tier(tier).evictions.fetch_add(count, Ordering::Relaxed);
        metrics::record_evictions(tier.as_str(), count);
    }

    /// Count a failed tier operation.
    ///
    /// The Prometheus counter is emitted where the failure is reported
    /// ([`crate::RemoteCache::report`]), not here.
    pub fn record_error(&self, tier: Tier) {
        self.tier(tier).errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one completed `get` and whether a tier served it.
    pub fn record_request(&self, elapsed: Duration, served_from_cache: bool) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if served_from_cache {
            self.request_hits.fetch_add(1, Ordering::Relaxed);
        }
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.request_nanos.fetch_add(nanos, Ordering::Relaxed);
        metrics::record_request_duration(elapsed);
    }

    pub fn record_fetch(&self, outcome: FetchOutcome) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        if outcome == FetchOutcome::Error {
            self.fetch_errors.fetch_add(1, Ordering::Relaxed);
        }
        metrics::record_fetch(outcome.as_str());
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let total_requests = self.requests.load(Ordering::Relaxed);
        let cache_hits = self.request_hits.load(Ordering::Relaxed);
        StatsSnapshot {
            l1: self.l1.snapshot(),
            l2: self.l2.snapshot(),
            total_requests,
            cache_hits,
            cache_misses: total_requests.saturating_sub(cache_hits),
            fetches: self.fetches.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            total_response_time: Duration::from_nanos(self.request_nanos.load(Ordering::Relaxed)),
        }
    }

    pub fn summary(&self, local_cache_size: usize, remote_connected: bool) -> StatsSummary {
        let snapshot = self.snapshot();
        StatsSummary {
            total_requests: snapshot.total_requests,
            cache_hits: snapshot.cache_hits,
            cache_misses: snapshot.cache_misses,
            hit_rate: snapshot.hit_rate(),
            avg_response_time_ms: snapshot.avg_response_time_ms(),
            local_cache_size,
            remote_connected,
        }
    }
}

/// Result of invoking a caller's fetch function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Value,
    Empty,
    Error,
}

impl FetchOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            FetchOutcome::Value => "value",
            FetchOutcome::Empty => "empty",
            FetchOutcome::Error => "error",
        }
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
