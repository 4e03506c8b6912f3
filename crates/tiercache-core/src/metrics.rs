//! Prometheus metrics for the cache tiers.
//!
//! This module provides:
//! - Per-tier counters (hits, misses, sets, deletes, evictions, errors)
//! - Fetch-through outcomes and request latency
//! - Gauges for L1 size and remote connection status
//!
//! The recorder is pull-based: the owner of the process serves
//! `render_metrics()` on its own `/metrics` route.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_SETS_TOTAL: &str = "cache_sets_total";
    pub const CACHE_DELETES_TOTAL: &str = "cache_deletes_total";
    pub const CACHE_EVICTIONS_TOTAL: &str = "cache_evictions_total";
    pub const CACHE_TIER_ERRORS_TOTAL: &str = "cache_tier_errors_total";
    pub const CACHE_FETCH_TOTAL: &str = "cache_fetch_total";
    pub const CACHE_ENTRIES: &str = "cache_entries";
    pub const CACHE_REMOTE_CONNECTED: &str = "cache_remote_connected";
    pub const CACHE_REQUEST_DURATION_SECONDS: &str = "cache_request_duration_seconds";
}

/// Initialize the Prometheus metrics exporter.
///
/// Returns `true` if initialization succeeded, `false` if already initialized
/// or another recorder is installed.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }

            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

pub fn record_hit(tier: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "tier" => tier).increment(1);
}

pub fn record_miss(tier: &'static str) {
    counter!(names::CACHE_MISSES_TOTAL, "tier" => tier).increment(1);
}

pub fn record_set(tier: &'static str) {
    counter!(names::CACHE_SETS_TOTAL, "tier" => tier).increment(1);
}

pub fn record_delete(tier: &'static str) {
    counter!(names::CACHE_DELETES_TOTAL, "tier" => tier).increment(1);
}

pub fn record_evictions(tier: &'static str, count: u64) {
    counter!(names::CACHE_EVICTIONS_TOTAL, "tier" => tier).increment(count);
}

/// Record a failed (and swallowed) tier operation.
pub fn record_tier_error(tier: &'static str, op: &'static str) {
    counter!(names::CACHE_TIER_ERRORS_TOTAL, "tier" => tier, "op" => op).increment(1);
}

/// Record a fetch-through outcome: `value`, `empty` or `error`.
pub fn record_fetch(outcome: &'static str) {
    counter!(names::CACHE_FETCH_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_request_duration(duration: Duration) {
    histogram!(names::CACHE_REQUEST_DURATION_SECONDS).record(duration.as_secs_f64());
}

pub fn set_entries(tier: &'static str, count: usize) {
    gauge!(names::CACHE_ENTRIES, "tier" => tier).set(count as f64);
}

pub fn set_remote_connected(connected: bool) {
    gauge!(names::CACHE_REMOTE_CONNECTED).set(if connected { 1.0 } else { 0.0 });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        // No recorder installed in this test binary: these must not panic.
        record_hit("L1");
        record_miss("L2");
        record_tier_error("L2", "set");
        set_entries("L1", 3);
        set_remote_connected(false);
    }
}
