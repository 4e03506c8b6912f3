//! HTTP surface for a single explicitly constructed two-tier cache: liveness,
//! readiness, Prometheus metrics, statistics and invalidation.

pub mod config;
pub mod handlers;
pub mod observability;
pub mod server;

pub use config::AppConfig;
pub use server::{AppState, JsonCache, ServerBuilder, TiercacheServer, build_app};
