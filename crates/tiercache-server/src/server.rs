use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use serde_json::Value;
use tiercache_core::CacheManager;
use tower_http::trace::TraceLayer;

use crate::{config::AppConfig, handlers};

/// The cache served over HTTP; values are arbitrary JSON documents.
pub type JsonCache = CacheManager<Value>;

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<JsonCache>,
    /// Whether the remote tier is expected to be reachable
    pub remote_enabled: bool,
}

impl AppState {
    pub fn new(cache: Arc<JsonCache>, remote_enabled: bool) -> Self {
        Self {
            cache,
            remote_enabled,
        }
    }

    /// Build the cache described by `cfg`, connecting to Redis when enabled.
    pub async fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let cache = JsonCache::from_config(&cfg.cache).await?;
        Ok(Self::new(Arc::new(cache), cfg.cache.remote.enabled))
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/metrics", get(handlers::metrics))
        .route("/stats", get(handlers::stats))
        .route("/cache/invalidate", post(handlers::invalidate))
        .route(
            "/cache/invalidate-pattern",
            post(handlers::invalidate_pattern),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .with_state(state)
}

pub struct ServerBuilder {
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    pub async fn build(self) -> anyhow::Result<TiercacheServer> {
        let state = AppState::from_config(&self.config).await?;
        Ok(TiercacheServer {
            addr: self.config.addr(),
            config: self.config,
            state,
        })
    }
}

pub struct TiercacheServer {
    addr: SocketAddr,
    config: AppConfig,
    state: AppState,
}

impl TiercacheServer {
    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let cache = Arc::clone(&self.state.cache);
        let maintenance = cache.spawn_maintenance(self.config.maintenance_interval());

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        let served = axum::serve(listener, build_app(self.state))
            .with_graceful_shutdown(shutdown_signal())
            .await;

        maintenance.abort();
        cache.shutdown().await;
        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
