use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse<'a> {
    status: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct InvalidateKeyRequest {
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct InvalidatePatternRequest {
    pub pattern: String,
}

fn error_body(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message.into() })))
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// Ready when the remote tier is disabled, or connected and answering PING.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.cache.health().await;
    let ready = !state.remote_enabled || (health.remote.connected && health.remote.reachable);
    let (status, label) = if ready {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };
    let body = json!({
        "status": label,
        "remote": health.remote,
        "localSize": health.local_size,
    });
    (status, Json(body))
}

pub async fn metrics() -> impl IntoResponse {
    match tiercache_core::metrics::render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "metrics recorder not initialized".to_string(),
        ),
    }
}

pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    let body = json!({
        "summary": state.cache.summary(),
        "details": state.cache.stats().await,
    });
    (StatusCode::OK, Json(body))
}

pub async fn invalidate(
    State(state): State<AppState>,
    Json(req): Json<InvalidateKeyRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    if req.key.is_empty() {
        return Err(error_body(StatusCode::BAD_REQUEST, "key must not be empty"));
    }
    let removed = state.cache.invalidate(&req.key).await;
    tracing::info!(key = %req.key, removed, "key invalidated");
    Ok((
        StatusCode::OK,
        Json(json!({ "key": req.key, "removed": removed })),
    ))
}

pub async fn invalidate_pattern(
    State(state): State<AppState>,
    Json(req): Json<InvalidatePatternRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    if req.pattern.is_empty() {
        return Err(error_body(
            StatusCode::BAD_REQUEST,
            "pattern must not be empty",
        ));
    }
    let deleted = state.cache.delete_pattern(&req.pattern).await;
    tracing::info!(pattern = %req.pattern, deleted, "pattern invalidated");
    Ok((
        StatusCode::OK,
        Json(json!({ "pattern": req.pattern, "deleted": deleted })),
    ))
}
