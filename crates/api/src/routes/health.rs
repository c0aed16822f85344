use axum::extract::State;
use axum::{routing::get, Json, Router};
use bimbridge_core::formats::BackendKind;
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Jobs that have not reached a terminal state.
    pub active_jobs: usize,
    pub ws_connections: usize,
    /// Backends with a configured adapter.
    pub backends: Vec<BackendKind>,
    /// Largest accepted upload.
    pub max_upload_mb: u64,
}

/// GET /health -- service health and load.
///
/// Reports `degraded` when no conversion backend is configured.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let backends = state.service.configured_backends();
    let status = if backends.is_empty() { "degraded" } else { "ok" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        active_jobs: state.service.active_count(),
        ws_connections: state.ws_manager.connection_count().await,
        backends,
        max_upload_mb: state.config.max_upload_mb,
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
