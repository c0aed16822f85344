pub mod conversions;
pub mod health;
pub mod jobs;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /ws[?jobId=]                 WebSocket (subscribe / progress)
///
/// /conversions                 upload a model (POST, multipart)
///
/// /jobs                        list active jobs
/// /jobs/{id}                   job snapshot
/// /jobs/{id}/cancel            cancel (POST)
/// /jobs/{id}/download          converted artifact
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .nest("/conversions", conversions::router())
        .nest("/jobs", jobs::router())
}
