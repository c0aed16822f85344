use axum::routing::post;
use axum::Router;

use crate::handlers::conversions;
use crate::state::AppState;

/// Routes mounted at `/conversions`.
///
/// ```text
/// POST   /                -> submit_conversion
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/", post(conversions::submit_conversion))
}
