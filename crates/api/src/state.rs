use std::sync::Arc;

use bimbridge_pipeline::ConversionService;

use crate::config::ServerConfig;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: every field is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Job registry, dispatch and progress fan-out.
    pub service: Arc<ConversionService>,
    /// WebSocket connection manager (browser clients).
    pub ws_manager: Arc<WsManager>,
}
