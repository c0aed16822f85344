//! WebSocket infrastructure for real-time job progress.
//!
//! Provides connection management, heartbeat pings, and the HTTP upgrade
//! handler that speaks the subscribe/progress protocol.

mod handler;
mod heartbeat;
pub mod manager;

pub use handler::ws_handler;
pub use heartbeat::start_heartbeat;
pub use manager::WsManager;
