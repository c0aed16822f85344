//! Conversion backend adapters.
//!
//! One [`ConversionAdapter`](bimbridge_pipeline::ConversionAdapter) per
//! technology:
//!
//! - [`cloud`]: cloud derivative service (upload, translate, poll, fetch).
//! - [`bridge`]: local bridge process (multipart submit, poll, fetch).
//! - [`plugin`]: out-of-process native plugin over WebSocket.

pub mod bridge;
pub mod cloud;
mod http;
pub mod plugin;
pub mod status;

pub use bridge::{BridgeAdapter, BridgeConfig};
pub use cloud::{CloudAdapter, CloudConfig};
pub use plugin::{PluginAdapter, PluginConfig};
