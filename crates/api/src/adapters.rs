//! Construction of the configured conversion backends.

use std::sync::Arc;
use std::time::Duration;

use bimbridge_backends::{
    BridgeAdapter, BridgeConfig, CloudAdapter, CloudConfig, PluginAdapter, PluginConfig,
};
use bimbridge_pipeline::poll::PollPolicy;
use bimbridge_pipeline::ConversionAdapter;

use crate::config::BackendSettings;

/// Per-request timeout for backend HTTP calls, large model uploads included.
const BACKEND_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Build one adapter per configured backend.
pub fn build_adapters(settings: &BackendSettings) -> Vec<Arc<dyn ConversionAdapter>> {
    let mut adapters: Vec<Arc<dyn ConversionAdapter>> = Vec::new();

    if let Some(cloud) = &settings.cloud {
        adapters.push(Arc::new(CloudAdapter::new(CloudConfig {
            base_url: cloud.base_url.clone(),
            access_token: cloud.access_token.clone(),
            bucket: cloud.bucket.clone(),
            request_timeout: BACKEND_REQUEST_TIMEOUT,
            poll: PollPolicy::default(),
        })));
    }
    if let Some(url) = &settings.bridge_url {
        adapters.push(Arc::new(BridgeAdapter::new(BridgeConfig {
            base_url: url.clone(),
            request_timeout: BACKEND_REQUEST_TIMEOUT,
            poll: PollPolicy::default(),
        })));
    }
    if let Some(url) = &settings.plugin_ws_url {
        adapters.push(Arc::new(PluginAdapter::new(PluginConfig::new(url.clone()))));
    }

    for adapter in &adapters {
        tracing::info!(backend = %adapter.kind(), "Conversion backend enabled");
    }
    if adapters.is_empty() {
        tracing::warn!("No conversion backends configured; every upload will be rejected");
    }
    adapters
}
