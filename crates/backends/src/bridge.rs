//! Local bridge adapter (Archicad <-> IFC).
//!
//! The bridge is a separate process that relays conversions to a desktop
//! plugin. It accepts a multipart upload, tracks the conversion under its
//! own job id, and serves the artifact once done.

use std::time::Duration;

use async_trait::async_trait;
use bimbridge_core::formats::{output_file_name, BackendKind, FileFormat};
use bimbridge_core::job::JobStatus;
use bimbridge_pipeline::poll::{PollOutcome, PollPolicy};
use bimbridge_pipeline::{AdapterError, ConversionAdapter, ConversionContext, JobHandle};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::http::{download_to, ensure_success, parse_json, request_error};
use crate::status::{map_backend_status, progress_status};

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub poll: PollPolicy,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Accepted {
    job_id: String,
    #[serde(default)]
    message: Option<String>,
}

/// Job record as served by `GET /jobs/{id}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeJob {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Bridge route for a conversion pair.
pub fn bridge_route(source: FileFormat, target: FileFormat) -> Option<&'static str> {
    match (source, target) {
        (FileFormat::Pln, FileFormat::Ifc) => Some("archicad-to-ifc"),
        (FileFormat::Ifc, FileFormat::Pln) => Some("ifc-to-archicad"),
        _ => None,
    }
}

pub struct BridgeAdapter {
    client: reqwest::Client,
    config: BridgeConfig,
}

impl BridgeAdapter {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn submit(&self, route: &str, ctx: &ConversionContext) -> Result<Accepted, AdapterError> {
        let part = Part::bytes(ctx.payload.to_vec()).file_name(ctx.file_name.clone());
        let form = Form::new()
            .part("file", part)
            .text("jobId", ctx.job_id.clone());

        let response = self
            .client
            .post(self.url(&format!("/convert/{route}")))
            .timeout(self.config.request_timeout)
            .multipart(form)
            .send()
            .await
            .map_err(request_error)?;
        parse_json(response).await
    }

    async fn check_job(&self, bridge_id: &str, handle: &JobHandle) -> Result<PollOutcome<()>, AdapterError> {
        let response = self
            .client
            .get(self.url(&format!("/jobs/{bridge_id}")))
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(request_error)?;
        let job: BridgeJob = parse_json(response).await?;

        match map_backend_status(job.status.as_deref()) {
            JobStatus::Completed => Ok(PollOutcome::Ready(())),
            JobStatus::Error => Err(AdapterError::Backend(
                job.error
                    .or(job.message)
                    .unwrap_or_else(|| "Bridge conversion failed".to_string()),
            )),
            JobStatus::Cancelled => Err(AdapterError::Cancelled),
            _ => {
                let progress = job.progress.unwrap_or(20.0).clamp(20.0, 90.0) as i64;
                let status = progress_status(job.status.as_deref());
                let message = job
                    .message
                    .unwrap_or_else(|| "Converting on bridge".to_string());
                if let Err(e) = handle.update(progress, status, message) {
                    tracing::debug!(error = %e, "Progress update rejected");
                }
                Ok(PollOutcome::Pending)
            }
        }
    }

    /// Best-effort removal of the bridge's copy of the job.
    async fn discard(&self, bridge_id: &str) {
        let result = self
            .client
            .delete(self.url(&format!("/jobs/{bridge_id}")))
            .timeout(self.config.request_timeout)
            .send()
            .await;
        match result {
            Ok(response) => {
                if let Err(e) = ensure_success(response).await {
                    tracing::debug!(bridge_id, error = %e, "Bridge refused job removal");
                }
            }
            Err(e) => tracing::debug!(bridge_id, error = %e, "Bridge job removal failed"),
        }
    }
}

#[async_trait]
impl ConversionAdapter for BridgeAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Bridge
    }

    async fn start(&self, ctx: ConversionContext) -> Result<(), AdapterError> {
        let handle = &ctx.handle;
        let route = bridge_route(ctx.source_format, ctx.target_format).ok_or_else(|| {
            AdapterError::Rejected(format!(
                "bridge cannot convert .{} to .{}",
                ctx.source_format, ctx.target_format
            ))
        })?;

        handle.update(10, JobStatus::Uploading, "Sending model to bridge").ok();
        let accepted = self.submit(route, &ctx).await?;
        let bridge_id = accepted.job_id;
        handle.set_backend_ref(bridge_id.clone()).ok();
        handle
            .update(
                20,
                JobStatus::Processing,
                accepted
                    .message
                    .unwrap_or_else(|| "Conversion dispatched to bridge".to_string()),
            )
            .ok();

        let polled = self
            .config
            .poll
            .poll_until(handle, &ctx.shutdown, |_| self.check_job(&bridge_id, handle))
            .await;
        if let Err(AdapterError::Cancelled) = polled {
            self.discard(&bridge_id).await;
        }
        polled?;

        handle.update(92, JobStatus::Downloading, "Downloading converted model").ok();
        let response = self
            .client
            .get(self.url(&format!("/jobs/{bridge_id}/download")))
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(request_error)?;
        let file_name = output_file_name(&ctx.file_name, ctx.target_format);
        let file_size = download_to(response, &ctx.output_dir.join(&file_name)).await?;

        tracing::info!(job_id = %ctx.job_id, bridge_id = %bridge_id, file_size, "Bridge conversion finished");
        handle.complete(file_name, file_size).ok();
        Ok(())
    }
}
