//! Cloud derivative service adapter (Revit -> IFC).
//!
//! Flow: upload the model as a bucket object, start a translation job
//! for the object's URN, poll the URN's manifest until the derivative is
//! ready, then download the derivative into the job's output directory.

use std::time::Duration;

use async_trait::async_trait;
use bimbridge_core::formats::{output_file_name, BackendKind};
use bimbridge_core::job::JobStatus;
use bimbridge_pipeline::poll::{PollOutcome, PollPolicy};
use bimbridge_pipeline::{AdapterError, ConversionAdapter, ConversionContext, JobHandle};
use serde::Deserialize;

use crate::http::{download_to, parse_json, request_error};

/// Connection settings for the derivative service.
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// API base URL, without a trailing slash.
    pub base_url: String,
    pub access_token: String,
    pub bucket: String,
    pub request_timeout: Duration,
    pub poll: PollPolicy,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadedObject {
    object_id: String,
}

#[derive(Debug, Deserialize)]
struct TranslationAccepted {
    result: String,
}

/// Subset of the manifest document the adapter relies on.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub status: String,
    /// Free-form, e.g. `"42% complete"` or `"complete"`.
    #[serde(default)]
    pub progress: String,
    #[serde(default)]
    pub derivatives: Vec<Derivative>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Derivative {
    pub output_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub children: Vec<DerivativeFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DerivativeFile {
    pub urn: String,
    #[serde(default)]
    pub role: String,
}

impl Manifest {
    /// URN of the downloadable file for `output_type`, if present.
    pub fn derivative_urn(&self, output_type: &str) -> Option<&str> {
        self.derivatives
            .iter()
            .filter(|d| d.output_type.eq_ignore_ascii_case(output_type))
            .flat_map(|d| d.children.iter())
            .map(|child| child.urn.as_str())
            .next()
    }
}

/// Parse the manifest's progress string into a percentage.
pub fn parse_manifest_progress(progress: &str) -> Option<u8> {
    let progress = progress.trim();
    if progress.eq_ignore_ascii_case("complete") {
        return Some(100);
    }
    let (number, _) = progress.split_once('%')?;
    number.trim().parse::<u8>().ok().map(|p| p.min(100))
}

pub struct CloudAdapter {
    client: reqwest::Client,
    config: CloudConfig,
}

impl CloudAdapter {
    pub fn new(config: CloudConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn upload(&self, object_name: &str, ctx: &ConversionContext) -> Result<String, AdapterError> {
        let response = self
            .client
            .put(self.url(&format!(
                "/buckets/{}/objects/{}",
                self.config.bucket, object_name
            )))
            .bearer_auth(&self.config.access_token)
            .timeout(self.config.request_timeout)
            .body(ctx.payload.clone())
            .send()
            .await
            .map_err(request_error)?;

        let object: UploadedObject = parse_json(response).await?;
        Ok(object.object_id)
    }

    async fn start_translation(&self, urn: &str, output_type: &str) -> Result<(), AdapterError> {
        let body = serde_json::json!({
            "input": { "urn": urn },
            "output": { "formats": [{ "type": output_type }] },
        });
        let response = self
            .client
            .post(self.url("/designdata/job"))
            .bearer_auth(&self.config.access_token)
            .timeout(self.config.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        let accepted: TranslationAccepted = parse_json(response).await?;
        tracing::debug!(urn, result = %accepted.result, "Translation job accepted");
        Ok(())
    }

    async fn fetch_manifest(&self, urn: &str) -> Result<Manifest, AdapterError> {
        let response = self
            .client
            .get(self.url(&format!("/designdata/{urn}/manifest")))
            .bearer_auth(&self.config.access_token)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(request_error)?;
        parse_json(response).await
    }

    /// One poll step: ready on success, progress report while running.
    async fn check_manifest(&self, urn: &str, handle: &JobHandle) -> Result<PollOutcome<Manifest>, AdapterError> {
        let manifest = self.fetch_manifest(urn).await?;
        match manifest.status.to_ascii_lowercase().as_str() {
            "success" => Ok(PollOutcome::Ready(manifest)),
            "failed" => Err(AdapterError::Backend("Cloud translation failed".into())),
            "timeout" => Err(AdapterError::Timeout("cloud translation timed out".into())),
            _ => {
                let pct = parse_manifest_progress(&manifest.progress).unwrap_or(0);
                let progress = 35 + i64::from(pct) * 55 / 100;
                if let Err(e) = handle.update(
                    progress,
                    JobStatus::Processing,
                    format!("Translating model ({pct}%)"),
                ) {
                    tracing::debug!(error = %e, "Progress update rejected");
                }
                Ok(PollOutcome::Pending)
            }
        }
    }
}

#[async_trait]
impl ConversionAdapter for CloudAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Cloud
    }

    async fn start(&self, ctx: ConversionContext) -> Result<(), AdapterError> {
        let handle = &ctx.handle;
        let output_type = ctx.target_format.extension();
        let object_name = format!("{}-{}", ctx.job_id, ctx.file_name);

        handle.update(10, JobStatus::Uploading, "Uploading model to cloud storage").ok();
        let urn = self.upload(&object_name, &ctx).await?;
        handle.set_backend_ref(urn.clone()).ok();
        handle.update(30, JobStatus::Uploading, "Model uploaded").ok();

        self.start_translation(&urn, output_type).await?;
        handle.update(35, JobStatus::Processing, "Translation started").ok();

        let manifest = self
            .config
            .poll
            .poll_until(handle, &ctx.shutdown, |_| self.check_manifest(&urn, handle))
            .await?;

        let derivative = manifest.derivative_urn(output_type).ok_or_else(|| {
            AdapterError::Protocol(format!("manifest has no {output_type} derivative"))
        })?;

        handle.update(92, JobStatus::Downloading, "Downloading converted model").ok();
        let response = self
            .client
            .get(self.url(&format!("/designdata/{urn}/manifest/{derivative}")))
            .bearer_auth(&self.config.access_token)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(request_error)?;

        let file_name = output_file_name(&ctx.file_name, ctx.target_format);
        let file_size = download_to(response, &ctx.output_dir.join(&file_name)).await?;

        tracing::info!(job_id = %ctx.job_id, urn = %urn, file_size, "Cloud conversion finished");
        handle.complete(file_name, file_size).ok();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_progress_strings() {
        assert_eq!(parse_manifest_progress("42% complete"), Some(42));
        assert_eq!(parse_manifest_progress(" 0%"), Some(0));
        assert_eq!(parse_manifest_progress("complete"), Some(100));
        assert_eq!(parse_manifest_progress("unknown"), None);
    }

    #[test]
    fn derivative_urn_matches_output_type() {
        let manifest: Manifest = serde_json::from_value(serde_json::json!({
            "status": "success",
            "progress": "complete",
            "derivatives": [
                { "outputType": "svf", "children": [{ "urn": "svf-1" }] },
                { "outputType": "IFC", "status": "success",
                  "children": [{ "urn": "ifc-1", "role": "ifc" }] }
            ]
        }))
        .unwrap();

        assert_eq!(manifest.derivative_urn("ifc"), Some("ifc-1"));
        assert_eq!(manifest.derivative_urn("obj"), None);
    }
}
