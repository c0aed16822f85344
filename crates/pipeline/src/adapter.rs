//! Backend adapter contract.
//!
//! An adapter receives a [`ConversionContext`], reports progress through
//! its [`JobHandle`] zero or more times, and resolves exactly once. The
//! orchestrator turns an `Err` (or a panic) into the job's single terminal
//! ERROR event; adapters never talk to subscribers directly.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bimbridge_core::error::CoreError;
use bimbridge_core::formats::{BackendKind, FileFormat};
use bimbridge_core::job::{ConversionResult, JobStatus, UpdateOutcome};
use bimbridge_core::sanitize::sanitize_message;
use bimbridge_core::types::JobId;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::registry::JobRegistry;

/// A conversion technology the orchestrator can dispatch to.
#[async_trait]
pub trait ConversionAdapter: Send + Sync {
    /// The dispatch key this adapter serves.
    fn kind(&self) -> BackendKind;

    /// Run one conversion to completion.
    ///
    /// Returning `Ok(())` without having completed or failed the job is a
    /// contract violation; the orchestrator fails such jobs.
    async fn start(&self, ctx: ConversionContext) -> Result<(), AdapterError>;
}

/// Everything an adapter needs for one job.
pub struct ConversionContext {
    pub job_id: JobId,
    pub file_name: String,
    pub source_format: FileFormat,
    pub target_format: FileFormat,
    pub payload: Bytes,
    /// Where the accepted upload was staged.
    pub input_path: PathBuf,
    /// Directory the artifact must be written into.
    pub output_dir: PathBuf,
    pub handle: JobHandle,
    /// Cancelled when the service shuts down.
    pub shutdown: CancellationToken,
}

/// Narrow view of the registry scoped to one job.
#[derive(Clone)]
pub struct JobHandle {
    job_id: JobId,
    registry: Arc<JobRegistry>,
}

impl JobHandle {
    pub fn new(job_id: JobId, registry: Arc<JobRegistry>) -> Self {
        Self { job_id, registry }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn update(
        &self,
        progress: i64,
        status: JobStatus,
        message: impl Into<String>,
    ) -> Result<UpdateOutcome, CoreError> {
        self.registry.update(&self.job_id, progress, status, message, None)
    }

    pub fn update_with_details(
        &self,
        progress: i64,
        status: JobStatus,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Result<UpdateOutcome, CoreError> {
        self.registry
            .update(&self.job_id, progress, status, message, Some(details))
    }

    /// Complete the job with an artifact stored under the job's output
    /// directory.
    pub fn complete(&self, file_name: impl Into<String>, file_size: u64) -> Result<UpdateOutcome, CoreError> {
        let result = ConversionResult {
            download_url: download_url(&self.job_id),
            file_name: file_name.into(),
            file_size,
        };
        self.registry.complete(&self.job_id, result)
    }

    pub fn fail(&self, error: &str) -> Result<UpdateOutcome, CoreError> {
        self.registry.fail(&self.job_id, error)
    }

    pub fn set_backend_ref(&self, backend_ref: impl Into<String>) -> Result<(), CoreError> {
        self.registry.set_backend_ref(&self.job_id, backend_ref)
    }

    pub fn is_cancelled(&self) -> bool {
        self.registry.is_cancelled(&self.job_id)
    }
}

/// Path under which a completed job's artifact is served.
pub fn download_url(job_id: &str) -> String {
    format!("/api/v1/jobs/{job_id}/download")
}

/// Failures an adapter can report.
///
/// `Display` carries full detail for logs; only
/// [`public_message`](AdapterError::public_message) reaches subscribers.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend rejected the request: {0}")]
    Rejected(String),

    /// The backend ran the conversion and reported failure.
    #[error("Backend reported failure: {0}")]
    Backend(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Conversion cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl AdapterError {
    /// Text safe to broadcast: no URLs, tokens or raw backend bodies.
    pub fn public_message(&self) -> String {
        match self {
            AdapterError::Unavailable(_) => "Conversion backend is unavailable".to_string(),
            AdapterError::Rejected(_) => "Conversion request was rejected by the backend".to_string(),
            AdapterError::Backend(reason) => sanitize_message(reason),
            AdapterError::Timeout(_) => "Conversion timed out".to_string(),
            AdapterError::Cancelled => "Conversion cancelled".to_string(),
            AdapterError::Io(_) => "Failed to read or write conversion files".to_string(),
            AdapterError::Protocol(_) => "Unexpected response from conversion backend".to_string(),
            AdapterError::Http(_) => "Failed to reach conversion backend".to_string(),
        }
    }
}
