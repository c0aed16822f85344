//! Request validation, backend dispatch and adapter supervision.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bimbridge_core::error::CoreError;
use bimbridge_core::formats::{detect_source_format, dispatch, BackendKind, FileFormat};
use bimbridge_core::sanitize::sanitize_file_name;
use bimbridge_core::types::JobId;
use bytes::Bytes;
use futures::FutureExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::adapter::{AdapterError, ConversionAdapter, ConversionContext, JobHandle};
use crate::registry::JobRegistry;
use crate::storage::JobStorage;

/// Public failure text for an adapter that returned without finishing.
pub const NO_RESULT_MESSAGE: &str = "Conversion ended without a result";

/// Public failure text for an adapter that panicked.
pub const UNEXPECTED_FAILURE_MESSAGE: &str = "Conversion failed unexpectedly";

/// A conversion request as accepted from the transport.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub file_name: String,
    pub payload: Bytes,
    /// Declared target format; the source's default target when absent.
    pub target_format: Option<String>,
}

/// Returned to the caller as soon as the job exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub job_id: JobId,
    pub message: String,
    pub channel_endpoint: String,
}

/// Real-time channel URL with the implicit subscription pre-filled.
pub fn channel_endpoint(job_id: &str) -> String {
    format!("/api/v1/ws?jobId={job_id}")
}

pub struct JobOrchestrator {
    registry: Arc<JobRegistry>,
    storage: JobStorage,
    adapters: HashMap<BackendKind, Arc<dyn ConversionAdapter>>,
    max_upload_bytes: u64,
    shutdown: CancellationToken,
}

impl JobOrchestrator {
    pub fn new(
        registry: Arc<JobRegistry>,
        storage: JobStorage,
        adapters: Vec<Arc<dyn ConversionAdapter>>,
        max_upload_bytes: u64,
        shutdown: CancellationToken,
    ) -> Self {
        let adapters = adapters
            .into_iter()
            .map(|adapter| (adapter.kind(), adapter))
            .collect();
        Self {
            registry,
            storage,
            adapters,
            max_upload_bytes,
            shutdown,
        }
    }

    /// Backends with an adapter registered, in a stable order.
    pub fn configured_backends(&self) -> Vec<BackendKind> {
        let mut kinds: Vec<BackendKind> = self.adapters.keys().copied().collect();
        kinds.sort_by_key(|kind| kind.as_str());
        kinds
    }

    /// Validate, dispatch, create the job and start its adapter.
    ///
    /// Every rejection happens before a job id exists. The adapter runs in
    /// its own task; this returns without waiting for any conversion step.
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitReceipt, CoreError> {
        let file_name = sanitize_file_name(&request.file_name)
            .ok_or_else(|| CoreError::Validation("A file name is required".into()))?;
        self.check_payload(&request.payload)?;

        let source = detect_source_format(&file_name)?;
        let target = match request
            .target_format
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            Some(raw) => FileFormat::parse(raw).ok_or_else(|| {
                CoreError::Validation(format!("Unknown target format '{raw}'"))
            })?,
            None => source.default_target(),
        };

        let backend = dispatch(source, target)?;
        let adapter = self.adapters.get(&backend).cloned().ok_or_else(|| {
            CoreError::Dispatch(format!("the {backend} backend is not configured"))
        })?;

        let job = self.registry.create(&file_name, source, target, backend);

        let input_path = match self
            .storage
            .stage_input(&job.id, &file_name, &request.payload)
            .await
        {
            Ok(path) => path,
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to stage upload");
                let _ = self.registry.fail(&job.id, "Failed to store the uploaded file");
                return Err(CoreError::Internal("Failed to store the uploaded file".into()));
            }
        };

        let ctx = ConversionContext {
            job_id: job.id.clone(),
            file_name: file_name.clone(),
            source_format: source,
            target_format: target,
            payload: request.payload,
            input_path,
            output_dir: self.storage.output_dir(&job.id),
            handle: JobHandle::new(job.id.clone(), Arc::clone(&self.registry)),
            shutdown: self.shutdown.child_token(),
        };
        self.spawn_adapter(adapter, ctx);

        Ok(SubmitReceipt {
            channel_endpoint: channel_endpoint(&job.id),
            message: format!("Conversion of {file_name} to .{target} started"),
            job_id: job.id,
        })
    }

    fn check_payload(&self, payload: &[u8]) -> Result<(), CoreError> {
        if payload.is_empty() {
            return Err(CoreError::Validation("Uploaded file is empty".into()));
        }
        if payload.len() as u64 > self.max_upload_bytes {
            return Err(CoreError::Validation(format!(
                "Uploaded file exceeds the {} MB limit",
                self.max_upload_bytes / (1024 * 1024)
            )));
        }
        Ok(())
    }

    /// Run the adapter and guarantee the job ends in a terminal state.
    fn spawn_adapter(&self, adapter: Arc<dyn ConversionAdapter>, ctx: ConversionContext) {
        let registry = Arc::clone(&self.registry);
        let job_id = ctx.job_id.clone();
        let backend = adapter.kind();

        tokio::spawn(async move {
            tracing::debug!(job_id = %job_id, backend = %backend, "Adapter started");
            // `start` itself may panic before handing back its future.
            let outcome = AssertUnwindSafe(async move { adapter.start(ctx).await })
                .catch_unwind()
                .await;

            let failure = match outcome {
                Ok(Ok(())) => {
                    let unfinished = registry
                        .get(&job_id)
                        .is_some_and(|job| !job.is_terminal());
                    if unfinished {
                        tracing::error!(
                            job_id = %job_id,
                            backend = %backend,
                            "Adapter returned without completing the job",
                        );
                        Some(NO_RESULT_MESSAGE.to_string())
                    } else {
                        None
                    }
                }
                Ok(Err(AdapterError::Cancelled)) => {
                    tracing::info!(job_id = %job_id, backend = %backend, "Adapter stopped on cancellation");
                    let _ = registry.cancel(&job_id);
                    None
                }
                Ok(Err(e)) => {
                    tracing::error!(job_id = %job_id, backend = %backend, error = %e, "Conversion failed");
                    Some(e.public_message())
                }
                Err(panic) => {
                    tracing::error!(
                        job_id = %job_id,
                        backend = %backend,
                        panic = %panic_text(panic.as_ref()),
                        "Adapter panicked",
                    );
                    Some(UNEXPECTED_FAILURE_MESSAGE.to_string())
                }
            };

            if let Some(message) = failure {
                // Unknown here means the job was already evicted.
                let _ = registry.fail(&job_id, &message);
            }
        });
    }
}

fn panic_text(panic: &(dyn Any + Send)) -> &str {
    if let Some(text) = panic.downcast_ref::<&str>() {
        text
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.as_str()
    } else {
        "non-string panic payload"
    }
}
