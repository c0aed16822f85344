//! The conversion service object.
//!
//! [`ConversionService`] owns the registry, broadcaster, adapter table,
//! staging storage and timing configuration. It is constructed explicitly
//! and injected into the transport layer; independent instances share
//! nothing.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bimbridge_core::error::CoreError;
use bimbridge_core::formats::BackendKind;
use bimbridge_core::job::{ConversionResult, Job, JobStatus};
use bimbridge_core::types::JobId;
use bimbridge_events::{ProgressBroadcaster, SubscriberChannel};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::adapter::ConversionAdapter;
use crate::orchestrator::{JobOrchestrator, SubmitReceipt, SubmitRequest};
use crate::registry::JobRegistry;
use crate::storage::JobStorage;
use crate::sweeper::Sweeper;

/// Timing and size limits.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Jobs older than this are evicted regardless of status.
    pub job_ttl: Duration,
    /// Delay between a terminal transition and eviction.
    pub grace_period: Duration,
    pub sweep_interval: Duration,
    pub max_upload_bytes: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            job_ttl: Duration::from_secs(180 * 60),
            grace_period: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
            max_upload_bytes: 500 * 1024 * 1024,
        }
    }
}

pub struct ConversionService {
    registry: Arc<JobRegistry>,
    broadcaster: Arc<ProgressBroadcaster>,
    orchestrator: JobOrchestrator,
    sweeper: Arc<Sweeper>,
    storage: JobStorage,
    terminal_rx: Mutex<Option<mpsc::UnboundedReceiver<JobId>>>,
    shutdown: CancellationToken,
}

impl ConversionService {
    pub fn new(
        config: PipelineConfig,
        storage: JobStorage,
        adapters: Vec<Arc<dyn ConversionAdapter>>,
    ) -> Self {
        let broadcaster = Arc::new(ProgressBroadcaster::new());
        let (registry, terminal_rx) = JobRegistry::new(Arc::clone(&broadcaster));
        let registry = Arc::new(registry);
        let shutdown = CancellationToken::new();

        let orchestrator = JobOrchestrator::new(
            Arc::clone(&registry),
            storage.clone(),
            adapters,
            config.max_upload_bytes,
            shutdown.clone(),
        );
        let sweeper = Arc::new(Sweeper::new(
            Arc::clone(&registry),
            Arc::clone(&broadcaster),
            storage.clone(),
            config.job_ttl,
            config.grace_period,
            config.sweep_interval,
        ));

        Self {
            registry,
            broadcaster,
            orchestrator,
            sweeper,
            storage,
            terminal_rx: Mutex::new(Some(terminal_rx)),
            shutdown,
        }
    }

    /// Spawn the sweeper loop. Returns `None` if it was already started.
    pub fn start_sweeper(&self) -> Option<JoinHandle<()>> {
        let terminal_rx = self.terminal_rx.lock().ok()?.take()?;
        let sweeper = Arc::clone(&self.sweeper);
        let cancel = self.shutdown.clone();
        Some(tokio::spawn(sweeper.run(terminal_rx, cancel)))
    }

    /// Stop the sweeper, pending evictions and adapter polling loops.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitReceipt, CoreError> {
        self.orchestrator.submit(request).await
    }

    /// Current snapshot; `JobNotFound` once evicted.
    pub fn status(&self, job_id: &str) -> Result<Job, CoreError> {
        self.registry
            .get(job_id)
            .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))
    }

    /// Request cancellation. `false` when the job is terminal or unknown.
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.registry.cancel(job_id) {
            Ok(cancelled) => cancelled,
            Err(CoreError::JobNotFound(_)) => false,
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Cancel failed");
                false
            }
        }
    }

    /// Attach a connection's channel to a job and replay its snapshot.
    pub fn subscribe(
        &self,
        job_id: &str,
        connection_id: &str,
        channel: SubscriberChannel,
    ) -> Result<(), CoreError> {
        self.registry.subscribe(job_id, connection_id, channel)
    }

    /// Attach with a leading `subscribed` frame, sent only if the job exists.
    pub fn subscribe_acknowledged(
        &self,
        job_id: &str,
        connection_id: &str,
        channel: SubscriberChannel,
    ) -> Result<(), CoreError> {
        self.registry
            .subscribe_acknowledged(job_id, connection_id, channel)
    }

    pub fn unsubscribe(&self, job_id: &str, connection_id: &str) -> bool {
        self.broadcaster.unsubscribe(job_id, connection_id)
    }

    /// Drop every subscription of a closed connection. Jobs keep running.
    pub fn disconnect(&self, connection_id: &str) -> usize {
        self.broadcaster.remove_connection(connection_id)
    }

    pub fn list_active(&self) -> Vec<Job> {
        self.registry.list_active()
    }

    pub fn active_count(&self) -> usize {
        self.registry.active_count()
    }

    pub fn configured_backends(&self) -> Vec<BackendKind> {
        self.orchestrator.configured_backends()
    }

    /// Location and metadata of a completed job's artifact.
    pub fn artifact(&self, job_id: &str) -> Result<(PathBuf, ConversionResult), CoreError> {
        let job = self.status(job_id)?;
        match (job.status, job.result) {
            (JobStatus::Completed, Some(result)) => {
                let path = self.storage.output_path(job_id, &result.file_name);
                Ok((path, result))
            }
            _ => Err(CoreError::ResultUnavailable(job_id.to_string())),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Arc<ProgressBroadcaster> {
        &self.broadcaster
    }

    pub fn sweeper(&self) -> &Arc<Sweeper> {
        &self.sweeper
    }
}
