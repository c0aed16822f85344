//! Authoritative in-memory job store.
//!
//! [`JobRegistry`] is the sole mutator of job state. Every change goes
//! through [`JobRegistry::update`] (or one of its wrappers), which applies
//! the lifecycle rules from [`Job::apply`] and then publishes the new
//! snapshot while still holding the job's entry lock. Holding the lock
//! across the publish is what keeps per-channel delivery order equal to
//! mutation order.
//!
//! Lock order is always registry entry, then broadcaster map.

use std::sync::Arc;

use bimbridge_core::error::CoreError;
use bimbridge_core::formats::{BackendKind, FileFormat};
use bimbridge_core::job::{ConversionResult, Job, JobChange, JobStatus, UpdateOutcome};
use bimbridge_core::types::{new_job_id, JobId, Timestamp};
use bimbridge_core::protocol::ServerMessage;
use bimbridge_events::{BroadcastError, ProgressBroadcaster, SubscriberChannel};
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::mpsc;

/// Message used for the cancelled state.
pub const CANCELLED_MESSAGE: &str = "Conversion cancelled";

/// Message used for the completed state.
pub const COMPLETED_MESSAGE: &str = "Conversion completed";

pub struct JobRegistry {
    jobs: DashMap<JobId, Job>,
    broadcaster: Arc<ProgressBroadcaster>,
    /// Notified once per job on its first terminal transition.
    terminal_tx: mpsc::UnboundedSender<JobId>,
}

impl JobRegistry {
    /// Create a registry publishing through `broadcaster`.
    ///
    /// The returned receiver yields the id of every job that reaches a
    /// terminal state; the sweeper consumes it.
    pub fn new(broadcaster: Arc<ProgressBroadcaster>) -> (Self, mpsc::UnboundedReceiver<JobId>) {
        let (terminal_tx, terminal_rx) = mpsc::unbounded_channel();
        let registry = Self {
            jobs: DashMap::new(),
            broadcaster,
            terminal_tx,
        };
        (registry, terminal_rx)
    }

    /// Insert a fresh QUEUED job and return its snapshot.
    pub fn create(
        &self,
        file_name: &str,
        source_format: FileFormat,
        target_format: FileFormat,
        backend: BackendKind,
    ) -> Job {
        let job = Job::new(
            new_job_id(),
            file_name,
            source_format,
            target_format,
            backend,
            Utc::now(),
        );
        self.jobs.insert(job.id.clone(), job.clone());

        tracing::info!(
            job_id = %job.id,
            file_name,
            source = %source_format,
            target = %target_format,
            backend = %backend,
            "Job created",
        );
        job
    }

    /// The single update entry point.
    ///
    /// Progress is clamped to `[0, 100]`. Updates to a terminal job are
    /// ignored and report [`UpdateOutcome::Frozen`].
    pub fn update(
        &self,
        job_id: &str,
        progress: i64,
        status: JobStatus,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> Result<UpdateOutcome, CoreError> {
        self.apply(job_id, JobChange::new(progress, status, message).with_details(details))
    }

    /// Mark a job completed with its artifact.
    pub fn complete(&self, job_id: &str, result: ConversionResult) -> Result<UpdateOutcome, CoreError> {
        self.apply(
            job_id,
            JobChange::new(100, JobStatus::Completed, COMPLETED_MESSAGE).with_result(result),
        )
    }

    /// Mark a job failed. `error` is sanitized before it is stored.
    pub fn fail(&self, job_id: &str, error: &str) -> Result<UpdateOutcome, CoreError> {
        self.apply(job_id, JobChange::new(0, JobStatus::Error, error))
    }

    /// Move a job to CANCELLED. Returns `false` when it was already
    /// terminal. Does not stop the adapter.
    pub fn cancel(&self, job_id: &str) -> Result<bool, CoreError> {
        let outcome = self.apply(job_id, JobChange::new(0, JobStatus::Cancelled, CANCELLED_MESSAGE))?;
        Ok(outcome == UpdateOutcome::Finished)
    }

    /// Record the adapter's correlation token. Ignored once terminal.
    pub fn set_backend_ref(&self, job_id: &str, backend_ref: impl Into<String>) -> Result<(), CoreError> {
        let mut job = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))?;
        if !job.is_terminal() {
            job.backend_ref = Some(backend_ref.into());
        }
        Ok(())
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.jobs.get(job_id).map(|job| job.clone())
    }

    /// Non-terminal jobs, oldest first.
    pub fn list_active(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .filter(|entry| !entry.is_terminal())
            .map(|entry| entry.value().clone())
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    /// Whether adapters should stop working on `job_id`.
    ///
    /// An evicted job counts as cancelled.
    pub fn is_cancelled(&self, job_id: &str) -> bool {
        self.jobs
            .get(job_id)
            .map(|job| job.status == JobStatus::Cancelled)
            .unwrap_or(true)
    }

    /// Register a subscriber and replay the current snapshot to it.
    ///
    /// The snapshot is taken and the channel registered under the job's
    /// read lock, so no update can slip in between.
    pub fn subscribe(
        &self,
        job_id: &str,
        connection_id: &str,
        channel: SubscriberChannel,
    ) -> Result<(), CoreError> {
        self.attach(job_id, connection_id, channel, false)
    }

    /// Like [`subscribe`](Self::subscribe), but first sends a `subscribed`
    /// frame on the channel. Nothing is sent for an unknown job.
    pub fn subscribe_acknowledged(
        &self,
        job_id: &str,
        connection_id: &str,
        channel: SubscriberChannel,
    ) -> Result<(), CoreError> {
        self.attach(job_id, connection_id, channel, true)
    }

    fn attach(
        &self,
        job_id: &str,
        connection_id: &str,
        channel: SubscriberChannel,
        acknowledge: bool,
    ) -> Result<(), CoreError> {
        let job = self
            .jobs
            .get(job_id)
            .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))?;
        let snapshot = job.progress_event(None);

        if acknowledge {
            let ack = ServerMessage::Subscribed {
                job_id: job_id.to_string(),
            };
            channel
                .send(ack)
                .map_err(|_| CoreError::Internal(BroadcastError::SubscriberClosed.to_string()))?;
        }
        self.broadcaster
            .subscribe(job_id, connection_id, channel, Some(snapshot))
            .map_err(|e| CoreError::Internal(e.to_string()))
    }

    /// Remove a job record. Used only by eviction.
    pub fn remove(&self, job_id: &str) -> Option<Job> {
        self.jobs.remove(job_id).map(|(_, job)| job)
    }

    /// `(id, created_at)` pairs for the TTL scan.
    pub fn snapshot_ids(&self) -> Vec<(JobId, Timestamp)> {
        self.jobs
            .iter()
            .map(|entry| (entry.key().clone(), entry.created_at))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.jobs.iter().filter(|entry| !entry.is_terminal()).count()
    }

    fn apply(&self, job_id: &str, change: JobChange) -> Result<UpdateOutcome, CoreError> {
        let Some(mut job) = self.jobs.get_mut(job_id) else {
            tracing::warn!(job_id, status = %change.status, "Update for unknown job");
            return Err(CoreError::JobNotFound(job_id.to_string()));
        };

        let details = change.details.clone();
        let outcome = match job.apply(change, Utc::now()) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Rejected job update");
                return Err(e);
            }
        };

        match outcome {
            UpdateOutcome::Frozen => {
                tracing::debug!(job_id, status = %job.status, "Ignoring update to terminal job");
            }
            UpdateOutcome::Updated => {
                tracing::debug!(
                    job_id,
                    status = %job.status,
                    progress = job.progress,
                    "Job updated",
                );
                self.broadcaster.publish(job_id, &job.progress_event(details));
            }
            UpdateOutcome::Finished => {
                tracing::info!(
                    job_id,
                    status = %job.status,
                    message = %job.message,
                    "Job finished",
                );
                self.broadcaster.publish(job_id, &job.progress_event(None));
                // The sweeper may already be gone during shutdown.
                let _ = self.terminal_tx.send(job_id.to_string());
            }
        }
        Ok(outcome)
    }
}
