//! Job record and lifecycle state machine.
//!
//! [`Job::apply`] is the pure transition function behind the registry's
//! single update entry point. It owns clamping, terminal freezing and the
//! forward-only ordering of the intermediate states; the registry adds
//! locking and fan-out on top.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::formats::{BackendKind, FileFormat};
use crate::protocol::ProgressEvent;
use crate::sanitize::sanitize_message;
use crate::types::{JobId, Timestamp};

/// Lifecycle states of a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Uploading,
    Processing,
    Downloading,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    /// Completed, Error and Cancelled are terminal: the record is frozen.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled
        )
    }

    /// Position along the happy path. `None` for Error/Cancelled, which
    /// are reachable from any non-terminal state.
    fn stage(self) -> Option<u8> {
        match self {
            JobStatus::Queued => Some(0),
            JobStatus::Uploading => Some(1),
            JobStatus::Processing => Some(2),
            JobStatus::Downloading => Some(3),
            JobStatus::Completed => Some(4),
            JobStatus::Error | JobStatus::Cancelled => None,
        }
    }

    /// Whether a job currently in `self` may move to `next`.
    ///
    /// Staying put or skipping forward (e.g. Queued -> Processing) is
    /// allowed; moving backwards is not.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.stage(), next.stage()) {
            (_, None) => true,
            (Some(current), Some(target)) => target >= current,
            (None, Some(_)) => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Uploading => "uploading",
            JobStatus::Processing => "processing",
            JobStatus::Downloading => "downloading",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Artifact produced by a successful conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionResult {
    pub download_url: String,
    pub file_name: String,
    pub file_size: u64,
}

/// One requested change, as submitted to the registry's update entry point.
#[derive(Debug, Clone)]
pub struct JobChange {
    pub progress: i64,
    pub status: JobStatus,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub result: Option<ConversionResult>,
}

impl JobChange {
    pub fn new(progress: i64, status: JobStatus, message: impl Into<String>) -> Self {
        Self {
            progress,
            status,
            message: message.into(),
            details: None,
            result: None,
        }
    }

    pub fn with_details(mut self, details: Option<serde_json::Value>) -> Self {
        self.details = details;
        self
    }

    pub fn with_result(mut self, result: ConversionResult) -> Self {
        self.result = Some(result);
        self
    }
}

/// What an update did to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Non-terminal mutation applied.
    Updated,
    /// First entry into a terminal state.
    Finished,
    /// The job was already terminal; nothing changed.
    Frozen,
}

/// A conversion request and its tracked lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub file_name: String,
    pub source_format: FileFormat,
    pub target_format: FileFormat,
    pub backend: BackendKind,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ConversionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_ref: Option<String>,
}

impl Job {
    /// Build a fresh QUEUED record at 0%.
    pub fn new(
        id: JobId,
        file_name: impl Into<String>,
        source_format: FileFormat,
        target_format: FileFormat,
        backend: BackendKind,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            progress: 0,
            message: "Conversion request queued".to_string(),
            file_name: file_name.into(),
            source_format,
            target_format,
            backend,
            created_at: now,
            updated_at: now,
            ended_at: None,
            error: None,
            result: None,
            backend_ref: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a change, enforcing every lifecycle invariant.
    pub fn apply(&mut self, change: JobChange, now: Timestamp) -> Result<UpdateOutcome, CoreError> {
        if self.is_terminal() {
            return Ok(UpdateOutcome::Frozen);
        }
        if !self.status.can_transition_to(change.status) {
            return Err(CoreError::InvalidTransition {
                job_id: self.id.clone(),
                from: self.status,
                to: change.status,
            });
        }

        self.status = change.status;
        self.progress = clamp_progress(change.progress);
        self.message = change.message;
        self.updated_at = now;

        match change.status {
            JobStatus::Completed => {
                self.progress = 100;
                self.result = change.result;
            }
            JobStatus::Error => {
                let text = sanitize_message(&self.message);
                self.message = text.clone();
                self.error = Some(text);
            }
            _ => {}
        }

        if change.status.is_terminal() {
            self.ended_at.get_or_insert(now);
            Ok(UpdateOutcome::Finished)
        } else {
            Ok(UpdateOutcome::Updated)
        }
    }

    /// Render the current state as a `progress` event.
    ///
    /// Without explicit `details`, terminal snapshots carry the result or
    /// the error so late subscribers get full context.
    pub fn progress_event(&self, details: Option<serde_json::Value>) -> ProgressEvent {
        let details = details.or_else(|| match (&self.result, &self.error) {
            (Some(result), _) => Some(serde_json::json!({ "result": result })),
            (None, Some(error)) => Some(serde_json::json!({ "error": error })),
            (None, None) => None,
        });
        ProgressEvent {
            job_id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            message: self.message.clone(),
            details,
        }
    }
}

/// Clamp an arbitrary progress value into `[0, 100]`.
pub fn clamp_progress(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}
