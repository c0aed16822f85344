use crate::job::JobStatus;
use crate::types::JobId;

/// Domain errors shared by every layer of the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Bad input (file name, payload size, extension). Raised before a job exists.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// No backend is configured for the requested source/target pair.
    #[error("No conversion backend available: {0}")]
    Dispatch(String),

    /// The job id is unknown or has already been evicted.
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    /// A non-terminal job was asked to move backwards in its lifecycle.
    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    /// The job exists but has no downloadable artifact (not completed).
    #[error("Job {0} has no result available")]
    ResultUnavailable(JobId),

    #[error("Internal error: {0}")]
    Internal(String),
}
