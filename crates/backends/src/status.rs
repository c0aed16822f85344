use bimbridge_core::job::JobStatus;

/// Map a status string reported by the bridge or a plugin.
///
/// Unknown or missing values count as processing.
pub fn map_backend_status(raw: Option<&str>) -> JobStatus {
    let Some(raw) = raw else {
        return JobStatus::Processing;
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "queued" => JobStatus::Queued,
        "uploading" => JobStatus::Uploading,
        "processing" => JobStatus::Processing,
        "downloading" => JobStatus::Downloading,
        "completed" | "success" => JobStatus::Completed,
        "error" | "failed" => JobStatus::Error,
        "cancelled" => JobStatus::Cancelled,
        _ => JobStatus::Processing,
    }
}

/// Status to use for an intermediate progress report.
///
/// Terminal states only arrive through their dedicated messages, and a
/// backend that reports `queued` after accepting work is still
/// processing from our point of view.
pub fn progress_status(raw: Option<&str>) -> JobStatus {
    match map_backend_status(raw) {
        status @ (JobStatus::Uploading | JobStatus::Processing | JobStatus::Downloading) => status,
        _ => JobStatus::Processing,
    }
}
