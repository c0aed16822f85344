//! Handlers for the `/jobs` resource.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bimbridge_core::error::CoreError;
use serde::Serialize;
use tokio_util::io::ReaderStream;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

// ---------------------------------------------------------------------------
// List / get
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// Jobs that have not reached a terminal state, oldest first.
pub async fn list_jobs(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Json(DataResponse {
        data: state.service.list_active(),
    }))
}

/// GET /api/v1/jobs/{id}
///
/// Snapshot of one job. 404 once the job has been evicted.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job = state.service.status(&job_id)?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/cancel
///
/// `cancelled` is false when the job is unknown or already terminal.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let cancelled = state.service.cancel(&job_id);
    tracing::info!(job_id = %job_id, cancelled, "Cancel requested");
    Ok(Json(DataResponse {
        data: CancelResponse { cancelled },
    }))
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}/download
///
/// Streams the converted artifact of a completed job.
pub async fn download_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Response> {
    let (path, result) = state.service.artifact(&job_id)?;

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        // Evicted between the lookup and the open.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::Core(CoreError::JobNotFound(job_id)));
        }
        Err(e) => return Err(AppError::InternalError(e.to_string())),
    };
    let stream = ReaderStream::new(file);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", result.file_name),
            ),
            (header::CONTENT_LENGTH, result.file_size.to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}
