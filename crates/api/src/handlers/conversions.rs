//! Handler for model uploads.

use axum::body::Bytes;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use bimbridge_pipeline::SubmitRequest;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/v1/conversions
///
/// Accepts a multipart form with a required `file` field and an optional
/// `targetFormat` field. Returns 202 with the job id and the real-time
/// channel endpoint; the conversion itself runs in the background.
pub async fn submit_conversion(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let mut file: Option<(String, Bytes)> = None;
    let mut target_format: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("").to_string();
                let data = field.bytes().await?;
                file = Some((file_name, data));
            }
            "targetFormat" => {
                let text = field.text().await?;
                target_format = Some(text).filter(|t| !t.trim().is_empty());
            }
            _ => {} // ignore unknown fields
        }
    }

    let (file_name, payload) =
        file.ok_or_else(|| AppError::BadRequest("Missing required 'file' field".into()))?;

    let receipt = state
        .service
        .submit(SubmitRequest {
            file_name,
            payload,
            target_format,
        })
        .await?;

    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: receipt })))
}
