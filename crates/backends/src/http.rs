//! Shared reqwest helpers for the HTTP-based adapters.

use std::path::Path;

use bimbridge_pipeline::AdapterError;
use serde::de::DeserializeOwned;

/// Classify a transport-level reqwest failure.
pub(crate) fn request_error(e: reqwest::Error) -> AdapterError {
    if e.is_timeout() {
        AdapterError::Timeout(e.to_string())
    } else if e.is_connect() {
        AdapterError::Unavailable(e.to_string())
    } else {
        AdapterError::Http(e.to_string())
    }
}

/// Return the response unchanged on 2xx, otherwise classify the status.
///
/// The body is kept in the error for logs; it never reaches subscribers.
pub(crate) async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, AdapterError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    let detail = format!("{status}: {body}");

    Err(match status.as_u16() {
        502..=504 => AdapterError::Unavailable(detail),
        401 | 403 => AdapterError::Rejected(format!("{status}: authentication failed")),
        400..=499 => AdapterError::Rejected(detail),
        _ => AdapterError::Http(detail),
    })
}

/// Parse a successful JSON response body into the expected type.
pub(crate) async fn parse_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, AdapterError> {
    let response = ensure_success(response).await?;
    response
        .json::<T>()
        .await
        .map_err(|e| AdapterError::Protocol(e.to_string()))
}

/// Write a successful response body to `path`, returning its size.
pub(crate) async fn download_to(response: reqwest::Response, path: &Path) -> Result<u64, AdapterError> {
    let response = ensure_success(response).await?;
    let bytes = response.bytes().await.map_err(request_error)?;
    tokio::fs::write(path, &bytes).await?;
    Ok(bytes.len() as u64)
}
