#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, Request, Response};
use axum::Router;
use bimbridge_api::config::{BackendSettings, ServerConfig};
use bimbridge_api::router::build_app_router;
use bimbridge_api::state::AppState;
use bimbridge_api::ws::WsManager;
use bimbridge_core::formats::{output_file_name, BackendKind};
use bimbridge_core::job::JobStatus;
use bimbridge_pipeline::storage::JobStorage;
use bimbridge_pipeline::{AdapterError, ConversionAdapter, ConversionContext, ConversionService};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tokio::sync::Notify;
use tower::ServiceExt;

/// Build a test `ServerConfig` with safe defaults and no real backends.
pub fn test_config(storage_root: PathBuf) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        job_ttl_minutes: 180,
        job_cleanup_interval_secs: 60,
        job_grace_secs: 30,
        job_storage_root: storage_root,
        max_upload_mb: 1,
        ws_heartbeat_secs: 30,
        backends: BackendSettings::default(),
    }
}

/// In-process adapter: optional gate, one progress step, then an artifact.
pub struct StubAdapter {
    pub kind: BackendKind,
    pub gate: Option<Arc<Notify>>,
    pub fail_with: Option<String>,
}

impl StubAdapter {
    pub fn completing(kind: BackendKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            gate: None,
            fail_with: None,
        })
    }

    pub fn gated(kind: BackendKind, gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            gate: Some(gate),
            fail_with: None,
        })
    }

    pub fn failing(kind: BackendKind, reason: &str) -> Arc<Self> {
        Arc::new(Self {
            kind,
            gate: None,
            fail_with: Some(reason.to_string()),
        })
    }
}

#[async_trait]
impl ConversionAdapter for StubAdapter {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn start(&self, ctx: ConversionContext) -> Result<(), AdapterError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(reason) = &self.fail_with {
            return Err(AdapterError::Backend(reason.clone()));
        }

        ctx.handle.update(50, JobStatus::Processing, "Converting").ok();
        let file_name = output_file_name(&ctx.file_name, ctx.target_format);
        let artifact = b"converted-model".to_vec();
        tokio::fs::write(ctx.output_dir.join(&file_name), &artifact).await?;
        ctx.handle.complete(file_name, artifact.len() as u64).ok();
        Ok(())
    }
}

/// A running test application: router, state and its storage root.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub tmp: TempDir,
}

/// Build the full application router with all middleware layers, backed by
/// a fresh conversion service using the given adapters.
pub fn build_test_app(adapters: Vec<Arc<dyn ConversionAdapter>>) -> TestApp {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = test_config(tmp.path().to_path_buf());
    let service = Arc::new(ConversionService::new(
        config.pipeline_config(),
        JobStorage::new(tmp.path()),
        adapters,
    ));

    let state = AppState {
        config: Arc::new(config.clone()),
        service,
        ws_manager: Arc::new(WsManager::new()),
    };
    let router = build_app_router(state.clone(), &config);
    TestApp { router, state, tmp }
}

pub fn adapters(list: Vec<Arc<StubAdapter>>) -> Vec<Arc<dyn ConversionAdapter>> {
    list.into_iter()
        .map(|a| a as Arc<dyn ConversionAdapter>)
        .collect()
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

const BOUNDARY: &str = "bimbridge-test-boundary";

/// Build a multipart upload request for `/api/v1/conversions`.
pub fn upload_request(file_name: &str, payload: &[u8], target_format: Option<&str>) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(payload);
    body.extend_from_slice(b"\r\n");
    if let Some(target) = target_format {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"targetFormat\"\r\n\r\n{target}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri("/api/v1/conversions")
        .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap()
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

pub async fn post(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Poll the status endpoint until the job reaches `status`.
pub async fn wait_for_status(app: &Router, job_id: &str, status: &str) -> serde_json::Value {
    let uri = format!("/api/v1/jobs/{job_id}");
    for _ in 0..200 {
        let json = body_json(get(app, &uri).await).await;
        if json["data"]["status"] == status {
            return json["data"].clone();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} never reached {status}");
}
