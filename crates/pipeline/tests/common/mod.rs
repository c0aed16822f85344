#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bimbridge_core::formats::BackendKind;
use bimbridge_core::job::JobStatus;
use bimbridge_core::protocol::{ProgressEvent, ServerMessage};
use bimbridge_pipeline::storage::JobStorage;
use bimbridge_pipeline::{
    AdapterError, ConversionAdapter, ConversionContext, ConversionService, PipelineConfig,
    SubmitRequest,
};
use bytes::Bytes;
use tempfile::TempDir;
use tokio::sync::{mpsc, Notify};

/// How the fake adapter behaves once started.
#[derive(Clone)]
pub enum Script {
    /// Report progress, write the artifact and complete.
    Complete,
    /// Return `Ok` without finishing the job.
    ReturnEarly,
    /// Fail with the given error.
    Fail(Arc<dyn Fn() -> AdapterError + Send + Sync>),
    /// Panic inside `start`.
    Panic,
    /// Spin until the job is cancelled.
    RunUntilCancelled,
}

/// In-process adapter driven by a [`Script`].
pub struct FakeAdapter {
    pub kind: BackendKind,
    pub script: Script,
    /// When set, `start` waits for a notification before doing anything.
    pub gate: Option<Arc<Notify>>,
}

impl FakeAdapter {
    pub fn new(kind: BackendKind, script: Script) -> Arc<Self> {
        Arc::new(Self {
            kind,
            script,
            gate: None,
        })
    }

    pub fn gated(kind: BackendKind, script: Script, gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            script,
            gate: Some(gate),
        })
    }
}

#[async_trait]
impl ConversionAdapter for FakeAdapter {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn start(&self, ctx: ConversionContext) -> Result<(), AdapterError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        match &self.script {
            Script::Complete => {
                ctx.handle.update(10, JobStatus::Processing, "uploading").ok();
                ctx.handle.update(90, JobStatus::Processing, "converting").ok();
                let name = bimbridge_core::formats::output_file_name(&ctx.file_name, ctx.target_format);
                let bytes = vec![0u8; 2048];
                tokio::fs::write(ctx.output_dir.join(&name), &bytes).await?;
                ctx.handle.complete(name, bytes.len() as u64).ok();
                Ok(())
            }
            Script::ReturnEarly => {
                ctx.handle.update(50, JobStatus::Processing, "half way").ok();
                Ok(())
            }
            Script::Fail(make_error) => Err(make_error()),
            Script::Panic => panic!("adapter exploded at 0xdeadbeef"),
            Script::RunUntilCancelled => {
                ctx.handle.update(20, JobStatus::Processing, "working").ok();
                while !ctx.handle.is_cancelled() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                Err(AdapterError::Cancelled)
            }
        }
    }
}

/// A service over a fresh temporary storage root.
pub fn service_with(adapters: Vec<Arc<dyn ConversionAdapter>>) -> (ConversionService, TempDir) {
    service_with_config(PipelineConfig::default(), adapters)
}

pub fn service_with_config(
    config: PipelineConfig,
    adapters: Vec<Arc<dyn ConversionAdapter>>,
) -> (ConversionService, TempDir) {
    let tmp = tempfile::tempdir().expect("tempdir");
    let storage = JobStorage::new(tmp.path());
    (ConversionService::new(config, storage, adapters), tmp)
}

pub fn request(file_name: &str) -> SubmitRequest {
    SubmitRequest {
        file_name: file_name.to_string(),
        payload: Bytes::from_static(b"model-bytes"),
        target_format: None,
    }
}

/// Collect progress events until a terminal one arrives.
pub async fn events_until_terminal(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a terminal event")
            .expect("channel closed before a terminal event");
        if let ServerMessage::Progress(event) = msg {
            let done = event.status.is_terminal();
            events.push(event);
            if done {
                return events;
            }
        }
    }
}
