#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bimbridge_core::formats::{BackendKind, FileFormat};
use bimbridge_events::ProgressBroadcaster;
use bimbridge_pipeline::poll::PollPolicy;
use bimbridge_pipeline::registry::JobRegistry;
use bimbridge_pipeline::storage::JobStorage;
use bimbridge_pipeline::{ConversionContext, JobHandle};
use bytes::Bytes;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Registry, storage root and job id backing one adapter run.
pub struct Fixture {
    pub registry: Arc<JobRegistry>,
    pub job_id: String,
    pub tmp: TempDir,
}

/// Create a job and a staged context for it, the way the orchestrator does.
pub async fn context(
    file_name: &str,
    source: FileFormat,
    target: FileFormat,
    backend: BackendKind,
) -> (ConversionContext, Fixture) {
    let tmp = tempfile::tempdir().expect("tempdir");
    let storage = JobStorage::new(tmp.path());
    let (registry, _terminal_rx) = JobRegistry::new(Arc::new(ProgressBroadcaster::new()));
    let registry = Arc::new(registry);

    let job = registry.create(file_name, source, target, backend);
    let payload = Bytes::from_static(b"MODEL");
    let input_path = storage
        .stage_input(&job.id, file_name, &payload)
        .await
        .expect("stage input");

    let ctx = ConversionContext {
        job_id: job.id.clone(),
        file_name: file_name.to_string(),
        source_format: source,
        target_format: target,
        payload,
        input_path,
        output_dir: storage.output_dir(&job.id),
        handle: JobHandle::new(job.id.clone(), Arc::clone(&registry)),
        shutdown: CancellationToken::new(),
    };
    let fixture = Fixture {
        registry,
        job_id: job.id,
        tmp,
    };
    (ctx, fixture)
}

/// Polling that finishes in milliseconds.
pub fn fast_poll() -> PollPolicy {
    PollPolicy {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        multiplier: 2.0,
        max_attempts: 20,
    }
}
