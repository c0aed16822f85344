//! End-to-end tests for `ConversionService` with in-process adapters.

mod common;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use assert_matches::assert_matches;
use bimbridge_core::error::CoreError;
use bimbridge_core::formats::BackendKind;
use bimbridge_core::job::JobStatus;
use bimbridge_core::protocol::ServerMessage;
use bimbridge_pipeline::orchestrator::{NO_RESULT_MESSAGE, UNEXPECTED_FAILURE_MESSAGE};
use bimbridge_pipeline::{
    AdapterError, ConversionAdapter, ConversionContext, PipelineConfig, SubmitRequest,
};
use bytes::Bytes;
use common::{events_until_terminal, request, service_with, service_with_config, FakeAdapter, Script};
use tokio::sync::{mpsc, Notify};

fn adapters(list: Vec<Arc<FakeAdapter>>) -> Vec<Arc<dyn ConversionAdapter>> {
    list.into_iter()
        .map(|a| a as Arc<dyn ConversionAdapter>)
        .collect()
}

// ---------------------------------------------------------------------------
// Test: a successful cloud conversion ends COMPLETED with its artifact
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rvt_upload_completes_with_ifc_result() {
    let (service, _tmp) = service_with(adapters(vec![FakeAdapter::new(
        BackendKind::Cloud,
        Script::Complete,
    )]));

    let receipt = service.submit(request("model.rvt")).await.unwrap();
    assert_eq!(receipt.channel_endpoint, format!("/api/v1/ws?jobId={}", receipt.job_id));

    let (tx, mut rx) = mpsc::unbounded_channel();
    service.subscribe(&receipt.job_id, "conn-1", tx).unwrap();
    let events = events_until_terminal(&mut rx).await;

    let last = events.last().unwrap();
    assert_eq!(last.status, JobStatus::Completed);
    assert_eq!(last.details.as_ref().unwrap()["result"]["fileName"], "model.ifc");

    let job = service.status(&receipt.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert_eq!(job.backend, BackendKind::Cloud);
    let result = job.result.unwrap();
    assert_eq!(result.file_name, "model.ifc");
    assert_eq!(result.file_size, 2048);

    let (path, _) = service.artifact(&receipt.job_id).unwrap();
    assert!(path.is_file());
}

// ---------------------------------------------------------------------------
// Test: unsupported extension is rejected before any job exists
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unsupported_extension_creates_no_job() {
    let (service, _tmp) = service_with(adapters(vec![FakeAdapter::new(
        BackendKind::Cloud,
        Script::Complete,
    )]));

    let result = service.submit(request("plan.dwg")).await;

    assert_matches!(result, Err(CoreError::Validation(_)));
    assert!(service.registry().is_empty());
}

#[tokio::test]
async fn unconfigured_backend_is_a_dispatch_error() {
    let (service, _tmp) = service_with(adapters(vec![FakeAdapter::new(
        BackendKind::Cloud,
        Script::Complete,
    )]));

    let result = service.submit(request("tower.pln")).await;

    assert_matches!(result, Err(CoreError::Dispatch(_)));
    assert!(service.registry().is_empty());
}

#[tokio::test]
async fn unsupported_pair_is_a_dispatch_error() {
    let (service, _tmp) = service_with(adapters(vec![FakeAdapter::new(
        BackendKind::Cloud,
        Script::Complete,
    )]));
    let mut req = request("model.rvt");
    req.target_format = Some("pln".into());

    assert_matches!(service.submit(req).await, Err(CoreError::Dispatch(_)));
}

#[tokio::test]
async fn empty_and_oversized_payloads_are_rejected() {
    let config = PipelineConfig {
        max_upload_bytes: 4,
        ..PipelineConfig::default()
    };
    let (service, _tmp) = service_with_config(
        config,
        adapters(vec![FakeAdapter::new(BackendKind::Cloud, Script::Complete)]),
    );

    let empty = SubmitRequest {
        payload: Bytes::new(),
        ..request("model.rvt")
    };
    assert_matches!(service.submit(empty).await, Err(CoreError::Validation(_)));
    assert_matches!(
        service.submit(request("model.rvt")).await,
        Err(CoreError::Validation(_))
    );
    assert!(service.registry().is_empty());
}

// ---------------------------------------------------------------------------
// Test: cancelling twice reports true then false
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_twice_returns_true_then_false() {
    let (service, _tmp) = service_with(adapters(vec![FakeAdapter::new(
        BackendKind::Plugin,
        Script::RunUntilCancelled,
    )]));
    let receipt = service.submit(request("model.ifc")).await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    service.subscribe(&receipt.job_id, "conn-1", tx).unwrap();

    assert!(service.cancel(&receipt.job_id));
    assert!(!service.cancel(&receipt.job_id));

    let events = events_until_terminal(&mut rx).await;
    assert_eq!(events.last().unwrap().status, JobStatus::Cancelled);
    let job = service.status(&receipt.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.progress, 0);
}

#[tokio::test]
async fn cancel_unknown_job_returns_false() {
    let (service, _tmp) = service_with(Vec::new());

    assert!(!service.cancel("no-such-job"));
}

// ---------------------------------------------------------------------------
// Test: a panicking adapter yields exactly one sanitized ERROR event
// ---------------------------------------------------------------------------

#[tokio::test]
async fn adapter_panic_becomes_single_error_event() {
    let gate = Arc::new(Notify::new());
    let (service, _tmp) = service_with(adapters(vec![FakeAdapter::gated(
        BackendKind::Bridge,
        Script::Panic,
        Arc::clone(&gate),
    )]));
    let receipt = service.submit(request("tower.pln")).await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    service.subscribe(&receipt.job_id, "conn-1", tx).unwrap();
    gate.notify_one();

    let events = events_until_terminal(&mut rx).await;
    let terminal: Vec<_> = events.iter().filter(|e| e.status.is_terminal()).collect();
    assert_eq!(terminal.len(), 1);
    assert_eq!(terminal[0].status, JobStatus::Error);
    assert_eq!(terminal[0].message, UNEXPECTED_FAILURE_MESSAGE);
    assert!(!terminal[0].message.contains("deadbeef"));

    tokio::task::yield_now().await;
    assert!(rx.try_recv().is_err(), "no events after the terminal one");
}

/// Adapter whose `start` panics before it builds a future.
struct EagerPanicAdapter;

impl ConversionAdapter for EagerPanicAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Cloud
    }

    fn start<'life0, 'async_trait>(
        &'life0 self,
        _ctx: ConversionContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), AdapterError>> + Send + 'async_trait>>
    where
        'life0: 'async_trait,
        Self: 'async_trait,
    {
        panic!("adapter exploded before polling");
    }
}

#[tokio::test]
async fn adapter_panic_before_first_poll_becomes_error_event() {
    let eager: Arc<dyn ConversionAdapter> = Arc::new(EagerPanicAdapter);
    let (service, _tmp) = service_with(vec![eager]);
    let receipt = service.submit(request("model.rvt")).await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    service.subscribe(&receipt.job_id, "conn-1", tx).unwrap();

    let events = events_until_terminal(&mut rx).await;
    let terminal: Vec<_> = events.iter().filter(|e| e.status.is_terminal()).collect();
    assert_eq!(terminal.len(), 1);
    assert_eq!(terminal[0].status, JobStatus::Error);
    assert_eq!(terminal[0].message, UNEXPECTED_FAILURE_MESSAGE);

    let job = service.status(&receipt.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Error);
    tokio::task::yield_now().await;
    assert!(rx.try_recv().is_err(), "no events after the terminal one");
}

#[tokio::test]
async fn adapter_error_is_sanitized_before_broadcast() {
    let (service, _tmp) = service_with(adapters(vec![FakeAdapter::new(
        BackendKind::Cloud,
        Script::Fail(Arc::new(|| {
            AdapterError::Http("error sending request for url (https://cloud/?token=s3cret)".into())
        })),
    )]));
    let receipt = service.submit(request("model.rvt")).await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    service.subscribe(&receipt.job_id, "conn-1", tx).unwrap();

    let events = events_until_terminal(&mut rx).await;
    let last = events.last().unwrap();

    assert_eq!(last.status, JobStatus::Error);
    assert_eq!(last.message, "Failed to reach conversion backend");
    let job = service.status(&receipt.job_id).unwrap();
    assert_eq!(job.error.as_deref(), Some("Failed to reach conversion backend"));
    assert_eq!(job.progress, 0);
}

#[tokio::test]
async fn adapter_returning_without_result_is_failed() {
    let (service, _tmp) = service_with(adapters(vec![FakeAdapter::new(
        BackendKind::Cloud,
        Script::ReturnEarly,
    )]));
    let receipt = service.submit(request("model.rvt")).await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    service.subscribe(&receipt.job_id, "conn-1", tx).unwrap();

    let events = events_until_terminal(&mut rx).await;

    assert_eq!(events.last().unwrap().message, NO_RESULT_MESSAGE);
}

// ---------------------------------------------------------------------------
// Test: two subscribers see the same sequence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_subscribers_receive_identical_sequences() {
    let gate = Arc::new(Notify::new());
    let (service, _tmp) = service_with(adapters(vec![FakeAdapter::gated(
        BackendKind::Cloud,
        Script::Complete,
        Arc::clone(&gate),
    )]));
    let receipt = service.submit(request("model.rvt")).await.unwrap();

    let (tx1, mut rx1) = mpsc::unbounded_channel();
    let (tx2, mut rx2) = mpsc::unbounded_channel();
    service.subscribe(&receipt.job_id, "conn-1", tx1).unwrap();
    service.subscribe(&receipt.job_id, "conn-2", tx2).unwrap();
    gate.notify_one();

    let first = events_until_terminal(&mut rx1).await;
    let second = events_until_terminal(&mut rx2).await;

    assert_eq!(first, second);
    let progress: Vec<u8> = first.iter().map(|e| e.progress).collect();
    assert_eq!(progress, vec![0, 10, 90, 100]);
}

// ---------------------------------------------------------------------------
// Test: disconnecting a subscriber never cancels the job
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnect_does_not_cancel() {
    let (service, _tmp) = service_with(adapters(vec![FakeAdapter::new(
        BackendKind::Plugin,
        Script::RunUntilCancelled,
    )]));
    let receipt = service.submit(request("model.ifc")).await.unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    service.subscribe(&receipt.job_id, "conn-1", tx).unwrap();

    drop(rx);
    assert_eq!(service.disconnect("conn-1"), 1);
    tokio::task::yield_now().await;

    let job = service.status(&receipt.job_id).unwrap();
    assert!(!job.is_terminal());
    assert!(service.cancel(&receipt.job_id));
}

// ---------------------------------------------------------------------------
// Test: TTL sweep evicts regardless of status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ttl_sweep_evicts_running_job_and_its_files() {
    let (service, tmp) = service_with(adapters(vec![FakeAdapter::new(
        BackendKind::Plugin,
        Script::RunUntilCancelled,
    )]));
    let receipt = service.submit(request("model.ifc")).await.unwrap();
    assert!(tmp.path().join(&receipt.job_id).is_dir());

    let later = chrono::Utc::now() + chrono::Duration::hours(4);
    let evicted = service.sweeper().sweep_expired(later).await;

    assert_eq!(evicted, 1);
    assert_matches!(
        service.status(&receipt.job_id),
        Err(CoreError::JobNotFound(_))
    );
    assert!(!tmp.path().join(&receipt.job_id).exists());
    assert_eq!(service.sweeper().sweep_expired(later).await, 0);
}

#[tokio::test]
async fn artifact_of_unfinished_job_is_unavailable() {
    let (service, _tmp) = service_with(adapters(vec![FakeAdapter::new(
        BackendKind::Plugin,
        Script::RunUntilCancelled,
    )]));
    let receipt = service.submit(request("model.ifc")).await.unwrap();

    assert_matches!(
        service.artifact(&receipt.job_id),
        Err(CoreError::ResultUnavailable(_))
    );
    assert_matches!(service.artifact("missing"), Err(CoreError::JobNotFound(_)));
}

#[tokio::test]
async fn configured_backends_are_listed() {
    let (service, _tmp) = service_with(adapters(vec![
        FakeAdapter::new(BackendKind::Plugin, Script::Complete),
        FakeAdapter::new(BackendKind::Cloud, Script::Complete),
    ]));

    assert_eq!(
        service.configured_backends(),
        vec![BackendKind::Cloud, BackendKind::Plugin]
    );
}

// ---------------------------------------------------------------------------
// Test: acknowledged subscribe sends `subscribed` only for a live job
// ---------------------------------------------------------------------------

#[tokio::test]
async fn acknowledged_subscribe_precedes_snapshot() {
    let gate = Arc::new(Notify::new());
    let (service, _tmp) = service_with(adapters(vec![FakeAdapter::gated(
        BackendKind::Cloud,
        Script::Complete,
        Arc::clone(&gate),
    )]));
    let receipt = service.submit(request("model.rvt")).await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    service
        .subscribe_acknowledged(&receipt.job_id, "conn-1", tx)
        .unwrap();

    assert_matches!(
        rx.try_recv().unwrap(),
        ServerMessage::Subscribed { job_id } if job_id == receipt.job_id
    );
    assert_matches!(
        rx.try_recv().unwrap(),
        ServerMessage::Progress(event) if event.status == JobStatus::Queued
    );
    gate.notify_one();
}

#[tokio::test]
async fn acknowledged_subscribe_to_unknown_job_sends_nothing() {
    let (service, _tmp) = service_with(Vec::new());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let result = service.subscribe_acknowledged("no-such-job", "conn-1", tx);

    assert_matches!(result, Err(CoreError::JobNotFound(_)));
    assert!(rx.try_recv().is_err());
}
