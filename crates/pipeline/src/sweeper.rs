//! Eviction of finished and stale jobs.
//!
//! Two tiers:
//!
//! 1. **Grace delay**: when a job first reaches a terminal state the
//!    registry notifies the sweeper, which schedules eviction after
//!    `grace_period` so slow subscribers still receive the final event.
//! 2. **TTL sweep**: every `sweep_interval` the sweeper evicts any job
//!    older than `job_ttl`, terminal or not. This reclaims jobs whose
//!    adapter hung without ever finishing.
//!
//! Eviction removes the registry record, the subscriber set and the
//! job's staging directory. It is idempotent.

use std::sync::Arc;
use std::time::Duration;

use bimbridge_core::types::{JobId, Timestamp};
use bimbridge_events::ProgressBroadcaster;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::registry::JobRegistry;
use crate::storage::JobStorage;

pub struct Sweeper {
    registry: Arc<JobRegistry>,
    broadcaster: Arc<ProgressBroadcaster>,
    storage: JobStorage,
    job_ttl: Duration,
    grace_period: Duration,
    sweep_interval: Duration,
    /// Pending grace-delay evictions, cancellable by the TTL sweep.
    pending: DashMap<JobId, CancellationToken>,
}

impl Sweeper {
    pub fn new(
        registry: Arc<JobRegistry>,
        broadcaster: Arc<ProgressBroadcaster>,
        storage: JobStorage,
        job_ttl: Duration,
        grace_period: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            storage,
            job_ttl,
            grace_period,
            sweep_interval,
            pending: DashMap::new(),
        }
    }

    /// Run until `cancel` fires, consuming terminal notifications from
    /// the registry.
    pub async fn run(
        self: Arc<Self>,
        mut terminal_rx: mpsc::UnboundedReceiver<JobId>,
        cancel: CancellationToken,
    ) {
        tracing::info!(
            ttl_secs = self.job_ttl.as_secs(),
            grace_secs = self.grace_period.as_secs(),
            interval_secs = self.sweep_interval.as_secs(),
            "Job sweeper started",
        );

        let mut interval = tokio::time::interval(self.sweep_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job sweeper stopping");
                    break;
                }
                Some(job_id) = terminal_rx.recv() => {
                    self.schedule_eviction(job_id, &cancel);
                }
                _ = interval.tick() => {
                    let evicted = self.sweep_expired(Utc::now()).await;
                    if evicted > 0 {
                        tracing::info!(evicted, "Job sweeper: evicted expired jobs");
                    } else {
                        tracing::debug!("Job sweeper: nothing expired");
                    }
                }
            }
        }
    }

    /// Evict `job_id` once the grace period has elapsed.
    pub fn schedule_eviction(self: &Arc<Self>, job_id: JobId, shutdown: &CancellationToken) {
        let token = shutdown.child_token();
        if let Some(previous) = self.pending.insert(job_id.clone(), token.clone()) {
            previous.cancel();
        }

        let sweeper = Arc::clone(self);
        let grace = self.grace_period;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(grace) => {
                    sweeper.pending.remove(&job_id);
                    sweeper.evict(&job_id).await;
                }
            }
        });
    }

    /// Evict every job created at or before `now - job_ttl`.
    pub async fn sweep_expired(&self, now: Timestamp) -> usize {
        let Ok(ttl) = chrono::Duration::from_std(self.job_ttl) else {
            return 0;
        };
        let Some(cutoff) = now.checked_sub_signed(ttl) else {
            return 0;
        };

        let expired: Vec<JobId> = self
            .registry
            .snapshot_ids()
            .into_iter()
            .filter(|(_, created_at)| *created_at <= cutoff)
            .map(|(id, _)| id)
            .collect();

        let mut evicted = 0;
        for job_id in expired {
            if let Some((_, token)) = self.pending.remove(&job_id) {
                token.cancel();
            }
            if self.evict(&job_id).await {
                evicted += 1;
            }
        }
        evicted
    }

    /// Remove all state for a job. Returns whether a record was removed.
    pub async fn evict(&self, job_id: &str) -> bool {
        let removed = self.registry.remove(job_id);
        let subscribers = self.broadcaster.remove_job(job_id);

        if let Err(e) = self.storage.remove(job_id).await {
            tracing::warn!(job_id, error = %e, "Failed to remove job files");
        }

        match removed {
            Some(job) => {
                tracing::info!(job_id, status = %job.status, subscribers, "Job evicted");
                true
            }
            None => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
