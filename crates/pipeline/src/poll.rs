//! Bounded exponential-backoff polling for remote conversion status.
//!
//! Adapters that must poll a backend call [`PollPolicy::poll_until`] with
//! a probe closure. The loop stops on the first ready result, when the job
//! is cancelled in the registry, when the shutdown token fires, or after
//! `max_attempts` probes.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::adapter::{AdapterError, JobHandle};

/// Result of one status probe.
#[derive(Debug)]
pub enum PollOutcome<T> {
    Ready(T),
    Pending,
}

/// Tunable parameters for the polling loop.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Delay after the first probe.
    pub initial_delay: Duration,
    /// Upper bound on the delay between probes.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each pending probe.
    pub multiplier: f64,
    /// Probes before giving up with [`AdapterError::Timeout`].
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(15),
            multiplier: 1.5,
            max_attempts: 480,
        }
    }
}

impl PollPolicy {
    /// Next delay, clamped to [`max_delay`](PollPolicy::max_delay).
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next_ms = (current.as_millis() as f64 * self.multiplier) as u64;
        Duration::from_millis(next_ms).min(self.max_delay)
    }

    /// Probe until ready, cancelled, shut down or out of attempts.
    ///
    /// `probe` receives the 1-based attempt number.
    pub async fn poll_until<T, F, Fut>(
        &self,
        handle: &JobHandle,
        shutdown: &CancellationToken,
        mut probe: F,
    ) -> Result<T, AdapterError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<PollOutcome<T>, AdapterError>>,
    {
        let mut delay = self.initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if handle.is_cancelled() {
                return Err(AdapterError::Cancelled);
            }

            if let PollOutcome::Ready(value) = probe(attempt).await? {
                return Ok(value);
            }

            if attempt >= self.max_attempts {
                return Err(AdapterError::Timeout(format!(
                    "no result after {attempt} status checks"
                )));
            }

            tracing::trace!(
                job_id = handle.job_id(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Conversion still pending",
            );

            tokio::select! {
                _ = shutdown.cancelled() => return Err(AdapterError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            delay = self.next_delay(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use bimbridge_core::formats::{BackendKind, FileFormat};
    use bimbridge_events::ProgressBroadcaster;

    use super::*;
    use crate::registry::JobRegistry;

    fn handle() -> (JobHandle, Arc<JobRegistry>) {
        let (registry, _rx) = JobRegistry::new(Arc::new(ProgressBroadcaster::new()));
        let registry = Arc::new(registry);
        let job = registry.create("model.rvt", FileFormat::Rvt, FileFormat::Ifc, BackendKind::Cloud);
        (JobHandle::new(job.id, Arc::clone(&registry)), registry)
    }

    fn fast_policy(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
            multiplier: 2.0,
            max_attempts,
        }
    }

    #[test]
    fn next_delay_grows_and_clamps() {
        let policy = fast_policy(10);
        assert_eq!(policy.next_delay(Duration::from_millis(100)), Duration::from_millis(200));
        assert_eq!(policy.next_delay(Duration::from_millis(300)), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn returns_first_ready_value() {
        let (handle, _registry) = handle();
        let shutdown = CancellationToken::new();

        let value = fast_policy(10)
            .poll_until(&handle, &shutdown, |attempt| async move {
                if attempt < 3 {
                    Ok(PollOutcome::Pending)
                } else {
                    Ok(PollOutcome::Ready(attempt))
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let (handle, _registry) = handle();
        let shutdown = CancellationToken::new();

        let result: Result<(), _> = fast_policy(4)
            .poll_until(&handle, &shutdown, |_| async { Ok(PollOutcome::Pending) })
            .await;

        assert_matches!(result, Err(AdapterError::Timeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_job_is_cancelled() {
        let (handle, registry) = handle();
        let shutdown = CancellationToken::new();
        let job_id = handle.job_id().to_string();

        let result: Result<(), _> = fast_policy(100)
            .poll_until(&handle, &shutdown, |attempt| {
                if attempt == 2 {
                    registry.cancel(&job_id).unwrap();
                }
                async { Ok(PollOutcome::Pending) }
            })
            .await;

        assert_matches!(result, Err(AdapterError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn probe_errors_propagate() {
        let (handle, _registry) = handle();
        let shutdown = CancellationToken::new();

        let result: Result<(), _> = fast_policy(10)
            .poll_until(&handle, &shutdown, |_| async {
                Err(AdapterError::Backend("translation failed".into()))
            })
            .await;

        assert_matches!(result, Err(AdapterError::Backend(_)));
    }
}
