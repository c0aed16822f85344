use std::sync::Arc;

use bimbridge_core::protocol::{ProgressEvent, ServerMessage};
use bimbridge_core::types::JobId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// Sender half of a subscriber's outbound channel.
///
/// The transport layer owns the receiving half and the socket behind it;
/// the broadcaster only keeps this handle for lookup.
pub type SubscriberChannel = mpsc::UnboundedSender<ServerMessage>;

/// Errors surfaced to callers of [`ProgressBroadcaster::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BroadcastError {
    /// The channel was already closed when it was offered.
    #[error("Subscriber channel is closed")]
    SubscriberClosed,
}

/// One registration of a connection against a job.
struct Subscriber {
    connection_id: String,
    channel: SubscriberChannel,
}

/// Per-job subscriber registry and fan-out.
///
/// Designed to be wrapped in `Arc` and shared between the job registry
/// (which publishes) and the transport layer (which subscribes).
pub struct ProgressBroadcaster {
    subscribers: DashMap<JobId, Vec<Subscriber>>,
    /// One close watcher per connection id, however many jobs it follows.
    watchers: DashMap<String, AbortHandle>,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            watchers: DashMap::new(),
        }
    }

    /// Register `channel` for `job_id` and replay `snapshot` to it.
    ///
    /// The snapshot is sent before the channel joins the set, so callers
    /// that want a gap-free stream must hold the job's lock across this
    /// call. Re-subscribing the same connection replaces its previous
    /// registration. The first subscription of a connection starts a
    /// watcher that drops all of its registrations once the channel closes.
    pub fn subscribe(
        self: &Arc<Self>,
        job_id: &str,
        connection_id: &str,
        channel: SubscriberChannel,
        snapshot: Option<ProgressEvent>,
    ) -> Result<(), BroadcastError> {
        if channel.is_closed() {
            return Err(BroadcastError::SubscriberClosed);
        }
        if let Some(snapshot) = snapshot {
            channel
                .send(ServerMessage::Progress(snapshot))
                .map_err(|_| BroadcastError::SubscriberClosed)?;
        }

        {
            let mut entry = self.subscribers.entry(job_id.to_string()).or_default();
            entry.retain(|s| s.connection_id != connection_id);
            entry.push(Subscriber {
                connection_id: connection_id.to_string(),
                channel: channel.clone(),
            });
        }

        tracing::debug!(job_id, conn_id = connection_id, "Subscriber registered");
        self.watch_close(connection_id, channel);
        Ok(())
    }

    /// Send `event` to every channel registered for `job_id`.
    ///
    /// Returns the number of channels that accepted the event. Channels
    /// whose receiver is gone are pruned on the spot.
    pub fn publish(&self, job_id: &str, event: &ProgressEvent) -> usize {
        let Some(mut subs) = self.subscribers.get_mut(job_id) else {
            return 0;
        };

        let message = ServerMessage::Progress(event.clone());
        subs.retain(|sub| match sub.channel.send(message.clone()) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!(job_id, conn_id = %sub.connection_id, "Pruning closed subscriber");
                false
            }
        });
        let delivered = subs.len();
        drop(subs);

        if delivered == 0 {
            self.subscribers.remove_if(job_id, |_, subs| subs.is_empty());
        }
        delivered
    }

    /// Remove one connection's registration for `job_id`.
    pub fn unsubscribe(&self, job_id: &str, connection_id: &str) -> bool {
        let removed = match self.subscribers.get_mut(job_id) {
            Some(mut subs) => {
                let before = subs.len();
                subs.retain(|s| s.connection_id != connection_id);
                before != subs.len()
            }
            None => false,
        };
        self.subscribers.remove_if(job_id, |_, subs| subs.is_empty());

        if removed {
            tracing::debug!(job_id, conn_id = connection_id, "Subscriber removed");
        }
        removed
    }

    /// Drop every registration held by a connection and stop its watcher.
    /// Returns how many jobs it was subscribed to.
    pub fn remove_connection(&self, connection_id: &str) -> usize {
        if let Some((_, watcher)) = self.watchers.remove(connection_id) {
            watcher.abort();
        }
        self.drop_registrations(connection_id)
    }

    /// Forget all subscribers of a job (eviction).
    pub fn remove_job(&self, job_id: &str) -> usize {
        self.subscribers
            .remove(job_id)
            .map(|(_, subs)| subs.len())
            .unwrap_or(0)
    }

    pub fn subscriber_count(&self, job_id: &str) -> usize {
        self.subscribers.get(job_id).map(|s| s.len()).unwrap_or(0)
    }

    /// Number of jobs with at least one live subscriber.
    pub fn job_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Number of connections with a running close watcher.
    pub fn watched_connections(&self) -> usize {
        self.watchers.len()
    }

    fn drop_registrations(&self, connection_id: &str) -> usize {
        let mut removed = 0;
        self.subscribers.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|s| s.connection_id != connection_id);
            removed += before - subs.len();
            !subs.is_empty()
        });
        removed
    }

    fn watch_close(self: &Arc<Self>, connection_id: &str, channel: SubscriberChannel) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            // Outside a runtime, lazy pruning in `publish` is the only cleanup.
            return;
        };
        let Entry::Vacant(slot) = self.watchers.entry(connection_id.to_string()) else {
            return;
        };

        let broadcaster = Arc::downgrade(self);
        let conn_id = connection_id.to_string();
        let task = runtime.spawn(async move {
            channel.closed().await;
            if let Some(broadcaster) = broadcaster.upgrade() {
                broadcaster.watchers.remove(&conn_id);
                let removed = broadcaster.drop_registrations(&conn_id);
                tracing::debug!(conn_id = %conn_id, removed, "Subscriber channel closed");
            }
        });
        slot.insert(task.abort_handle());
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
