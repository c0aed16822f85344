use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use bimbridge_core::error::CoreError;
use bimbridge_core::protocol::{parse_client_message, ClientMessage, ServerMessage};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::state::AppState;

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsParams {
    /// Subscribe to this job as soon as the connection opens.
    pub job_id: Option<String>,
}

/// HTTP handler that upgrades the connection to WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.job_id))
}

/// Manage a single WebSocket connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Registers the connection with `WsManager` for control frames.
///   2. Spawns a sender task that forwards control frames and protocol
///      messages to the sink.
///   3. Greets the client and performs the implicit subscribe, if any.
///   4. Processes inbound frames on the current task.
///   5. Drops every subscription on disconnect. Jobs keep running.
async fn handle_socket(socket: WebSocket, state: AppState, initial_job: Option<String>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, "WebSocket connected");

    let mut control_rx = state.ws_manager.add(conn_id.clone()).await;
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ServerMessage>();

    let (mut sink, mut stream) = socket.split();

    // Sender task: the only writer to the sink.
    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                Some(frame) = control_rx.recv() => frame,
                Some(message) = events_rx.recv() => match encode(&message) {
                    Some(frame) => frame,
                    None => continue,
                },
                else => break,
            };
            if sink.send(frame).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
        }
    });

    let _ = events_tx.send(ServerMessage::Connected {
        connection_id: conn_id.clone(),
    });
    if let Some(job_id) = initial_job {
        subscribe(&state, &conn_id, &events_tx, job_id);
    }

    // Receiver loop: process inbound frames.
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => match parse_client_message(text.as_str()) {
                Ok(message) => handle_client_message(&state, &conn_id, &events_tx, message),
                Err(e) => {
                    tracing::debug!(conn_id = %conn_id, error = %e, "Malformed client frame");
                    let _ = events_tx.send(ServerMessage::error(format!("Invalid message: {e}")));
                }
            },
            Ok(Message::Binary(_)) => {
                let _ = events_tx.send(ServerMessage::error("Binary frames are not supported"));
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(Message::Ping(_)) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    // Clean up: drop subscriptions, remove connection, stop the sender.
    let dropped = state.service.disconnect(&conn_id);
    let connected_for = state
        .ws_manager
        .connected_at(&conn_id)
        .await
        .map(|at| (chrono::Utc::now() - at).num_seconds());
    state.ws_manager.remove(&conn_id).await;
    send_task.abort();
    tracing::info!(
        conn_id = %conn_id,
        subscriptions = dropped,
        connected_secs = ?connected_for,
        "WebSocket disconnected",
    );
}

fn handle_client_message(
    state: &AppState,
    conn_id: &str,
    events_tx: &mpsc::UnboundedSender<ServerMessage>,
    message: ClientMessage,
) {
    match message {
        ClientMessage::Subscribe { job_id } => subscribe(state, conn_id, events_tx, job_id),
        ClientMessage::Unsubscribe { job_id } => {
            let removed = state.service.unsubscribe(&job_id, conn_id);
            tracing::debug!(conn_id = %conn_id, job_id = %job_id, removed, "Unsubscribed");
        }
        ClientMessage::Ping => {
            let _ = events_tx.send(ServerMessage::Pong);
        }
    }
}

/// Register with the job; the registry sends `subscribed` and then the
/// current snapshot, or nothing if the job is unknown.
fn subscribe(
    state: &AppState,
    conn_id: &str,
    events_tx: &mpsc::UnboundedSender<ServerMessage>,
    job_id: String,
) {
    match state
        .service
        .subscribe_acknowledged(&job_id, conn_id, events_tx.clone())
    {
        Ok(()) => tracing::debug!(conn_id = %conn_id, job_id = %job_id, "Subscribed"),
        Err(CoreError::JobNotFound(_)) => {
            let _ = events_tx.send(ServerMessage::error(format!("Job {job_id} not found")));
        }
        Err(e) => {
            tracing::warn!(conn_id = %conn_id, job_id = %job_id, error = %e, "Subscribe failed");
            let _ = events_tx.send(ServerMessage::error("Subscription failed"));
        }
    }
}

fn encode(message: &ServerMessage) -> Option<Message> {
    match message.to_json() {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode server message");
            None
        }
    }
}
