//! Real-time channel protocol.
//!
//! Every frame is a JSON object tagged by `"type"`. Clients send
//! [`ClientMessage`]s; the server answers with [`ServerMessage`]s.

use serde::{Deserialize, Serialize};

use crate::job::JobStatus;
use crate::types::JobId;

/// Full state vector of a job, sent on every change and on join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Frames accepted from clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        #[serde(rename = "jobId")]
        job_id: JobId,
    },
    Unsubscribe {
        #[serde(rename = "jobId")]
        job_id: JobId,
    },
    Ping,
}

/// Frames pushed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        #[serde(rename = "connectionId")]
        connection_id: String,
    },
    Subscribed {
        #[serde(rename = "jobId")]
        job_id: JobId,
    },
    Progress(ProgressEvent),
    Pong,
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Parse a client text frame.
///
/// Returns `Err` for malformed JSON or unknown `type` values; callers
/// answer with an `error` frame and keep the connection open.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, serde_json::Error> {
    serde_json::from_str(text)
}
