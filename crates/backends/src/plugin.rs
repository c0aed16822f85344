//! Native plugin adapter (IFC -> Revit).
//!
//! The plugin runs out of process and is reachable only over a duplex
//! WebSocket. The adapter opens one connection per job, sends a
//! `start_conversion` command and then follows the plugin's event frames
//! until a completion, failure or cancellation message arrives.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bimbridge_core::formats::{output_file_name, BackendKind};
use bimbridge_core::job::JobStatus;
use bimbridge_pipeline::{AdapterError, ConversionAdapter, ConversionContext};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::status::progress_status;

#[derive(Debug, Clone)]
pub struct PluginConfig {
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:8766`.
    pub ws_url: String,
    pub connect_timeout: Duration,
    /// Longest silence tolerated from the plugin.
    pub idle_timeout: Duration,
    /// How often registry cancellation is checked.
    pub cancel_check_interval: Duration,
}

impl PluginConfig {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(600),
            cancel_check_interval: Duration::from_millis(500),
        }
    }
}

/// Commands sent to the plugin.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum PluginCommand {
    StartConversion {
        #[serde(rename = "jobId")]
        job_id: String,
        #[serde(rename = "filePath")]
        file_path: String,
        #[serde(rename = "outputPath")]
        output_path: String,
    },
    CancelJob {
        #[serde(rename = "jobId")]
        job_id: String,
    },
}

/// Artifact details reported on completion.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginResult {
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
}

/// Event frames the plugin sends, including the aliases older plugin
/// builds still emit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum PluginMessage {
    #[serde(rename = "conversion_started", alias = "start_ack")]
    Started {
        #[serde(rename = "jobId", default)]
        job_id: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },

    #[serde(rename = "conversion_progress", alias = "progress")]
    Progress {
        #[serde(rename = "jobId", default)]
        job_id: Option<String>,
        #[serde(default)]
        progress: Option<f64>,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },

    #[serde(rename = "conversion_completed", alias = "completed", alias = "success")]
    Completed {
        #[serde(rename = "jobId", default)]
        job_id: Option<String>,
        #[serde(default)]
        result: Option<PluginResult>,
        #[serde(default)]
        message: Option<String>,
    },

    #[serde(rename = "conversion_failed", alias = "error")]
    Failed {
        #[serde(rename = "jobId", default)]
        job_id: Option<String>,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },

    #[serde(rename = "conversion_cancelled", alias = "cancelled")]
    Cancelled {
        #[serde(rename = "jobId", default)]
        job_id: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },

    #[serde(rename = "plugin_status", alias = "status")]
    Status {
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },

    #[serde(other)]
    Unknown,
}

impl PluginMessage {
    /// The job a frame refers to, when it names one.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            PluginMessage::Started { job_id, .. }
            | PluginMessage::Progress { job_id, .. }
            | PluginMessage::Completed { job_id, .. }
            | PluginMessage::Failed { job_id, .. }
            | PluginMessage::Cancelled { job_id, .. } => job_id.as_deref(),
            PluginMessage::Status { .. } | PluginMessage::Unknown => None,
        }
    }
}

pub fn parse_plugin_message(text: &str) -> Result<PluginMessage, serde_json::Error> {
    serde_json::from_str(text)
}

/// What the frame loop should do after handling one message.
enum Flow {
    Continue,
    Done,
}

pub struct PluginAdapter {
    config: PluginConfig,
}

impl PluginAdapter {
    pub fn new(config: PluginConfig) -> Self {
        Self { config }
    }

    /// Handle one text frame from the plugin.
    async fn on_frame(&self, ctx: &ConversionContext, text: &str, output_path: &Path) -> Result<Flow, AdapterError> {
        let handle = &ctx.handle;
        let message = match parse_plugin_message(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(job_id = %ctx.job_id, error = %e, "Ignoring malformed plugin frame");
                return Ok(Flow::Continue);
            }
        };

        if message.job_id().is_some_and(|id| id != ctx.job_id) {
            tracing::debug!(job_id = %ctx.job_id, other = ?message.job_id(), "Ignoring frame for another job");
            return Ok(Flow::Continue);
        }

        match message {
            PluginMessage::Started { message, .. } => {
                let text = message.unwrap_or_else(|| "Plugin started conversion".to_string());
                if let Err(e) = handle.update(15, JobStatus::Processing, text) {
                    tracing::debug!(error = %e, "Progress update rejected");
                }
                Ok(Flow::Continue)
            }
            PluginMessage::Progress {
                progress,
                status,
                message,
                ..
            } => {
                let progress = progress.unwrap_or(0.0).round() as i64;
                let text = message.unwrap_or_else(|| "Plugin reported progress".to_string());
                if let Err(e) = handle.update(progress, progress_status(status.as_deref()), text) {
                    tracing::debug!(error = %e, "Progress update rejected");
                }
                Ok(Flow::Continue)
            }
            PluginMessage::Completed { result, .. } => {
                let result = result.unwrap_or_default();
                let reported = result
                    .output_path
                    .map(PathBuf::from)
                    .unwrap_or_else(|| output_path.to_path_buf());

                if reported != output_path {
                    tokio::fs::copy(&reported, output_path).await?;
                }
                let file_size = tokio::fs::metadata(output_path)
                    .await
                    .map_err(|_| AdapterError::Backend("Converted file was not found".into()))?
                    .len();
                let file_name = output_path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default()
                    .to_string();

                tracing::info!(job_id = %ctx.job_id, file_size, "Plugin conversion finished");
                handle.complete(file_name, file_size).ok();
                Ok(Flow::Done)
            }
            PluginMessage::Failed { error, message, .. } => Err(AdapterError::Backend(
                error
                    .or(message)
                    .unwrap_or_else(|| "Plugin conversion failed".to_string()),
            )),
            PluginMessage::Cancelled { .. } => Err(AdapterError::Cancelled),
            PluginMessage::Status { status, message } => {
                tracing::debug!(job_id = %ctx.job_id, ?status, ?message, "Plugin status");
                Ok(Flow::Continue)
            }
            PluginMessage::Unknown => {
                tracing::debug!(job_id = %ctx.job_id, "Unhandled plugin message type");
                Ok(Flow::Continue)
            }
        }
    }
}

fn encode(command: &PluginCommand) -> Result<Message, AdapterError> {
    let text = serde_json::to_string(command).map_err(|e| AdapterError::Protocol(e.to_string()))?;
    Ok(Message::Text(text))
}

#[async_trait]
impl ConversionAdapter for PluginAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Plugin
    }

    async fn start(&self, ctx: ConversionContext) -> Result<(), AdapterError> {
        let handle = &ctx.handle;
        handle.update(5, JobStatus::Uploading, "Connecting to conversion plugin").ok();

        let (ws_stream, _response) =
            tokio::time::timeout(self.config.connect_timeout, connect_async(self.config.ws_url.as_str()))
                .await
                .map_err(|_| AdapterError::Unavailable("plugin connection timed out".into()))?
                .map_err(|e| AdapterError::Unavailable(format!("plugin connection failed: {e}")))?;
        let (mut sender, mut receiver) = ws_stream.split();

        let output_path = ctx
            .output_dir
            .join(output_file_name(&ctx.file_name, ctx.target_format));
        let start = PluginCommand::StartConversion {
            job_id: ctx.job_id.clone(),
            file_path: ctx.input_path.display().to_string(),
            output_path: output_path.display().to_string(),
        };
        sender
            .send(encode(&start)?)
            .await
            .map_err(|e| AdapterError::Protocol(e.to_string()))?;
        handle.set_backend_ref(ctx.job_id.clone()).ok();
        handle.update(10, JobStatus::Processing, "Conversion dispatched to plugin").ok();

        let cancel = encode(&PluginCommand::CancelJob {
            job_id: ctx.job_id.clone(),
        })?;
        let mut ticker = tokio::time::interval(self.config.cancel_check_interval);
        let mut last_frame = Instant::now();

        loop {
            tokio::select! {
                _ = ctx.shutdown.cancelled() => {
                    let _ = sender.send(cancel.clone()).await;
                    return Err(AdapterError::Cancelled);
                }
                _ = ticker.tick() => {
                    if handle.is_cancelled() {
                        tracing::info!(job_id = %ctx.job_id, "Forwarding cancellation to plugin");
                        let _ = sender.send(cancel.clone()).await;
                        let _ = sender.close().await;
                        return Err(AdapterError::Cancelled);
                    }
                    if last_frame.elapsed() > self.config.idle_timeout {
                        return Err(AdapterError::Timeout(format!(
                            "plugin silent for {}s",
                            self.config.idle_timeout.as_secs()
                        )));
                    }
                }
                frame = receiver.next() => {
                    last_frame = Instant::now();
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if let Flow::Done = self.on_frame(&ctx, &text, &output_path).await? {
                                let _ = sender.close().await;
                                return Ok(());
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(AdapterError::Unavailable("plugin closed the connection".into()));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(AdapterError::Protocol(e.to_string())),
                    }
                }
            }
        }
    }
}
