//! Completion handshake: session phases, the finalize task and the
//! task-complete control frame sent to the client.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use bytes::Bytes;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::core::recording::{Recorder, RecordingResult};
use crate::core::sauc::{Compression, MessageType, Serialization, build_frame};

/// Connect id carried by task-complete frames that report a failure
pub const FAILED_CONNECT_ID: &str = "-1";

/// Session state, advanced only forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionPhase {
    Relaying = 0,
    /// Client sent its final packet; recording has stopped
    AwaitingFinal = 1,
    TaskCompleteSent = 2,
    Closed = 3,
}

impl SessionPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionPhase::Relaying,
            1 => SessionPhase::AwaitingFinal,
            2 => SessionPhase::TaskCompleteSent,
            _ => SessionPhase::Closed,
        }
    }
}

/// Phase shared by the two relay loops of one session
#[derive(Debug)]
pub(super) struct PhaseCell(AtomicU8);

impl PhaseCell {
    pub(super) fn new() -> Self {
        Self(AtomicU8::new(SessionPhase::Relaying as u8))
    }

    pub(super) fn get(&self) -> SessionPhase {
        SessionPhase::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `phase` unless the session is already past it
    pub(super) fn advance(&self, phase: SessionPhase) -> SessionPhase {
        SessionPhase::from_u8(self.0.fetch_max(phase as u8, Ordering::AcqRel))
    }
}

/// What the finalize task produced for a session
#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeOutcome {
    Recorded(RecordingResult),
    /// Nothing was recorded (disabled, empty, or discarded)
    Empty,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    Empty,
    Failed,
}

/// JSON payload of the task-complete frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskComplete {
    pub task_id: String,
    pub connect_id: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Seconds between recorder creation and finalize
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskComplete {
    pub fn from_outcome(connect_id: &str, outcome: &FinalizeOutcome) -> Self {
        let base = |connect_id: &str, status| TaskComplete {
            task_id: connect_id.to_string(),
            connect_id: connect_id.to_string(),
            status,
            file_path: None,
            file_size: None,
            duration: None,
            started_at: None,
            ended_at: None,
            error: None,
        };

        match outcome {
            FinalizeOutcome::Recorded(result) => TaskComplete {
                file_path: Some(result.file_path.to_string_lossy().into_owned()),
                file_size: Some(result.size),
                duration: Some(result.duration().as_secs_f64()),
                started_at: result.started_at.format(&Rfc3339).ok(),
                ended_at: result.ended_at.format(&Rfc3339).ok(),
                ..base(&result.connect_id, TaskStatus::Completed)
            },
            FinalizeOutcome::Empty => base(connect_id, TaskStatus::Empty),
            FinalizeOutcome::Failed(reason) => TaskComplete {
                error: Some(reason.clone()),
                ..base(FAILED_CONNECT_ID, TaskStatus::Failed)
            },
        }
    }

    /// Encode as a task-complete SAUC frame (JSON, uncompressed, no flags)
    pub fn to_frame(&self) -> Result<Bytes, serde_json::Error> {
        let payload = serde_json::to_vec(self)?;
        Ok(build_frame(
            MessageType::TaskComplete,
            Serialization::Json,
            Compression::None,
            0,
            &payload,
        ))
    }
}

/// Channels tying the finalize task to the rest of the session
pub(super) struct FinalizeChannels {
    /// Fired by the upstream loop on the server's final response; dropping
    /// it unfired also starts finalization
    pub server_final: oneshot::Receiver<()>,
    pub to_handler: oneshot::Sender<FinalizeOutcome>,
    pub to_upstream: oneshot::Sender<FinalizeOutcome>,
}

/// Wait for the server's final result, finalize the recording and publish
/// one outcome to both listeners.
///
/// Process shutdown skips finalization: captured audio stays on disk as raw
/// PCM and the listeners get a failure. A running transcode is not
/// interrupted.
pub(super) async fn run_finalize(
    connect_id: String,
    recorder: Option<Arc<Recorder>>,
    channels: FinalizeChannels,
    shutdown: CancellationToken,
) {
    let FinalizeChannels {
        server_final,
        to_handler,
        to_upstream,
    } = channels;

    let outcome = tokio::select! {
        _ = shutdown.cancelled() => {
            if let Some(recorder) = &recorder {
                keep_raw(&connect_id, recorder).await;
            }
            FinalizeOutcome::Failed("server shutting down".to_string())
        }
        signal = server_final => {
            if signal.is_err() {
                info!(connect_id = %connect_id, "Session ended before the final result, finalizing what was recorded");
            }
            finalize(&connect_id, recorder.as_deref()).await
        }
    };

    let _ = to_upstream.send(outcome.clone());
    let _ = to_handler.send(outcome);
}

async fn keep_raw(connect_id: &str, recorder: &Recorder) {
    match recorder.close().await {
        Some(path) => warn!(
            connect_id = %connect_id,
            "Shutting down, raw recording kept at {}",
            path.display()
        ),
        None => {
            // nothing captured: drop the empty session directory
            recorder.discard().await;
            info!(connect_id = %connect_id, "Shutting down, no audio to keep");
        }
    }
}

async fn finalize(connect_id: &str, recorder: Option<&Recorder>) -> FinalizeOutcome {
    let Some(recorder) = recorder else {
        return FinalizeOutcome::Empty;
    };
    match recorder.finalize().await {
        Ok(Some(result)) => FinalizeOutcome::Recorded(result),
        Ok(None) => FinalizeOutcome::Empty,
        Err(e) => {
            error!(connect_id = %connect_id, "Failed to finalize recording: {}", e);
            FinalizeOutcome::Failed(e.to_string())
        }
    }
}
