use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::RelayError;
use super::handshake::{FinalizeChannels, FinalizeOutcome, PhaseCell, SessionPhase, run_finalize};
use super::message::{
    CLOSE_NORMAL, CLOSE_POLICY_VIOLATION, CLOSE_TRY_AGAIN_LATER, RelayOutcome, Side,
    client_close, upstream_close,
};
use super::proxy::{ClientLoop, UpstreamLoop};
use super::upstream::connect_upstream;
use crate::core::recording::Recorder;
use crate::errors::app_error::{AppError, AppResult};
use crate::state::AppState;

/// Header carrying the identity recordings are archived under
pub const USER_ID_HEADER: &str = "x-user-id";

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// SAUC relay WebSocket handler
///
/// Rejects the upgrade with `401` when the `X-User-ID` header is missing.
/// Otherwise the socket is paired with a fresh upstream connection and
/// relayed until the completion handshake finishes.
pub async fn relay_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let owner = owner_from_headers(&headers)?;
    let connect_id = Uuid::new_v4().to_string();
    info!(connect_id = %connect_id, user_id = %owner, "Relay connection upgrade requested");

    Ok(ws
        .max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| run_session(socket, state, owner, connect_id)))
}

fn owner_from_headers(headers: &HeaderMap) -> AppResult<String> {
    let value = headers
        .get(USER_ID_HEADER)
        .ok_or_else(|| AppError::Unauthorized("userID is required".to_string()))?;
    let owner = value
        .to_str()
        .map_err(|_| AppError::BadRequest("userID must be valid ASCII".to_string()))?
        .trim();
    if owner.is_empty() {
        return Err(AppError::Unauthorized("userID is required".to_string()));
    }
    Ok(owner.to_string())
}

async fn run_session(mut socket: WebSocket, state: Arc<AppState>, owner: String, connect_id: String) {
    let upstream = match connect_upstream(&state.config.upstream, &connect_id).await {
        Ok(upstream) => upstream,
        Err(e) => {
            let (code, reason) = match e {
                RelayError::UpstreamNotConfigured => {
                    (CLOSE_POLICY_VIOLATION, "server configuration error")
                }
                _ => (CLOSE_TRY_AGAIN_LATER, "upstream unavailable"),
            };
            error!(connect_id = %connect_id, "Relay session aborted: {}", e);
            let _ = socket.send(client_close(code, reason)).await;
            return;
        }
    };

    let recorder = if state.recorder_settings.is_enabled() {
        match Recorder::create(&connect_id, &state.recorder_settings, state.converter.clone()).await
        {
            Ok(recorder) => Some(Arc::new(recorder)),
            Err(e) => {
                warn!(connect_id = %connect_id, "Recording unavailable for this session: {}", e);
                None
            }
        }
    } else {
        None
    };

    let (client_tx, client_rx) = socket.split();
    let (upstream_tx, upstream_rx) = upstream.split();

    let phase = Arc::new(PhaseCell::new());
    let cancel = CancellationToken::new();
    let (outcome_tx, mut outcome_rx) = mpsc::channel::<RelayOutcome>(2);
    let (signal_tx, signal_rx) = oneshot::channel();
    let (handler_tx, handler_rx) = oneshot::channel();
    let (finalize_tx, finalize_rx) = oneshot::channel();
    let (delivered_tx, delivered_rx) = oneshot::channel();

    let finalize_task = tokio::spawn(run_finalize(
        connect_id.clone(),
        recorder.clone(),
        FinalizeChannels {
            server_final: signal_rx,
            to_handler: handler_tx,
            to_upstream: finalize_tx,
        },
        state.shutdown.clone(),
    ));

    let client_task = tokio::spawn(
        ClientLoop {
            connect_id: connect_id.clone(),
            client_rx,
            upstream_tx,
            recorder,
            phase: phase.clone(),
            task_complete_sent: delivered_rx,
            ack_timeout: Duration::from_secs(state.config.recording.completion_timeout_seconds),
            cancel: cancel.clone(),
            outcomes: outcome_tx.clone(),
        }
        .run(),
    );

    let upstream_task = tokio::spawn(
        UpstreamLoop {
            connect_id: connect_id.clone(),
            upstream_rx,
            client_tx,
            server_final: Some(signal_tx),
            finalize: finalize_rx,
            task_complete_sent: Some(delivered_tx),
            phase: phase.clone(),
            cancel: cancel.clone(),
            outcomes: outcome_tx,
        }
        .run(),
    );

    // process shutdown ends every session
    let shutdown_guard = {
        let shutdown = state.shutdown.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => cancel.cancel(),
                _ = cancel.cancelled() => {}
            }
        })
    };

    let mut outcomes = Vec::with_capacity(2);
    while let Some(outcome) = outcome_rx.recv().await {
        if outcomes.is_empty() && !lets_client_finish(&outcome, phase.get()) {
            cancel.cancel();
        }
        log_outcome(&connect_id, &outcome);
        outcomes.push(outcome);
        if outcomes.len() == 2 {
            break;
        }
    }
    cancel.cancel();
    let _ = shutdown_guard.await;

    match (client_task.await, upstream_task.await) {
        (Ok(mut upstream_tx), Ok(mut client_tx)) => {
            let _ = upstream_tx.send(upstream_close(CLOSE_NORMAL, "")).await;
            let _ = upstream_tx.close().await;
            let _ = client_tx.send(client_close(CLOSE_NORMAL, "")).await;
            let _ = client_tx.close().await;
        }
        (client, upstream) => {
            if let Err(e) = client {
                error!(connect_id = %connect_id, "Client relay task failed: {}", e);
            }
            if let Err(e) = upstream {
                error!(connect_id = %connect_id, "Upstream relay task failed: {}", e);
            }
        }
    }
    phase.advance(SessionPhase::Closed);

    let outcome = handler_rx
        .await
        .unwrap_or_else(|_| FinalizeOutcome::Failed("finalize task ended without a result".to_string()));
    if let Err(e) = finalize_task.await {
        error!(connect_id = %connect_id, "Finalize task failed: {}", e);
    }

    match outcome {
        FinalizeOutcome::Recorded(mut result) => {
            result.owner = Some(owner);
            match &state.uploads {
                Some(uploads) => {
                    if !uploads.enqueue(result, &state.shutdown).await {
                        warn!(connect_id = %connect_id, "Recording not queued for upload, kept on disk");
                    }
                }
                None => info!(
                    connect_id = %connect_id,
                    "No archival sink configured, recording kept at {}",
                    result.file_path.display()
                ),
            }
        }
        FinalizeOutcome::Empty => info!(connect_id = %connect_id, "Session ended without a recording"),
        FinalizeOutcome::Failed(reason) => {
            warn!(connect_id = %connect_id, "Session recording not archived: {}", reason)
        }
    }
    info!(connect_id = %connect_id, "Relay session closed");
}

/// Whether the session should keep running after `first` ended one loop.
///
/// Only an upstream that went away normally after task-complete was
/// delivered leaves the client loop running, so it can still ack or time
/// out.
fn lets_client_finish(first: &RelayOutcome, phase: SessionPhase) -> bool {
    matches!(first, RelayOutcome::Closed { side: Side::Upstream, .. })
        && first.is_normal()
        && phase >= SessionPhase::TaskCompleteSent
}

fn log_outcome(connect_id: &str, outcome: &RelayOutcome) {
    if outcome.is_normal() {
        info!(connect_id = %connect_id, side = %outcome.side(), "Relay loop closed normally: {:?}", outcome);
    } else {
        warn!(connect_id = %connect_id, side = %outcome.side(), "Relay loop closed abnormally: {:?}", outcome);
    }
}
