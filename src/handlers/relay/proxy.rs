//! The two relay loops of a session

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as ClientMessage, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handshake::{FinalizeOutcome, PhaseCell, SessionPhase, TaskComplete};
use super::message::{RelayOutcome, Side, to_client, to_upstream};
use super::upstream::UpstreamSocket;
use crate::core::recording::{Recorder, RecorderError};
use crate::core::sauc::{AudioExtraction, Frame, extract_audio};

pub(super) type ClientSink = SplitSink<WebSocket, ClientMessage>;
pub(super) type ClientStream = SplitStream<WebSocket>;
pub(super) type UpstreamSink = SplitSink<UpstreamSocket, UpstreamMessage>;
pub(super) type UpstreamStream = SplitStream<UpstreamSocket>;

// =============================================================================
// Client -> upstream
// =============================================================================

/// Forwards client frames upstream, records their PCM and watches for the
/// client's final packet and acknowledgement.
pub(super) struct ClientLoop {
    pub connect_id: String,
    pub client_rx: ClientStream,
    pub upstream_tx: UpstreamSink,
    pub recorder: Option<Arc<Recorder>>,
    pub phase: Arc<PhaseCell>,
    /// Fired once the task-complete frame reached the client
    pub task_complete_sent: oneshot::Receiver<()>,
    /// Wait for the client ack, counted from task-complete delivery
    pub ack_timeout: Duration,
    pub cancel: CancellationToken,
    pub outcomes: mpsc::Sender<RelayOutcome>,
}

impl ClientLoop {
    /// Run until the session ends; hands back the upstream sink so the
    /// handler can close it.
    pub async fn run(mut self) -> UpstreamSink {
        let outcome = self.relay().await;
        match &outcome {
            RelayOutcome::ClientAck => {
                self.phase.advance(SessionPhase::Closed);
                info!(connect_id = %self.connect_id, "Client acknowledged task completion");
            }
            RelayOutcome::TimedOut => warn!(
                connect_id = %self.connect_id,
                "No client acknowledgement within {}s",
                self.ack_timeout.as_secs()
            ),
            other => debug!(connect_id = %self.connect_id, "Client loop ended: {:?}", other),
        }
        let _ = self.outcomes.send(outcome).await;
        self.upstream_tx
    }

    async fn relay(&mut self) -> RelayOutcome {
        let mut recording = self.recorder.is_some();
        let mut final_seen = false;
        let mut task_complete_seen = false;
        let mut ack_deadline: Option<Instant> = None;

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => {
                    return RelayOutcome::Cancelled { side: Side::Client };
                }
                _ = sleep_until(ack_deadline) => return RelayOutcome::TimedOut,
                sent = &mut self.task_complete_sent, if !task_complete_seen => {
                    task_complete_seen = true;
                    // dropped unfired: the upstream loop ended without delivering it
                    if sent.is_ok() {
                        ack_deadline = Some(Instant::now() + self.ack_timeout);
                    }
                    continue;
                }
                next = self.client_rx.next() => next,
            };

            let message = match next {
                None => {
                    return RelayOutcome::Closed {
                        side: Side::Client,
                        code: None,
                        reason: "EOF".to_string(),
                    };
                }
                Some(Err(e)) => {
                    return RelayOutcome::Transport {
                        side: Side::Client,
                        error: e.to_string(),
                    };
                }
                Some(Ok(message)) => message,
            };

            if let ClientMessage::Binary(data) = &message {
                match Frame::parse(data) {
                    Ok(frame) => {
                        if frame.is_client_ack() {
                            return RelayOutcome::ClientAck;
                        }
                        if frame.is_final_packet() && !final_seen {
                            info!(connect_id = %self.connect_id, "Client sent its final packet, recording stopped");
                            final_seen = true;
                            recording = false;
                            self.phase.advance(SessionPhase::AwaitingFinal);
                        }
                        if recording {
                            recording = self.record(&frame).await;
                        }
                    }
                    Err(e) => {
                        if recording {
                            warn!(connect_id = %self.connect_id, "Unparseable client frame, recording stopped: {}", e);
                            recording = false;
                        }
                    }
                }
            }

            let close = match &message {
                ClientMessage::Close(frame) => Some(RelayOutcome::Closed {
                    side: Side::Client,
                    code: frame.as_ref().map(|f| f.code),
                    reason: frame
                        .as_ref()
                        .map(|f| f.reason.as_str().to_string())
                        .unwrap_or_default(),
                }),
                _ => None,
            };

            if let Some(forward) = to_upstream(message)
                && let Err(e) = self.upstream_tx.send(forward).await
            {
                if let Some(close) = close {
                    return close;
                }
                return RelayOutcome::Transport {
                    side: Side::Upstream,
                    error: e.to_string(),
                };
            }

            if let Some(close) = close {
                return close;
            }
        }
    }

    /// Append the frame's audio; returns whether recording continues
    async fn record(&self, frame: &Frame) -> bool {
        let Some(recorder) = &self.recorder else {
            return false;
        };
        match extract_audio(frame) {
            Ok(AudioExtraction::Audio(pcm)) => match recorder.append(&pcm).await {
                Ok(()) => true,
                Err(RecorderError::Closed) => {
                    info!(connect_id = %self.connect_id, "Recording closed, further audio is not recorded");
                    false
                }
                Err(e) => {
                    warn!(connect_id = %self.connect_id, "Recording write failed, recording stopped: {}", e);
                    false
                }
            },
            Ok(AudioExtraction::Metadata) => true,
            Ok(AudioExtraction::Unhandled) => {
                debug!(connect_id = %self.connect_id, "Client frame of type {:?} not recorded", frame.message_type);
                true
            }
            Err(e) => {
                warn!(connect_id = %self.connect_id, "Audio extraction failed, recording stopped: {}", e);
                false
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// Upstream -> client
// =============================================================================

/// Forwards upstream frames to the client, signals the server's final
/// response and delivers the task-complete frame.
pub(super) struct UpstreamLoop {
    pub connect_id: String,
    pub upstream_rx: UpstreamStream,
    pub client_tx: ClientSink,
    pub server_final: Option<oneshot::Sender<()>>,
    pub finalize: oneshot::Receiver<FinalizeOutcome>,
    /// Arms the client loop's ack deadline
    pub task_complete_sent: Option<oneshot::Sender<()>>,
    pub phase: Arc<PhaseCell>,
    pub cancel: CancellationToken,
    pub outcomes: mpsc::Sender<RelayOutcome>,
}

impl UpstreamLoop {
    /// Run until the session ends; hands back the client sink.
    pub async fn run(mut self) -> ClientSink {
        let outcome = self.relay().await;
        debug!(connect_id = %self.connect_id, "Upstream loop ended: {:?}", outcome);
        // unfired, this still lets the finalize task proceed
        self.server_final.take();
        let _ = self.outcomes.send(outcome).await;
        self.client_tx
    }

    async fn relay(&mut self) -> RelayOutcome {
        let mut server_final_seen = false;
        let mut task_complete_pending = true;
        // set once the upstream has gone away after its final response
        let mut upstream_end: Option<RelayOutcome> = None;

        loop {
            if let Some(end) = &upstream_end
                && !task_complete_pending
            {
                return end.clone();
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return RelayOutcome::Cancelled { side: Side::Upstream };
                }
                outcome = &mut self.finalize, if task_complete_pending && server_final_seen => {
                    task_complete_pending = false;
                    let outcome = match outcome {
                        Ok(outcome) => outcome,
                        Err(_) => FinalizeOutcome::Failed("finalize task ended without a result".to_string()),
                    };
                    if let Err(error) = self.send_task_complete(&outcome).await {
                        return RelayOutcome::Transport { side: Side::Client, error };
                    }
                }
                next = self.upstream_rx.next(), if upstream_end.is_none() => {
                    let message = match next {
                        Some(Ok(message)) => message,
                        end => {
                            let outcome = match end {
                                Some(Err(e)) => RelayOutcome::Transport {
                                    side: Side::Upstream,
                                    error: e.to_string(),
                                },
                                _ => RelayOutcome::Closed {
                                    side: Side::Upstream,
                                    code: None,
                                    reason: "EOF".to_string(),
                                },
                            };
                            if server_final_seen {
                                debug!(connect_id = %self.connect_id, "Upstream gone after its final response");
                                upstream_end = Some(outcome);
                                continue;
                            }
                            return outcome;
                        }
                    };

                    if let UpstreamMessage::Binary(data) = &message
                        && let Ok(frame) = Frame::parse(data)
                        && frame.is_server_final()
                        && !server_final_seen
                    {
                        server_final_seen = true;
                        info!(connect_id = %self.connect_id, "Upstream sent its final result");
                        if let Some(signal) = self.server_final.take() {
                            let _ = signal.send(());
                        }
                    }

                    if let UpstreamMessage::Close(frame) = &message {
                        let closed = RelayOutcome::Closed {
                            side: Side::Upstream,
                            code: frame.as_ref().map(|f| u16::from(f.code)),
                            reason: frame.as_ref().map(|f| f.reason.as_str().to_string()).unwrap_or_default(),
                        };
                        if server_final_seen {
                            // the client still owes its ack
                            upstream_end = Some(closed);
                            continue;
                        }
                        if let Some(forward) = to_client(message) {
                            let _ = self.client_tx.send(forward).await;
                        }
                        return closed;
                    }

                    if let Some(forward) = to_client(message)
                        && let Err(e) = self.client_tx.send(forward).await
                    {
                        return RelayOutcome::Transport {
                            side: Side::Client,
                            error: e.to_string(),
                        };
                    }
                }
            }
        }
    }

    async fn send_task_complete(&mut self, outcome: &FinalizeOutcome) -> Result<(), String> {
        let message = TaskComplete::from_outcome(&self.connect_id, outcome);
        let frame = message.to_frame().map_err(|e| {
            error!(connect_id = %self.connect_id, "Failed to encode task-complete: {}", e);
            e.to_string()
        })?;
        self.client_tx
            .send(ClientMessage::Binary(frame))
            .await
            .map_err(|e| e.to_string())?;
        self.phase.advance(SessionPhase::TaskCompleteSent);
        if let Some(signal) = self.task_complete_sent.take() {
            let _ = signal.send(());
        }
        info!(
            connect_id = %self.connect_id,
            status = ?message.status,
            "Task-complete sent, waiting for client acknowledgement"
        );
        Ok(())
    }
}
