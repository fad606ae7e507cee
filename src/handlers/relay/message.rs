use std::fmt;

use axum::extract::ws::{CloseFrame as ClientCloseFrame, Message as ClientMessage};
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as UpstreamCloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

pub(super) const CLOSE_NORMAL: u16 = 1000;
pub(super) const CLOSE_GOING_AWAY: u16 = 1001;
pub(super) const CLOSE_NO_STATUS: u16 = 1005;
pub(super) const CLOSE_POLICY_VIOLATION: u16 = 1008;
pub(super) const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

/// Which socket of the session a loop reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Upstream,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Client => f.write_str("client"),
            Side::Upstream => f.write_str("upstream"),
        }
    }
}

/// How a relay loop ended; each loop reports exactly one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Peer sent a close frame or the stream ended
    Closed {
        side: Side,
        code: Option<u16>,
        reason: String,
    },
    /// Client acknowledged the task-complete frame
    ClientAck,
    /// No client ack within the completion timeout
    TimedOut,
    /// Stopped by the session handler
    Cancelled { side: Side },
    Transport { side: Side, error: String },
}

impl RelayOutcome {
    pub fn side(&self) -> Side {
        match self {
            RelayOutcome::Closed { side, .. }
            | RelayOutcome::Cancelled { side }
            | RelayOutcome::Transport { side, .. } => *side,
            RelayOutcome::ClientAck | RelayOutcome::TimedOut => Side::Client,
        }
    }

    /// Normal closure: 1000, 1001 or 1005, a missing code, an ack, or a
    /// handler-initiated stop.
    pub fn is_normal(&self) -> bool {
        match self {
            RelayOutcome::Closed { code, .. } => matches!(
                code,
                None | Some(CLOSE_NORMAL | CLOSE_GOING_AWAY | CLOSE_NO_STATUS)
            ),
            RelayOutcome::ClientAck | RelayOutcome::Cancelled { .. } => true,
            RelayOutcome::TimedOut | RelayOutcome::Transport { .. } => false,
        }
    }
}

/// Translate a client frame for the upstream socket; control pings are
/// answered locally and not relayed.
pub(super) fn to_upstream(message: ClientMessage) -> Option<UpstreamMessage> {
    match message {
        ClientMessage::Binary(data) => Some(UpstreamMessage::Binary(data)),
        ClientMessage::Text(text) => Some(UpstreamMessage::Text(text.as_str().into())),
        ClientMessage::Close(frame) => Some(UpstreamMessage::Close(frame.map(|f| {
            UpstreamCloseFrame {
                code: CloseCode::from(f.code),
                reason: f.reason.as_str().into(),
            }
        }))),
        ClientMessage::Ping(_) | ClientMessage::Pong(_) => None,
    }
}

/// Translate an upstream frame for the client socket
pub(super) fn to_client(message: UpstreamMessage) -> Option<ClientMessage> {
    match message {
        UpstreamMessage::Binary(data) => Some(ClientMessage::Binary(data)),
        UpstreamMessage::Text(text) => Some(ClientMessage::Text(text.as_str().into())),
        UpstreamMessage::Close(frame) => Some(ClientMessage::Close(frame.map(|f| {
            ClientCloseFrame {
                code: u16::from(f.code),
                reason: f.reason.as_str().into(),
            }
        }))),
        UpstreamMessage::Ping(_) | UpstreamMessage::Pong(_) | UpstreamMessage::Frame(_) => None,
    }
}

pub(super) fn client_close(code: u16, reason: &str) -> ClientMessage {
    ClientMessage::Close(Some(ClientCloseFrame {
        code,
        reason: reason.into(),
    }))
}

pub(super) fn upstream_close(code: u16, reason: &str) -> UpstreamMessage {
    UpstreamMessage::Close(Some(UpstreamCloseFrame {
        code: CloseCode::from(code),
        reason: reason.into(),
    }))
}
