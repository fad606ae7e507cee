//! SAUC relay sessions
//!
//! Each accepted client socket is paired with a fresh upstream connection to
//! the recognition service. Two relay loops forward frames verbatim in both
//! directions while the client's audio is recorded on the side. A finalize
//! task turns the recording into an archive once the upstream has sent its
//! final result, and the client is told about it with a synthesized
//! task-complete frame before the session closes.
//!
//! ```text
//!   client ──ws──▶ client loop ──────────▶ upstream
//!                     │ append PCM
//!                     ▼
//!                  Recorder ◀── finalize task ◀── server final signal
//!                                   │                    ▲
//!                                   ▼                    │
//!   client ◀──ws── upstream loop ◀─ outcome ─────────── upstream
//! ```

mod handler;
mod handshake;
mod message;
mod proxy;
mod upstream;

use thiserror::Error;

pub use handler::relay_handler;
pub use handshake::{FinalizeOutcome, SessionPhase, TaskComplete, TaskStatus};
pub use message::{RelayOutcome, Side};

/// Upstream dial errors
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("upstream is not configured")]
    UpstreamNotConfigured,

    #[error("failed to connect upstream: {0}")]
    UpstreamConnect(String),
}
