//! Archival of finished recordings.
//!
//! The [`UploadPipeline`] is a bounded queue drained by a fixed set of
//! workers. Each worker validates one [`RecordingResult`], hands its bytes
//! to an [`ArchiveSink`], and cleans up the local copy once the sink
//! accepted it. Every item gets exactly one delivery attempt; a failure
//! leaves the file on disk and is only logged.
//!
//! [`RecordingResult`]: crate::core::recording::RecordingResult

mod pipeline;
mod sink;

use std::path::PathBuf;

use thiserror::Error;

pub use pipeline::UploadPipeline;
pub use sink::{ArchiveItem, ArchiveSink, HttpArchiveSink, ObjectStoreSink, build_sink};

/// Upload errors, terminal for the item they concern
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid archive file {path}: {reason}")]
    InvalidFile { path: PathBuf, reason: &'static str },

    #[error("recording has no owner identity")]
    MissingOwner,

    #[error("archive I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The HTTP sink answered with a status of 300 or above
    #[error("archive rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("archive request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("object store error: {0}")]
    Store(#[from] object_store::Error),

    #[error("archive sink misconfigured: {0}")]
    Config(String),
}
