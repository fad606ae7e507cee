//! Archival format conversion.
//!
//! A finished recording is handed to a process-wide [`ConverterPool`]: a
//! fixed set of long-lived workers draining a bounded queue. Each worker runs
//! the external ffmpeg tool ([`FfmpegTranscoder`]) or, when no tool is
//! configured, passes the input through unchanged so callers never block on
//! a pool that can make no progress.

mod ffmpeg;
mod pool;

use std::path::PathBuf;
use thiserror::Error;

pub use ffmpeg::{FfmpegTranscoder, RawAudioParams, TranscodeOptions, resolve_ffmpeg};
pub use pool::{ConvertRequest, ConverterPool};

/// Conversion errors (the transcoder failed or the pool is gone)
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("input file not accessible: {path}: {source}")]
    InputMissing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("convert from raw PCM: {0} is required")]
    MissingRawParameter(&'static str),

    #[error("failed to start ffmpeg: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("ffmpeg convert to {format} failed: {stderr}")]
    Failed { format: String, stderr: String },

    #[error("converter pool is shut down")]
    PoolClosed,
}
