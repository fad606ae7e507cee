//! Per-session audio recording.
//!
//! A [`Recorder`] captures the PCM a client streams during one relay
//! session into a capped file. Finalizing it wraps the samples in a WAV
//! container and hands the file to the converter pool; the resulting
//! [`RecordingResult`] is what the upload pipeline archives.
//!
//! Recording is a side effect of the live session: every failure here is
//! reported to the caller, which decides to stop recording and carry on
//! relaying.

mod recorder;
mod wav;

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::config::RecordingConfig;
use crate::core::convert::ConvertError;

pub use recorder::Recorder;
pub use wav::write_wav;

/// Recorder errors
#[derive(Debug, Error)]
pub enum RecorderError {
    /// Recording is switched off for this process (no usable storage root)
    #[error("recorder disabled")]
    Disabled,

    /// Size cap reached, or the recorder was already finalized/discarded
    #[error("recorder closed")]
    Closed,

    #[error("recording I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to write WAV container: {0}")]
    Wav(#[from] hound::Error),

    #[error("failed to format recording timestamp: {0}")]
    Timestamp(#[from] time::error::Format),

    #[error("recording conversion failed: {0}")]
    Convert(#[from] ConvertError),
}

/// Raw PCM layout of the recorded stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    pub fn bytes_per_sample(&self) -> u16 {
        self.bits_per_sample / 8
    }

    /// Bytes per sample frame (all channels)
    pub fn block_align(&self) -> u16 {
        self.channels * self.bytes_per_sample()
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * u32::from(self.block_align())
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            bits_per_sample: 16,
        }
    }
}

/// Process-wide recorder settings, resolved once at startup
#[derive(Debug, Clone)]
pub struct RecorderSettings {
    /// Storage root; `None` disables recording for every session
    pub root: Option<PathBuf>,
    pub max_bytes: u64,
    pub format: AudioFormat,
}

impl RecorderSettings {
    /// Resolve settings and make sure the storage root exists.
    ///
    /// An unset root, or one that cannot be created, disables recording
    /// rather than failing startup.
    pub fn prepare(config: &RecordingConfig) -> Self {
        let root = match config.dir.as_deref() {
            None => {
                info!("Recording directory not configured, session recording disabled");
                None
            }
            Some(dir) if dir.as_os_str().is_empty() => {
                info!("Recording directory is empty, session recording disabled");
                None
            }
            Some(dir) => match std::fs::create_dir_all(dir) {
                Ok(()) => {
                    info!("Session recordings stored under {}", dir.display());
                    Some(dir.to_path_buf())
                }
                Err(e) => {
                    warn!(
                        "Recording directory {} unavailable, session recording disabled: {}",
                        dir.display(),
                        e
                    );
                    None
                }
            },
        };

        Self {
            root,
            max_bytes: config.max_bytes,
            format: AudioFormat {
                sample_rate: config.sample_rate,
                channels: config.channels,
                bits_per_sample: config.bits_per_sample,
            },
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.root.is_some()
    }

    /// Settings rooted at `root` with the default audio format
    pub fn with_root(root: impl AsRef<Path>, max_bytes: u64) -> Self {
        Self {
            root: Some(root.as_ref().to_path_buf()),
            max_bytes,
            format: AudioFormat::default(),
        }
    }
}

/// Metadata of a finished recording, ready for archival
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingResult {
    pub connect_id: String,
    /// Identity the archive is stored under; set by the session handler
    pub owner: Option<String>,
    pub file_path: PathBuf,
    /// Per-session directory containing `file_path`
    pub dir: PathBuf,
    pub size: u64,
    pub started_at: OffsetDateTime,
    pub ended_at: OffsetDateTime,
}

impl RecordingResult {
    pub fn duration(&self) -> Duration {
        (self.ended_at - self.started_at)
            .try_into()
            .unwrap_or(Duration::ZERO)
    }

    pub fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.bin", self.connect_id))
    }
}
