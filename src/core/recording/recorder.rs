use std::path::PathBuf;
use std::sync::Arc;

use time::OffsetDateTime;
use time::macros::format_description;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{AudioFormat, RecorderError, RecorderSettings, RecordingResult, write_wav};
use crate::core::convert::{ConvertRequest, ConverterPool};

enum State {
    Recording(File),
    /// Cap reached or write side closed; still awaiting finalize
    Closed,
    Finalized(Option<RecordingResult>),
    Discarded,
}

struct Inner {
    state: State,
    /// Current on-disk artifact (.pcm, then .wav, then the converted file)
    path: PathBuf,
    total: u64,
}

/// Capped PCM sink for one relay session.
///
/// Writes, finalize and discard are serialized internally, so the relay loop
/// and the finalize task can share one `Arc<Recorder>`.
pub struct Recorder {
    connect_id: String,
    dir: PathBuf,
    format: AudioFormat,
    max_bytes: u64,
    started_at: OffsetDateTime,
    converter: Arc<ConverterPool>,
    inner: Mutex<Inner>,
}

impl Recorder {
    /// Create the session directory and open a fresh `.pcm` file.
    ///
    /// Layout: `{root}/{YYYY_MM_DD}/{connect_id}/Meeting_{YYYY_MM_DD_HHMMSS}.pcm`
    pub async fn create(
        connect_id: &str,
        settings: &RecorderSettings,
        converter: Arc<ConverterPool>,
    ) -> Result<Self, RecorderError> {
        let root = settings.root.as_ref().ok_or(RecorderError::Disabled)?;
        let started_at = OffsetDateTime::now_utc();

        let day = started_at.format(format_description!("[year]_[month]_[day]"))?;
        let dir = root.join(day).join(connect_id);
        fs::create_dir_all(&dir).await?;

        let stamp =
            started_at.format(format_description!("[year]_[month]_[day]_[hour][minute][second]"))?;
        let path = dir.join(format!("Meeting_{stamp}.pcm"));
        let file = File::create(&path).await?;
        info!(connect_id = %connect_id, "Recording to {}", path.display());

        Ok(Self {
            connect_id: connect_id.to_string(),
            dir,
            format: settings.format,
            max_bytes: settings.max_bytes,
            started_at,
            converter,
            inner: Mutex::new(Inner {
                state: State::Recording(file),
                path,
                total: 0,
            }),
        })
    }

    pub fn connect_id(&self) -> &str {
        &self.connect_id
    }

    /// Per-session directory holding the recording
    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    pub async fn bytes_written(&self) -> u64 {
        self.inner.lock().await.total
    }

    /// Whether further appends will be rejected
    pub async fn is_closed(&self) -> bool {
        !matches!(self.inner.lock().await.state, State::Recording(_))
    }

    /// Append raw PCM.
    ///
    /// A chunk that would push the file past the size cap is rejected whole;
    /// the file is closed and every later append fails with
    /// [`RecorderError::Closed`].
    pub async fn append(&self, pcm: &[u8]) -> Result<(), RecorderError> {
        if pcm.is_empty() {
            return Ok(());
        }

        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let State::Recording(file) = &mut inner.state else {
            return Err(RecorderError::Closed);
        };

        if inner.total + pcm.len() as u64 > self.max_bytes {
            file.flush().await?;
            inner.state = State::Closed;
            warn!(
                connect_id = %self.connect_id,
                "Recording reached size cap of {} bytes, closing file",
                self.max_bytes
            );
            return Err(RecorderError::Closed);
        }

        file.write_all(pcm).await?;
        inner.total += pcm.len() as u64;
        Ok(())
    }

    /// Close the file, wrap it as WAV and run it through the converter.
    ///
    /// Returns `Ok(None)` for an empty recording, whose file and directory
    /// are removed. Later calls return the first outcome without repeating
    /// any work; a failed finalize reports `Ok(None)` on retry.
    pub async fn finalize(&self) -> Result<Option<RecordingResult>, RecorderError> {
        let mut inner = self.inner.lock().await;

        match std::mem::replace(&mut inner.state, State::Closed) {
            State::Finalized(result) => {
                inner.state = State::Finalized(result.clone());
                return Ok(result);
            }
            State::Discarded => {
                inner.state = State::Discarded;
                return Ok(None);
            }
            State::Recording(mut file) => file.flush().await?,
            State::Closed => {}
        }

        let result = self.finish(&mut inner).await;
        inner.state = State::Finalized(result.as_ref().ok().cloned().flatten());
        result
    }

    async fn finish(&self, inner: &mut Inner) -> Result<Option<RecordingResult>, RecorderError> {
        if inner.total == 0 {
            remove_quietly(&inner.path).await;
            if let Err(e) = fs::remove_dir(&self.dir).await {
                debug!(connect_id = %self.connect_id, "Session directory kept: {}", e);
            }
            info!(connect_id = %self.connect_id, "Empty recording discarded");
            return Ok(None);
        }

        let pcm_path = inner.path.clone();
        let wav_path = pcm_path.with_extension("wav");
        let format = self.format;
        {
            let (pcm_path, wav_path) = (pcm_path.clone(), wav_path.clone());
            tokio::task::spawn_blocking(move || write_wav(&pcm_path, &wav_path, &format))
                .await
                .map_err(std::io::Error::other)??;
        }
        remove_quietly(&pcm_path).await;
        inner.path = wav_path.clone();

        let converted = self
            .converter
            .convert(ConvertRequest {
                connect_id: self.connect_id.clone(),
                input: wav_path,
                raw: None,
            })
            .await?;
        inner.path = converted.clone();

        let size = fs::metadata(&converted).await?.len();
        let result = RecordingResult {
            connect_id: self.connect_id.clone(),
            owner: None,
            file_path: converted,
            dir: self.dir.clone(),
            size,
            started_at: self.started_at,
            ended_at: OffsetDateTime::now_utc(),
        };
        info!(
            connect_id = %self.connect_id,
            "Recording finalized: {} ({} bytes, {} audio bytes)",
            result.file_path.display(),
            result.size,
            inner.total
        );
        Ok(Some(result))
    }

    /// Stop recording and leave what was written on disk, unfinalized.
    ///
    /// Returns the raw file when it holds audio; `None` when nothing was
    /// written or the recorder is already past recording.
    pub async fn close(&self) -> Option<PathBuf> {
        let mut inner = self.inner.lock().await;
        match std::mem::replace(&mut inner.state, State::Closed) {
            State::Recording(mut file) => {
                if let Err(e) = file.flush().await {
                    warn!(connect_id = %self.connect_id, "Failed to flush recording: {}", e);
                }
            }
            State::Closed => {}
            other => {
                inner.state = other;
                return None;
            }
        }
        (inner.total > 0).then(|| inner.path.clone())
    }

    /// Force-close and delete everything this recorder wrote.
    ///
    /// A recording already finalized with a result belongs to the archival
    /// path and is left alone.
    pub async fn discard(&self) {
        let mut inner = self.inner.lock().await;
        match std::mem::replace(&mut inner.state, State::Discarded) {
            State::Finalized(Some(result)) => {
                inner.state = State::Finalized(Some(result));
                return;
            }
            State::Discarded => return,
            State::Recording(file) => drop(file),
            State::Closed | State::Finalized(None) => {}
        }

        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => info!(connect_id = %self.connect_id, "Recording discarded"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                connect_id = %self.connect_id,
                "Failed to remove recording directory {}: {}",
                self.dir.display(),
                e
            ),
        }
    }
}

async fn remove_quietly(path: &std::path::Path) {
    if let Err(e) = fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}
