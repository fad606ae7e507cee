use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{ConvertError, FfmpegTranscoder, RawAudioParams};

/// One conversion job submitted by a finalizing recorder
#[derive(Debug, Clone)]
pub struct ConvertRequest {
    /// Session the recording belongs to (for logging)
    pub connect_id: String,
    pub input: PathBuf,
    /// Required when `input` is headerless PCM
    pub raw: Option<RawAudioParams>,
}

struct ConvertTask {
    request: ConvertRequest,
    reply: oneshot::Sender<Result<PathBuf, ConvertError>>,
}

/// Bounded pool of persistent conversion workers.
///
/// Constructed once at startup and shared by every session. Tasks from
/// different sessions interleave freely; each caller waits only on its own
/// reply channel.
pub struct ConverterPool {
    tx: mpsc::Sender<ConvertTask>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    transcoding: bool,
}

impl ConverterPool {
    /// Spawn `workers` workers over a queue of `queue_capacity` tasks.
    ///
    /// With `transcoder = None` every task completes immediately with its
    /// input path.
    pub fn start(
        workers: usize,
        queue_capacity: usize,
        transcoder: Option<FfmpegTranscoder>,
        shutdown: CancellationToken,
    ) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel::<ConvertTask>(queue_capacity.max(1));
        let rx = Arc::new(AsyncMutex::new(rx));
        let transcoding = transcoder.is_some();
        let transcoder = transcoder.map(Arc::new);

        let handles = (0..workers)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    rx.clone(),
                    transcoder.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        if transcoding {
            info!("Started {} convert workers", workers);
        } else {
            warn!(
                "Started {} convert workers without a transcoder; recordings are kept as WAV",
                workers
            );
        }

        Self {
            tx,
            shutdown,
            workers: Mutex::new(handles),
            transcoding,
        }
    }

    /// Whether workers run an external transcoder (false = pass-through)
    pub fn is_transcoding(&self) -> bool {
        self.transcoding
    }

    /// Queue a conversion and wait for its result.
    pub async fn convert(&self, request: ConvertRequest) -> Result<PathBuf, ConvertError> {
        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(ConvertTask { request, reply })
            .await
            .map_err(|_| ConvertError::PoolClosed)?;
        reply_rx.await.map_err(|_| ConvertError::PoolClosed)?
    }

    /// Stop the workers and wait for them to exit.
    ///
    /// A conversion already running finishes first; queued tasks are dropped
    /// and their callers receive [`ConvertError::PoolClosed`].
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<_> = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Convert worker terminated abnormally: {}", e);
            }
        }
        info!("Converter pool stopped");
    }
}

async fn run_worker(
    worker_id: usize,
    rx: Arc<AsyncMutex<mpsc::Receiver<ConvertTask>>>,
    transcoder: Option<Arc<FfmpegTranscoder>>,
    shutdown: CancellationToken,
) {
    loop {
        let task = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                task = rx.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            }
        };

        let ConvertTask { request, reply } = task;
        let result = match &transcoder {
            Some(transcoder) => {
                info!(
                    connect_id = %request.connect_id,
                    worker_id,
                    "Converting {} to {}",
                    request.input.display(),
                    transcoder.target_format()
                );
                let result = transcoder
                    .convert(&request.input, request.raw.as_ref())
                    .await;
                match &result {
                    Ok(path) => {
                        info!(connect_id = %request.connect_id, "Conversion done: {}", path.display())
                    }
                    Err(e) => error!(connect_id = %request.connect_id, "Conversion failed: {}", e),
                }
                result
            }
            None => Ok(request.input),
        };

        if reply.send(result).is_err() {
            warn!("Convert caller went away before the result was ready");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_pass_through_returns_input() {
        let pool = ConverterPool::start(2, 4, None, CancellationToken::new());
        assert!(!pool.is_transcoding());

        let path = pool
            .convert(ConvertRequest {
                connect_id: "c1".to_string(),
                input: PathBuf::from("/tmp/x.wav"),
                raw: None,
            })
            .await
            .unwrap();
        assert_eq!(path, PathBuf::from("/tmp/x.wav"));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_callers_get_their_own_results() {
        let pool = Arc::new(ConverterPool::start(3, 2, None, CancellationToken::new()));
        let mut handles = Vec::new();
        for i in 0..20 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let input = PathBuf::from(format!("/rec/{i}.wav"));
                let out = pool
                    .convert(ConvertRequest {
                        connect_id: format!("c{i}"),
                        input: input.clone(),
                        raw: None,
                    })
                    .await
                    .unwrap();
                assert_eq!(out, input);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_convert_after_shutdown_fails() {
        let pool = ConverterPool::start(1, 1, None, CancellationToken::new());
        pool.shutdown().await;

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            pool.convert(ConvertRequest {
                connect_id: "late".to_string(),
                input: PathBuf::from("/tmp/late.wav"),
                raw: None,
            }),
        )
        .await
        .expect("convert must not hang after shutdown");
        assert!(matches!(result, Err(ConvertError::PoolClosed)));
    }

    #[tokio::test]
    async fn test_transcoder_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.wav");
        tokio::fs::write(&input, b"RIFF").await.unwrap();

        let transcoder = FfmpegTranscoder::new(
            dir.path().join("missing-ffmpeg"),
            super::super::TranscodeOptions {
                target_format: "ogg".to_string(),
                audio_bitrate: None,
                extra_args: Vec::new(),
                delete_input: true,
            },
        );
        let pool = ConverterPool::start(1, 1, Some(transcoder), CancellationToken::new());
        assert!(pool.is_transcoding());

        let err = pool
            .convert(ConvertRequest {
                connect_id: "c".to_string(),
                input: input.clone(),
                raw: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Spawn(_)));
        pool.shutdown().await;
    }
}
