use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ArchiveItem, ArchiveSink, UploadError};
use crate::core::recording::RecordingResult;

/// Bounded upload queue with a fixed worker set.
///
/// Started once at startup and shared by every session.
pub struct UploadPipeline {
    tx: mpsc::Sender<RecordingResult>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl UploadPipeline {
    pub fn start(
        queue_capacity: usize,
        workers: usize,
        sink: Arc<dyn ArchiveSink>,
        shutdown: CancellationToken,
    ) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel::<RecordingResult>(queue_capacity.max(1));
        let rx = Arc::new(AsyncMutex::new(rx));

        let handles = (0..workers)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    rx.clone(),
                    sink.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        info!(
            "Started {} upload workers (sink: {}, queue: {})",
            workers,
            sink.name(),
            queue_capacity.max(1)
        );

        Self {
            tx,
            shutdown,
            workers: Mutex::new(handles),
        }
    }

    /// Queue a recording for archival.
    ///
    /// Tries a non-blocking send first. When the queue is full this waits for
    /// room unless `cancel` fires, in which case the item is dropped and its
    /// file stays on disk. Returns whether the item was queued.
    pub async fn enqueue(&self, result: RecordingResult, cancel: &CancellationToken) -> bool {
        let connect_id = result.connect_id.clone();
        let result = match self.tx.try_send(result) {
            Ok(()) => {
                debug!(connect_id = %connect_id, "Recording queued for upload");
                return true;
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(connect_id = %connect_id, "Upload pipeline closed, recording left on disk");
                return false;
            }
            Err(mpsc::error::TrySendError::Full(result)) => result,
        };

        debug!(connect_id = %connect_id, "Upload queue full, waiting for room");
        let file_path = result.file_path.clone();
        tokio::select! {
            _ = cancel.cancelled() => {
                warn!(
                    connect_id = %connect_id,
                    "Cancelled while waiting for the upload queue, recording left on disk at {}",
                    file_path.display()
                );
                false
            }
            sent = self.tx.send(result) => match sent {
                Ok(()) => true,
                Err(_) => {
                    warn!(connect_id = %connect_id, "Upload pipeline closed, recording left on disk");
                    false
                }
            },
        }
    }

    /// Stop the workers and wait for them to exit.
    ///
    /// Workers finish whatever is already queued before exiting; later
    /// enqueues are refused once they are gone.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<_> = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Upload worker terminated abnormally: {}", e);
            }
        }
        info!("Upload pipeline stopped");
    }
}

async fn run_worker(
    worker_id: usize,
    rx: Arc<AsyncMutex<mpsc::Receiver<RecordingResult>>>,
    sink: Arc<dyn ArchiveSink>,
    shutdown: CancellationToken,
) {
    loop {
        let result = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = rx.recv() => match next {
                    Some(result) => result,
                    None => break,
                },
            }
        };
        process(worker_id, result, sink.as_ref()).await;
    }

    // drain what was queued before shutdown
    loop {
        let next = rx.lock().await.try_recv();
        let Ok(result) = next else { break };
        process(worker_id, result, sink.as_ref()).await;
    }
    debug!(worker_id, "Upload worker exiting");
}

async fn process(worker_id: usize, result: RecordingResult, sink: &dyn ArchiveSink) {
    let connect_id = result.connect_id.clone();
    match upload_one(&result, sink).await {
        Ok(()) => {
            info!(
                connect_id = %connect_id,
                worker_id,
                "Archived {} ({} bytes)",
                result.file_path.display(),
                result.size
            );
            cleanup(&result).await;
        }
        Err(e) => error!(
            connect_id = %connect_id,
            worker_id,
            "Upload of {} failed, file kept: {}",
            result.file_path.display(),
            e
        ),
    }
}

/// Validate one recording and deliver it to the sink.
pub(crate) async fn upload_one(
    result: &RecordingResult,
    sink: &dyn ArchiveSink,
) -> Result<(), UploadError> {
    let path = result.file_path.as_path();
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|_| invalid(path, "file does not exist"))?;
    if !metadata.is_file() {
        return Err(invalid(path, "not a regular file"));
    }
    if metadata.len() == 0 {
        return Err(invalid(path, "file is empty"));
    }
    let owner = result
        .owner
        .as_deref()
        .filter(|o| !o.is_empty())
        .ok_or(UploadError::MissingOwner)?;

    let bytes = tokio::fs::read(path).await?;
    sink.store(ArchiveItem {
        connect_id: result.connect_id.clone(),
        owner: owner.to_string(),
        file_name: result.file_name(),
        bytes: Bytes::from(bytes),
    })
    .await
}

fn invalid(path: &Path, reason: &'static str) -> UploadError {
    UploadError::InvalidFile {
        path: path.to_path_buf(),
        reason,
    }
}

async fn cleanup(result: &RecordingResult) {
    if let Err(e) = tokio::fs::remove_file(&result.file_path).await {
        warn!(
            connect_id = %result.connect_id,
            "Failed to remove archived file {}: {}",
            result.file_path.display(),
            e
        );
        return;
    }
    // only succeeds when the session directory is now empty
    if let Err(e) = tokio::fs::remove_dir(&result.dir).await {
        debug!(
            connect_id = %result.connect_id,
            "Session directory {} kept: {}",
            result.dir.display(),
            e
        );
    }
}
