use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ConvertConfig, ServerConfig};
use crate::core::convert::{ConverterPool, FfmpegTranscoder, TranscodeOptions, resolve_ffmpeg};
use crate::core::recording::RecorderSettings;
use crate::core::upload::{UploadError, UploadPipeline, build_sink};

/// Application state shared by every request and session
///
/// Holds the resolved configuration and the process-wide pools. Sessions
/// borrow the converter pool and upload pipeline through this state.
pub struct AppState {
    pub config: ServerConfig,
    pub recorder_settings: RecorderSettings,
    pub converter: Arc<ConverterPool>,
    /// `None` when no archival sink is configured; recordings stay on disk
    pub uploads: Option<Arc<UploadPipeline>>,
    /// Cancelled once when the process shuts down
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Resolve recorder settings and start the converter pool and upload
    /// pipeline.
    pub async fn new(config: ServerConfig) -> Result<Arc<Self>, UploadError> {
        let recorder_settings = RecorderSettings::prepare(&config.recording);

        let converter = Arc::new(ConverterPool::start(
            config.convert.workers,
            config.convert.queue_capacity(),
            build_transcoder(&config.convert),
            CancellationToken::new(),
        ));

        let uploads = match build_sink(&config.upload)? {
            Some(sink) => Some(Arc::new(UploadPipeline::start(
                config.upload.queue_capacity(),
                config.upload.workers,
                sink,
                CancellationToken::new(),
            ))),
            None => {
                info!("No archival sink configured, recordings are kept on disk");
                None
            }
        };

        Ok(Arc::new(Self {
            config,
            recorder_settings,
            converter,
            uploads,
            shutdown: CancellationToken::new(),
        }))
    }

    /// End running sessions, then drain the upload pipeline and stop the
    /// converter pool.
    pub async fn shutdown(&self) {
        info!("Shutting down relay sessions");
        self.shutdown.cancel();
        if let Some(uploads) = &self.uploads {
            uploads.shutdown().await;
        }
        self.converter.shutdown().await;
        info!("Shutdown complete");
    }
}

fn build_transcoder(config: &ConvertConfig) -> Option<FfmpegTranscoder> {
    if !config.enabled {
        info!("Conversion disabled, recordings are kept as WAV");
        return None;
    }
    let Some(bin_path) = resolve_ffmpeg(config.ffmpeg_path.as_deref()) else {
        warn!("ffmpeg not found, recordings are kept as WAV");
        return None;
    };
    info!(
        "Converting recordings to {} with {}",
        config.format,
        bin_path.display()
    );
    Some(FfmpegTranscoder::new(
        bin_path,
        TranscodeOptions {
            target_format: config.format.to_lowercase(),
            audio_bitrate: config.bitrate.clone(),
            extra_args: config.extra_args.clone(),
            delete_input: true,
        },
    ))
}
