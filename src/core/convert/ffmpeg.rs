//! ffmpeg subprocess wrapper

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, error};

use super::ConvertError;

/// Output settings applied to every conversion
#[derive(Debug, Clone)]
pub struct TranscodeOptions {
    /// Target container/extension, lowercase without a dot (e.g. "ogg")
    pub target_format: String,
    /// Audio bitrate passed as `-b:a` (e.g. "64k")
    pub audio_bitrate: Option<String>,
    /// Raw arguments appended before the output path
    pub extra_args: Vec<String>,
    /// Remove the source file after a successful conversion
    pub delete_input: bool,
}

/// Format description for headerless inputs (`.pcm`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAudioParams {
    /// ffmpeg sample format name (e.g. "s16le")
    pub sample_format: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl RawAudioParams {
    /// Raw parameters for little-endian integer PCM of the given depth
    pub fn for_pcm(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        let sample_format = match bits_per_sample {
            8 => "u8",
            _ => "s16le",
        };
        Self {
            sample_format: sample_format.to_string(),
            sample_rate,
            channels,
        }
    }
}

/// Converts audio files with an external ffmpeg binary
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    bin_path: PathBuf,
    opts: TranscodeOptions,
}

impl FfmpegTranscoder {
    pub fn new(bin_path: PathBuf, opts: TranscodeOptions) -> Self {
        Self { bin_path, opts }
    }

    pub fn target_format(&self) -> &str {
        &self.opts.target_format
    }

    /// Output path for an input: same stem, target extension
    pub fn output_path(&self, input: &Path) -> PathBuf {
        input.with_extension(&self.opts.target_format)
    }

    /// Build the ffmpeg argument list for one conversion.
    pub fn build_args(
        &self,
        input: &Path,
        raw: Option<&RawAudioParams>,
    ) -> Result<Vec<String>, ConvertError> {
        let mut args = vec!["-y".to_string()];

        let is_raw = input
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pcm"));
        if is_raw {
            let raw = raw.ok_or(ConvertError::MissingRawParameter("sample rate"))?;
            if raw.sample_format.is_empty() {
                return Err(ConvertError::MissingRawParameter("format"));
            }
            if raw.sample_rate == 0 {
                return Err(ConvertError::MissingRawParameter("sample rate"));
            }
            if raw.channels == 0 {
                return Err(ConvertError::MissingRawParameter("channels"));
            }
            args.extend([
                "-f".to_string(),
                raw.sample_format.clone(),
                "-ar".to_string(),
                raw.sample_rate.to_string(),
                "-ac".to_string(),
                raw.channels.to_string(),
            ]);
        }

        args.extend([
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
            "-vn".to_string(),
        ]);
        if let Some(bitrate) = self.opts.audio_bitrate.as_ref().filter(|b| !b.is_empty()) {
            args.extend(["-b:a".to_string(), bitrate.clone()]);
        }
        args.extend(self.opts.extra_args.iter().cloned());
        args.push(self.output_path(input).to_string_lossy().into_owned());

        Ok(args)
    }

    /// Convert `input` to the target format and return the output path.
    ///
    /// The subprocess is not killed if the caller stops waiting; it runs to
    /// completion.
    pub async fn convert(
        &self,
        input: &Path,
        raw: Option<&RawAudioParams>,
    ) -> Result<PathBuf, ConvertError> {
        tokio::fs::metadata(input)
            .await
            .map_err(|source| ConvertError::InputMissing {
                path: input.to_path_buf(),
                source,
            })?;

        let args = self.build_args(input, raw)?;
        let target = self.output_path(input);
        debug!("Running {} {}", self.bin_path.display(), args.join(" "));

        let output = Command::new(&self.bin_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(ConvertError::Spawn)?;

        if !output.status.success() {
            return Err(ConvertError::Failed {
                format: self.opts.target_format.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        if self.opts.delete_input
            && let Err(e) = tokio::fs::remove_file(input).await
        {
            error!("Failed to remove converter input {}: {}", input.display(), e);
        }

        Ok(target)
    }
}

/// Locate the ffmpeg binary.
///
/// A configured path is used when it points at a file; a bare name (or no
/// configuration) is looked up on `PATH`.
pub fn resolve_ffmpeg(configured: Option<&Path>) -> Option<PathBuf> {
    let candidate = configured.unwrap_or_else(|| Path::new("ffmpeg"));
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(candidate))
        .find(|full| full.is_file())
}
