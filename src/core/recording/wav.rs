//! Raw PCM to WAV container

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::warn;

use super::{AudioFormat, RecorderError};

/// Wrap the raw samples in `pcm_path` into a PCM WAV file at `wav_path`.
///
/// Blocking; run it off the async runtime. Returns the number of audio
/// bytes written. A trailing partial sample frame is dropped.
pub fn write_wav(
    pcm_path: &Path,
    wav_path: &Path,
    format: &AudioFormat,
) -> Result<u64, RecorderError> {
    let source = File::open(pcm_path)?;
    let total = source.metadata()?.len();

    let block_align = u64::from(format.block_align().max(1));
    let usable = total - total % block_align;
    if usable != total {
        warn!(
            "Dropping {} trailing bytes of incomplete sample frame from {}",
            total - usable,
            pcm_path.display()
        );
    }

    let spec = WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: format.bits_per_sample,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(wav_path, spec)?;
    let mut reader = BufReader::with_capacity(64 * 1024, source).take(usable);

    match format.bits_per_sample {
        8 => {
            let mut sample = [0u8; 1];
            for _ in 0..usable {
                reader.read_exact(&mut sample)?;
                // WAV stores 8-bit PCM unsigned; hound expects it centered on zero
                writer.write_sample((i16::from(sample[0]) - 128) as i8)?;
            }
        }
        _ => {
            let mut sample = [0u8; 2];
            for _ in 0..usable / 2 {
                reader.read_exact(&mut sample)?;
                writer.write_sample(i16::from_le_bytes(sample))?;
            }
        }
    }

    writer.finalize()?;
    Ok(usable)
}
