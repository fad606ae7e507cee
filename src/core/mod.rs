pub mod convert;
pub mod recording;
pub mod sauc;
pub mod upload;

pub use convert::{ConvertError, ConverterPool, FfmpegTranscoder};
pub use recording::{Recorder, RecorderError, RecorderSettings, RecordingResult};
pub use sauc::{Frame, FrameError, MessageType};
pub use upload::{ArchiveSink, UploadError, UploadPipeline};
