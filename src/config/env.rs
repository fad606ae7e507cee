use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use super::{
    ConfigError, ConvertConfig, RecordingConfig, ServerConfig, TlsConfig, UploadConfig,
    UpstreamConfig,
};

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv {
                name,
                value,
                reason: e.to_string(),
            }),
    }
}

fn env_bool(name: &'static str) -> Result<Option<bool>, ConfigError> {
    match env_string(name) {
        None => Ok(None),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidEnv {
                name,
                value,
                reason: "expected true or false".to_string(),
            }),
        },
    }
}

/// Build the configuration from environment variables over defaults.
pub(crate) fn load_from_env() -> Result<ServerConfig, ConfigError> {
    let defaults = ServerConfig::default();

    let tls = if env_bool("TLS_ENABLED")?.unwrap_or(false) {
        Some(TlsConfig {
            cert_path: env_string("TLS_CERT_PATH").map(PathBuf::from).unwrap_or_default(),
            key_path: env_string("TLS_KEY_PATH").map(PathBuf::from).unwrap_or_default(),
        })
    } else {
        None
    };

    let upstream_defaults = UpstreamConfig::default();
    let upstream = UpstreamConfig {
        endpoint: env_string("SAUC_ENDPOINT"),
        app_key: env_string("SAUC_APP_KEY"),
        access_key: env_string("SAUC_ACCESS_KEY"),
        resource_id: env_string("SAUC_RESOURCE_ID"),
        connect_timeout_seconds: env_parse("SAUC_CONNECT_TIMEOUT_SECONDS")?
            .unwrap_or(upstream_defaults.connect_timeout_seconds),
    };

    let rec = RecordingConfig::default();
    let recording = RecordingConfig {
        dir: env_string("RECORDING_DIR").map(PathBuf::from),
        max_bytes: env_parse("RECORDING_MAX_BYTES")?.unwrap_or(rec.max_bytes),
        sample_rate: env_parse("RECORDING_SAMPLE_RATE")?.unwrap_or(rec.sample_rate),
        channels: env_parse("RECORDING_CHANNELS")?.unwrap_or(rec.channels),
        bits_per_sample: env_parse("RECORDING_BITS_PER_SAMPLE")?.unwrap_or(rec.bits_per_sample),
        completion_timeout_seconds: env_parse("RECORDING_COMPLETION_TIMEOUT_SECONDS")?
            .unwrap_or(rec.completion_timeout_seconds),
    };

    let conv = ConvertConfig::default();
    let convert = ConvertConfig {
        enabled: env_bool("CONVERT_ENABLED")?.unwrap_or(conv.enabled),
        format: env_string("CONVERT_FORMAT").unwrap_or(conv.format),
        bitrate: env_string("CONVERT_BITRATE").or(conv.bitrate),
        ffmpeg_path: env_string("CONVERT_FFMPEG_PATH").map(PathBuf::from),
        workers: env_parse("CONVERT_WORKERS")?.unwrap_or(conv.workers),
        extra_args: env_string("CONVERT_EXTRA_ARGS")
            .map(|args| args.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default(),
    };

    let up = UploadConfig::default();
    let upload = UploadConfig {
        queue_size: env_parse("UPLOAD_QUEUE_SIZE")?.unwrap_or(up.queue_size),
        workers: env_parse("UPLOAD_WORKERS")?.unwrap_or(up.workers),
        timeout_seconds: env_parse("UPLOAD_TIMEOUT_SECONDS")?.unwrap_or(up.timeout_seconds),
        endpoint: env_string("UPLOAD_ENDPOINT"),
        s3_bucket: env_string("UPLOAD_S3_BUCKET"),
        s3_region: env_string("UPLOAD_S3_REGION"),
        s3_endpoint: env_string("UPLOAD_S3_ENDPOINT"),
        s3_access_key: env_string("UPLOAD_S3_ACCESS_KEY"),
        s3_secret_key: env_string("UPLOAD_S3_SECRET_KEY"),
        s3_prefix: env_string("UPLOAD_S3_PREFIX"),
    };

    let mut config = defaults;
    if let Some(host) = env_string("HOST") {
        config.host = host;
    }
    if let Some(port) = env_parse("PORT")? {
        config.port = port;
    }
    config.tls = tls;
    config.upstream = upstream;
    config.recording = recording;
    config.convert = convert;
    config.upload = upload;
    Ok(config)
}
