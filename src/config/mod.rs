//! Configuration module for the SAUC gateway
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//! The configuration is resolved once at startup and validated before use.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use sauc_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid value for {name}: {value:?} ({reason})")]
    InvalidEnv {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Recognition service every session is relayed to
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// WebSocket URL of the SAUC endpoint
    pub endpoint: Option<String>,
    pub app_key: Option<String>,
    pub access_key: Option<String>,
    pub resource_id: Option<String>,
    pub connect_timeout_seconds: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            app_key: None,
            access_key: None,
            resource_id: None,
            connect_timeout_seconds: 10,
        }
    }
}

impl UpstreamConfig {
    /// Whether every value needed to dial the upstream is present
    pub fn is_configured(&self) -> bool {
        [
            &self.endpoint,
            &self.app_key,
            &self.access_key,
            &self.resource_id,
        ]
        .iter()
        .all(|value| value.as_deref().is_some_and(|v| !v.trim().is_empty()))
    }
}

/// Session recording settings
#[derive(Debug, Clone)]
pub struct RecordingConfig {
    /// Storage root; unset disables recording
    pub dir: Option<PathBuf>,
    /// Per-session cap on raw PCM bytes
    pub max_bytes: u64,
    pub sample_rate: u32,
    pub channels: u16,
    /// 8 or 16
    pub bits_per_sample: u16,
    /// How long a session waits for the client ack after its final packet
    pub completion_timeout_seconds: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_bytes: 256 * 1024 * 1024,
            sample_rate: 16000,
            channels: 1,
            bits_per_sample: 16,
            completion_timeout_seconds: 60,
        }
    }
}

/// Transcoding of finished recordings
#[derive(Debug, Clone)]
pub struct ConvertConfig {
    pub enabled: bool,
    pub format: String,
    pub bitrate: Option<String>,
    /// Explicit ffmpeg binary; `ffmpeg` on `PATH` when unset
    pub ffmpeg_path: Option<PathBuf>,
    pub workers: usize,
    pub extra_args: Vec<String>,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: "ogg".to_string(),
            bitrate: Some("64k".to_string()),
            ffmpeg_path: None,
            workers: 5,
            extra_args: Vec::new(),
        }
    }
}

impl ConvertConfig {
    pub fn queue_capacity(&self) -> usize {
        self.workers.max(1) * 2
    }
}

/// Archival upload settings
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub queue_size: usize,
    pub workers: usize,
    pub timeout_seconds: u64,
    /// HTTP multipart endpoint
    pub endpoint: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
    pub s3_prefix: Option<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            queue_size: 1,
            workers: 2,
            timeout_seconds: 120,
            endpoint: None,
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            s3_access_key: None,
            s3_secret_key: None,
            s3_prefix: None,
        }
    }
}

impl UploadConfig {
    pub fn queue_capacity(&self) -> usize {
        self.queue_size.max(1) * 2 + 2
    }

    pub fn has_http_sink(&self) -> bool {
        self.endpoint.as_deref().is_some_and(|e| !e.is_empty())
    }

    pub fn has_s3_sink(&self) -> bool {
        self.s3_bucket.as_deref().is_some_and(|b| !b.is_empty())
    }
}

/// Server configuration
///
/// Contains all configuration needed to run the gateway:
/// - Server settings (host, port, TLS)
/// - Upstream recognition service credentials
/// - Recording, conversion and archival upload settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    pub upstream: UpstreamConfig,
    pub recording: RecordingConfig,
    pub convert: ConvertConfig,
    pub upload: UploadConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            tls: None,
            upstream: UpstreamConfig::default(),
            recording: RecordingConfig::default(),
            convert: ConvertConfig::default(),
            upload: UploadConfig::default(),
        }
    }
}

/// Zeroize credentials when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.upstream.app_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.upstream.access_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.upload.s3_access_key {
            key.zeroize();
        }
        if let Some(ref mut secret) = self.upload.s3_secret_key {
            secret.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables only, then validate.
    ///
    /// The `.env` file is loaded into the environment by `main` before this
    /// runs, so real environment variables win over `.env` values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = merge::merge_config(None)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// After loading and merging, performs validation on the final configuration.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }
}
