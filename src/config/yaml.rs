use serde::Deserialize;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// Every field is optional; anything left out keeps the value coming from
/// the environment (or the built-in default).
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///
/// upstream:
///   endpoint: "wss://openspeech.bytedance.com/api/v3/sauc/bigmodel"
///   app_key: "your-app-key"
///   access_key: "your-access-key"
///   resource_id: "volc.bigasr.sauc.duration"
///
/// recording:
///   dir: "/var/lib/sauc-gateway/records"
///   max_bytes: 268435456
///   sample_rate: 16000
///   channels: 1
///   bits_per_sample: 16
///   completion_timeout_seconds: 60
///
/// convert:
///   enabled: true
///   format: "ogg"
///   bitrate: "64k"
///   workers: 5
///
/// upload:
///   queue_size: 1
///   workers: 2
///   endpoint: "https://archive.example.com/files"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub upstream: Option<UpstreamYaml>,
    pub recording: Option<RecordingYaml>,
    pub convert: Option<ConvertYaml>,
    pub upload: Option<UploadYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: Option<TlsYaml>,
}

/// TLS configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsYaml {
    pub enabled: Option<bool>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

/// Recognition service the gateway relays to
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct UpstreamYaml {
    pub endpoint: Option<String>,
    pub app_key: Option<String>,
    pub access_key: Option<String>,
    pub resource_id: Option<String>,
    pub connect_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RecordingYaml {
    pub dir: Option<String>,
    pub max_bytes: Option<u64>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub bits_per_sample: Option<u16>,
    pub completion_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ConvertYaml {
    pub enabled: Option<bool>,
    pub format: Option<String>,
    pub bitrate: Option<String>,
    pub ffmpeg_path: Option<String>,
    pub workers: Option<usize>,
    pub extra_args: Option<Vec<String>>,
}

/// Archival upload configuration from YAML
///
/// Either `endpoint` (HTTP multipart) or the `s3_*` fields select a sink.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct UploadYaml {
    pub queue_size: Option<usize>,
    pub workers: Option<usize>,
    pub timeout_seconds: Option<u64>,
    pub endpoint: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
    pub s3_prefix: Option<String>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: YamlConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 8080
  tls:
    enabled: true
    cert_path: "/etc/tls/cert.pem"
    key_path: "/etc/tls/key.pem"

upstream:
  endpoint: "wss://asr.example.com/sauc"
  app_key: "app"
  access_key: "access"
  resource_id: "volc.bigasr.sauc.duration"
  connect_timeout_seconds: 5

recording:
  dir: "/tmp/records"
  max_bytes: 1048576
  sample_rate: 8000
  channels: 2
  bits_per_sample: 8
  completion_timeout_seconds: 30

convert:
  enabled: false
  format: "mp3"
  bitrate: "32k"
  ffmpeg_path: "/usr/bin/ffmpeg"
  workers: 3
  extra_args: ["-ac", "1"]

upload:
  queue_size: 4
  workers: 1
  timeout_seconds: 30
  s3_bucket: "records"
  s3_region: "cn-beijing"
  s3_prefix: "meetings"
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let server = config.server.as_ref().unwrap();
        assert_eq!(server.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(server.port, Some(8080));
        assert_eq!(server.tls.as_ref().unwrap().enabled, Some(true));

        let upstream = config.upstream.as_ref().unwrap();
        assert_eq!(upstream.resource_id.as_deref(), Some("volc.bigasr.sauc.duration"));
        assert_eq!(upstream.connect_timeout_seconds, Some(5));

        let recording = config.recording.as_ref().unwrap();
        assert_eq!(recording.max_bytes, Some(1048576));
        assert_eq!(recording.bits_per_sample, Some(8));

        let convert = config.convert.as_ref().unwrap();
        assert_eq!(convert.enabled, Some(false));
        assert_eq!(
            convert.extra_args.as_deref(),
            Some(&["-ac".to_string(), "1".to_string()][..])
        );

        let upload = config.upload.as_ref().unwrap();
        assert_eq!(upload.queue_size, Some(4));
        assert_eq!(upload.s3_bucket.as_deref(), Some("records"));
        assert!(upload.endpoint.is_none());
    }

    #[test]
    fn test_yaml_config_partial() {
        let yaml = r#"
recording:
  dir: "/tmp/records"
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.server.is_none());
        assert!(config.upstream.is_none());
        let recording = config.recording.unwrap();
        assert_eq!(recording.dir.as_deref(), Some("/tmp/records"));
        assert!(recording.max_bytes.is_none());
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.server.is_none());
        assert!(config.upload.is_none());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "server:\n  port: 9000\n").unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();
        assert_eq!(config.server.unwrap().port, Some(9000));
    }

    #[test]
    fn test_from_file_not_found() {
        let result = YamlConfig::from_file(Path::new("/nonexistent/config.yaml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");
        fs::write(&config_path, "invalid: yaml: [content").unwrap();

        let result = YamlConfig::from_file(&config_path);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
