use std::path::PathBuf;

use super::env::load_from_env;
use super::yaml::YamlConfig;
use super::{ConfigError, ServerConfig, TlsConfig};

/// Environment (over defaults) as the base, YAML values on top.
pub(crate) fn merge_config(yaml: Option<YamlConfig>) -> Result<ServerConfig, ConfigError> {
    let mut config = load_from_env()?;
    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(server) = yaml.server {
        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
        if let Some(tls) = server.tls {
            match tls.enabled {
                Some(false) => config.tls = None,
                Some(true) => {
                    let current = config.tls.take();
                    config.tls = Some(TlsConfig {
                        cert_path: tls
                            .cert_path
                            .map(PathBuf::from)
                            .or_else(|| current.as_ref().map(|t| t.cert_path.clone()))
                            .unwrap_or_default(),
                        key_path: tls
                            .key_path
                            .map(PathBuf::from)
                            .or_else(|| current.as_ref().map(|t| t.key_path.clone()))
                            .unwrap_or_default(),
                    });
                }
                None => {
                    if let Some(current) = config.tls.as_mut() {
                        if let Some(cert) = tls.cert_path {
                            current.cert_path = PathBuf::from(cert);
                        }
                        if let Some(key) = tls.key_path {
                            current.key_path = PathBuf::from(key);
                        }
                    }
                }
            }
        }
    }

    if let Some(upstream) = yaml.upstream {
        let target = &mut config.upstream;
        overlay(&mut target.endpoint, upstream.endpoint);
        overlay(&mut target.app_key, upstream.app_key);
        overlay(&mut target.access_key, upstream.access_key);
        overlay(&mut target.resource_id, upstream.resource_id);
        if let Some(timeout) = upstream.connect_timeout_seconds {
            target.connect_timeout_seconds = timeout;
        }
    }

    if let Some(recording) = yaml.recording {
        let target = &mut config.recording;
        if let Some(dir) = recording.dir {
            // an explicit empty dir switches recording off
            target.dir = (!dir.trim().is_empty()).then(|| PathBuf::from(dir));
        }
        if let Some(max_bytes) = recording.max_bytes {
            target.max_bytes = max_bytes;
        }
        if let Some(rate) = recording.sample_rate {
            target.sample_rate = rate;
        }
        if let Some(channels) = recording.channels {
            target.channels = channels;
        }
        if let Some(bits) = recording.bits_per_sample {
            target.bits_per_sample = bits;
        }
        if let Some(timeout) = recording.completion_timeout_seconds {
            target.completion_timeout_seconds = timeout;
        }
    }

    if let Some(convert) = yaml.convert {
        let target = &mut config.convert;
        if let Some(enabled) = convert.enabled {
            target.enabled = enabled;
        }
        if let Some(format) = convert.format {
            target.format = format;
        }
        overlay(&mut target.bitrate, convert.bitrate);
        if let Some(path) = convert.ffmpeg_path {
            target.ffmpeg_path = Some(PathBuf::from(path));
        }
        if let Some(workers) = convert.workers {
            target.workers = workers;
        }
        if let Some(args) = convert.extra_args {
            target.extra_args = args;
        }
    }

    if let Some(upload) = yaml.upload {
        let target = &mut config.upload;
        if let Some(size) = upload.queue_size {
            target.queue_size = size;
        }
        if let Some(workers) = upload.workers {
            target.workers = workers;
        }
        if let Some(timeout) = upload.timeout_seconds {
            target.timeout_seconds = timeout;
        }
        overlay(&mut target.endpoint, upload.endpoint);
        overlay(&mut target.s3_bucket, upload.s3_bucket);
        overlay(&mut target.s3_region, upload.s3_region);
        overlay(&mut target.s3_endpoint, upload.s3_endpoint);
        overlay(&mut target.s3_access_key, upload.s3_access_key);
        overlay(&mut target.s3_secret_key, upload.s3_secret_key);
        overlay(&mut target.s3_prefix, upload.s3_prefix);
    }

    Ok(config)
}

fn overlay(target: &mut Option<String>, value: Option<String>) {
    if let Some(value) = value {
        *target = Some(value);
    }
}
