use url::Url;

use super::{ConfigError, ServerConfig};

/// Reject configurations the gateway cannot run with.
pub(crate) fn validate(config: &ServerConfig) -> Result<(), ConfigError> {
    if config.port == 0 {
        return Err(invalid("server port must be greater than 0"));
    }

    if let Some(tls) = &config.tls
        && (tls.cert_path.as_os_str().is_empty() || tls.key_path.as_os_str().is_empty())
    {
        return Err(invalid("TLS is enabled but cert_path or key_path is missing"));
    }

    if let Some(endpoint) = config.upstream.endpoint.as_deref().filter(|e| !e.is_empty()) {
        check_url("upstream endpoint", endpoint, &["ws", "wss"])?;
    }
    if let Some(endpoint) = config.upload.endpoint.as_deref().filter(|e| !e.is_empty()) {
        check_url("upload endpoint", endpoint, &["http", "https"])?;
    }

    let recording = &config.recording;
    if recording.max_bytes == 0 {
        return Err(invalid("recording max_bytes must be greater than 0"));
    }
    if !(8000..=48000).contains(&recording.sample_rate) {
        return Err(invalid(format!(
            "recording sample_rate {} is outside 8000-48000",
            recording.sample_rate
        )));
    }
    if !(1..=2).contains(&recording.channels) {
        return Err(invalid(format!(
            "recording channels {} must be 1 or 2",
            recording.channels
        )));
    }
    if !matches!(recording.bits_per_sample, 8 | 16) {
        return Err(invalid(format!(
            "recording bits_per_sample {} is not supported (use 8 or 16)",
            recording.bits_per_sample
        )));
    }
    if recording.completion_timeout_seconds == 0 {
        return Err(invalid(
            "recording completion_timeout_seconds must be greater than 0",
        ));
    }

    if config.convert.workers == 0 {
        return Err(invalid("convert workers must be greater than 0"));
    }
    if config.convert.enabled && config.convert.format.trim().is_empty() {
        return Err(invalid("convert format must not be empty"));
    }

    if config.upload.workers == 0 {
        return Err(invalid("upload workers must be greater than 0"));
    }
    if config.upload.has_http_sink() && config.upload.has_s3_sink() {
        return Err(invalid(
            "configure either upload endpoint or upload s3_bucket, not both",
        ));
    }

    Ok(())
}

fn check_url(name: &str, value: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|e| invalid(format!("{name} '{value}' is invalid: {e}")))?;
    if !schemes.contains(&url.scheme()) {
        return Err(invalid(format!(
            "{name} must use {}, got {}",
            schemes.join(" or "),
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(invalid(format!("{name} '{value}' has no host")));
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}
