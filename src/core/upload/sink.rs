//! Archival sinks: HTTP multipart endpoint or S3-compatible object store

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use reqwest::multipart::{Form, Part};
use tracing::{debug, info};

use super::UploadError;
use crate::config::UploadConfig;

/// Upper bound on the rejection body kept for diagnostics
const MAX_ERROR_BODY: usize = 4 * 1024;

/// One recording as handed to a sink
#[derive(Debug, Clone)]
pub struct ArchiveItem {
    pub connect_id: String,
    pub owner: String,
    pub file_name: String,
    pub bytes: Bytes,
}

/// Durable storage for finished recordings
#[async_trait]
pub trait ArchiveSink: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    async fn store(&self, item: ArchiveItem) -> Result<(), UploadError>;
}

// =============================================================================
// HTTP multipart
// =============================================================================

/// Posts each recording as a multipart form (`files` part) with the owner
/// in the `X-User-ID` header.
pub struct HttpArchiveSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpArchiveSink {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

fn content_type_for(file_name: &str) -> &'static str {
    let ext = file_name.rsplit('.').next().unwrap_or_default();
    match ext.to_ascii_lowercase().as_str() {
        "wav" => "audio/wav",
        "ogg" | "opus" => "audio/ogg",
        "mp3" => "audio/mpeg",
        "m4a" | "aac" => "audio/aac",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl ArchiveSink for HttpArchiveSink {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn store(&self, item: ArchiveItem) -> Result<(), UploadError> {
        let part = Part::bytes(item.bytes.to_vec())
            .file_name(item.file_name.clone())
            .mime_str(content_type_for(&item.file_name))?;
        let form = Form::new().part("files", part);

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-User-ID", &item.owner)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() >= 300 {
            let body = response.bytes().await.unwrap_or_default();
            let body = &body[..body.len().min(MAX_ERROR_BODY)];
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                body: String::from_utf8_lossy(body).into_owned(),
            });
        }

        debug!(
            connect_id = %item.connect_id,
            "Archive endpoint accepted {} with status {}",
            item.file_name,
            status
        );
        Ok(())
    }
}

// =============================================================================
// Object store
// =============================================================================

/// Puts each recording at `{prefix}/{owner}/{connect_id}/{file_name}`
pub struct ObjectStoreSink {
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
}

impl ObjectStoreSink {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: Option<String>) -> Self {
        Self { store, prefix }
    }

    /// Build an S3 client from the upload section
    pub fn s3(config: &UploadConfig) -> Result<Self, UploadError> {
        let bucket = config
            .s3_bucket
            .as_deref()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| UploadError::Config("s3_bucket is required".to_string()))?;

        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
        if let Some(region) = &config.s3_region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = &config.s3_endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }
        if let Some(access_key) = &config.s3_access_key {
            builder = builder.with_access_key_id(access_key);
        }
        if let Some(secret_key) = &config.s3_secret_key {
            builder = builder.with_secret_access_key(secret_key);
        }

        let store = builder.build()?;
        info!("Archiving recordings to S3 bucket {}", bucket);
        Ok(Self::new(Arc::new(store), config.s3_prefix.clone()))
    }

    pub fn object_key(&self, item: &ArchiveItem) -> String {
        let prefix = self
            .prefix
            .as_deref()
            .map(|p| p.trim().trim_matches('/'))
            .filter(|p| !p.is_empty());
        match prefix {
            Some(prefix) => format!(
                "{}/{}/{}/{}",
                prefix, item.owner, item.connect_id, item.file_name
            ),
            None => format!("{}/{}/{}", item.owner, item.connect_id, item.file_name),
        }
    }
}

#[async_trait]
impl ArchiveSink for ObjectStoreSink {
    fn name(&self) -> &'static str {
        "object_store"
    }

    async fn store(&self, item: ArchiveItem) -> Result<(), UploadError> {
        let key = ObjectPath::from(self.object_key(&item));
        self.store.put(&key, PutPayload::from(item.bytes)).await?;
        debug!(connect_id = %item.connect_id, "Stored archive object {}", key);
        Ok(())
    }
}

/// Pick the sink the upload section configures, if any
pub fn build_sink(config: &UploadConfig) -> Result<Option<Arc<dyn ArchiveSink>>, UploadError> {
    if let Some(endpoint) = config.endpoint.as_deref().filter(|e| !e.is_empty()) {
        info!("Archiving recordings to {}", endpoint);
        let sink = HttpArchiveSink::new(endpoint, Duration::from_secs(config.timeout_seconds))?;
        return Ok(Some(Arc::new(sink)));
    }
    if config.s3_bucket.as_deref().is_some_and(|b| !b.is_empty()) {
        return Ok(Some(Arc::new(ObjectStoreSink::s3(config)?)));
    }
    Ok(None)
}
