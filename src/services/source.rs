use std::collections::HashMap;
use std::io::Read;

use flate2::read::GzDecoder;
use reqwest::{Client as HttpClient, StatusCode};
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};

/// Trait for remote dataset sources
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait DatasetSource: Send + Sync {
    /// Fetches the object at `bucket/key`; `None` when it does not exist
    async fn fetch(&self, bucket: &str, key: &str) -> AppResult<Option<Vec<u8>>>;

    /// Source name for logging and debugging
    fn name(&self) -> &'static str;
}

/// Fetches and decodes a JSON dataset.
///
/// Keys ending in `.gz` are gunzipped first. Invalid JSON or a broken gzip
/// stream is reported as [`AppError::CorruptPayload`].
pub async fn fetch_json(
    source: &dyn DatasetSource,
    bucket: &str,
    key: &str,
) -> AppResult<Option<serde_json::Value>> {
    let Some(bytes) = source.fetch(bucket, key).await? else {
        return Ok(None);
    };

    let bytes = if key.ends_with(".gz") {
        let mut decoded = Vec::new();
        GzDecoder::new(bytes.as_slice())
            .read_to_end(&mut decoded)
            .map_err(|e| AppError::CorruptPayload(format!("{}/{}: {}", bucket, key, e)))?;
        decoded
    } else {
        bytes
    };

    let value = serde_json::from_slice(&bytes)
        .map_err(|e| AppError::CorruptPayload(format!("{}/{}: {}", bucket, key, e)))?;
    Ok(Some(value))
}

/// Object storage reached over plain HTTP(S), e.g. a public S3 endpoint
#[derive(Clone)]
pub struct HttpDatasetSource {
    http_client: HttpClient,
    base_url: String,
}

impl HttpDatasetSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http_client: HttpClient::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.base_url, bucket, key.trim_start_matches('/'))
    }
}

#[async_trait::async_trait]
impl DatasetSource for HttpDatasetSource {
    async fn fetch(&self, bucket: &str, key: &str) -> AppResult<Option<Vec<u8>>> {
        let url = self.object_url(bucket, key);
        let response = self.http_client.get(&url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::warn!(url = %url, "Dataset object not found");
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalApi(format!(
                "Object store returned status {} for {}: {}",
                status, url, body
            )));
        }

        let bytes = response.bytes().await?;
        tracing::debug!(url = %url, size = bytes.len(), "Fetched dataset object");
        Ok(Some(bytes.to_vec()))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// In-memory source holding objects keyed by `(bucket, key)`
#[derive(Default)]
pub struct StaticSource {
    objects: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) {
        self.objects
            .write()
            .await
            .insert((bucket.to_string(), key.to_string()), bytes);
    }

    pub async fn put_json(&self, bucket: &str, key: &str, value: &serde_json::Value) {
        self.put(bucket, key, value.to_string().into_bytes()).await;
    }

    pub async fn remove(&self, bucket: &str, key: &str) {
        self.objects
            .write()
            .await
            .remove(&(bucket.to_string(), key.to_string()));
    }
}

#[async_trait::async_trait]
impl DatasetSource for StaticSource {
    async fn fetch(&self, bucket: &str, key: &str) -> AppResult<Option<Vec<u8>>> {
        Ok(self
            .objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .cloned())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
