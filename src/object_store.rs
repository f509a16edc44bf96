//! Object-store access.
//!
//! The pipeline never holds a full-file stream: everything goes through
//! `head` for metadata and `get_range` for byte windows. The trait keeps the
//! store swappable (S3, MinIO, plain HTTP) and mockable in tests.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{ScribeError, ScribeResult};
use crate::model::ObjectMetadata;

pub trait ObjectStore: Send + Sync {
    /// Fetch object metadata without downloading the body.
    fn head(&self, bucket: &str, key: &str) -> ScribeResult<ObjectMetadata>;

    /// Stream the inclusive byte range `[start_byte, end_byte]`.
    fn get_range(
        &self,
        bucket: &str,
        key: &str,
        start_byte: u64,
        end_byte: u64,
    ) -> ScribeResult<Box<dyn Read + Send>>;

    /// Produce a URL granting temporary read access to the object.
    fn presign(&self, bucket: &str, key: &str, ttl: Duration) -> ScribeResult<String>;
}

/// Copy a byte range of a remote object into a local file, returning the
/// number of bytes written. The stream is consumed incrementally so memory
/// stays bounded regardless of range size.
pub fn fetch_range_to_file(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
    start_byte: u64,
    end_byte: u64,
    dest: &Path,
) -> ScribeResult<u64> {
    let mut reader = store.get_range(bucket, key, start_byte, end_byte)?;
    let mut file = File::create(dest)?;
    let written = io::copy(&mut reader, &mut file)
        .map_err(|e| ScribeError::Transport(format!("range copy failed: {e}")))?;
    tracing::debug!(
        stage = "fetch",
        start_byte,
        end_byte,
        written,
        dest = %dest.display(),
        "copied byte range"
    );
    Ok(written)
}

/// Object store speaking plain HTTP ranged GETs (`bytes=start-end`).
pub struct HttpObjectStore {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpObjectStore {
    pub fn new(
        endpoint: impl Into<String>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> ScribeResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .build()
            .map_err(|e| ScribeError::Transport(format!("http client build failed: {e}")))?;
        let endpoint: String = endpoint.into();
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_owned(),
        })
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, bucket, key.trim_start_matches('/'))
    }
}

impl ObjectStore for HttpObjectStore {
    fn head(&self, bucket: &str, key: &str) -> ScribeResult<ObjectMetadata> {
        let url = self.object_url(bucket, key);
        let response = self
            .client
            .head(&url)
            .send()
            .map_err(|e| ScribeError::Transport(format!("head {url}: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ScribeError::NotFound {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            });
        }
        if !response.status().is_success() {
            return Err(ScribeError::Transport(format!(
                "head {url}: status {}",
                response.status()
            )));
        }

        let content_length = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        Ok(ObjectMetadata {
            content_length,
            content_type,
        })
    }

    fn get_range(
        &self,
        bucket: &str,
        key: &str,
        start_byte: u64,
        end_byte: u64,
    ) -> ScribeResult<Box<dyn Read + Send>> {
        let url = self.object_url(bucket, key);
        let response = self
            .client
            .get(&url)
            .header(
                reqwest::header::RANGE,
                format!("bytes={start_byte}-{end_byte}"),
            )
            .send()
            .map_err(|e| ScribeError::Transport(format!("get {url}: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ScribeError::NotFound {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            });
        }
        // 206 for honored ranges; some servers answer 200 with the full body
        // for a range covering the whole object.
        if !response.status().is_success() {
            return Err(ScribeError::Transport(format!(
                "get {url}: status {}",
                response.status()
            )));
        }

        Ok(Box::new(response))
    }

    fn presign(&self, bucket: &str, key: &str, ttl: Duration) -> ScribeResult<String> {
        let expires_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ScribeError::Internal(format!("clock before epoch: {e}")))?
            .as_secs()
            .saturating_add(ttl.as_secs());
        Ok(format!(
            "{}?expires={expires_at}",
            self.object_url(bucket, key)
        ))
    }
}
