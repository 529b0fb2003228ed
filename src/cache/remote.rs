// src/cache/remote.rs

//! Object store over an S3-compatible HTTP endpoint.
//!
//! All three remote backends (s3, gs, azure) speak the same minimal
//! dialect here: `GET`/`PUT`/`HEAD` on `<endpoint>/<bucket>/<key>` plus an
//! XML key listing. Authentication is a bearer token taken from the
//! environment.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, RANGE};
use tracing::debug;

use crate::types::CacheBackendKind;

use super::{CacheError, ObjectStore};

/// `RUNDAG_CACHE_TOKEN` always wins; otherwise the backend's own variable.
fn token_from_env(backend: CacheBackendKind) -> Option<String> {
    if let Ok(token) = std::env::var("RUNDAG_CACHE_TOKEN") {
        return Some(token);
    }
    let var = match backend {
        CacheBackendKind::S3 => "AWS_SESSION_TOKEN",
        CacheBackendKind::Gs => "GOOGLE_CLOUD_TOKEN",
        CacheBackendKind::Azure => "AZURE_STORAGE_TOKEN",
        CacheBackendKind::Local => return None,
    };
    std::env::var(var).ok()
}

fn key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<Key>([^<]+)</Key>").expect("valid key regex"))
}

#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        backend: CacheBackendKind,
    ) -> Result<Self, CacheError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| CacheError::Network(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            token: token_from_env(backend),
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.header(AUTHORIZATION, format!("Bearer {token}")),
            None => req,
        }
    }

    fn transport_error(e: reqwest::Error) -> CacheError {
        CacheError::Network(e.to_string())
    }

    /// Map a non-success response onto the cache error taxonomy. 5xx and
    /// 429 are retryable, everything else is not.
    fn status_error(key: &str, status: StatusCode) -> CacheError {
        if status == StatusCode::NOT_FOUND {
            CacheError::NotFound {
                key: key.to_string(),
            }
        } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            CacheError::Unavailable(format!("{key}: http {status}"))
        } else {
            CacheError::InvalidEntry(format!("{key}: http {status}"))
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn get_object(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        let resp = self
            .authorize(self.client.get(self.object_url(key)))
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Self::status_error(key, status));
        }
        let bytes = resp.bytes().await.map_err(Self::transport_error)?;
        Ok(bytes.to_vec())
    }

    async fn get_object_range(
        &self,
        key: &str,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>, CacheError> {
        let end = offset + len - 1;
        let resp = self
            .authorize(self.client.get(self.object_url(key)))
            .header(RANGE, format!("bytes={offset}-{end}"))
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = resp.status();
        if status == StatusCode::PARTIAL_CONTENT {
            let bytes = resp.bytes().await.map_err(Self::transport_error)?;
            return Ok(bytes.to_vec());
        }
        if status.is_success() {
            // Endpoint ignored the Range header; slice the full body.
            let bytes = resp.bytes().await.map_err(Self::transport_error)?;
            let start = (offset as usize).min(bytes.len());
            let end = ((offset + len) as usize).min(bytes.len());
            return Ok(bytes[start..end].to_vec());
        }
        Err(Self::status_error(key, status))
    }

    async fn put_object(&self, key: &str, data: &[u8]) -> Result<(), CacheError> {
        let resp = self
            .authorize(self.client.put(self.object_url(key)))
            .body(data.to_vec())
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Self::status_error(key, status));
        }
        debug!(key, bytes = data.len(), endpoint = %self.endpoint, "uploaded object");
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let resp = self
            .authorize(self.client.head(self.object_url(key)))
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = resp.status();
        if status.is_success() {
            Ok(true)
        } else if status == StatusCode::NOT_FOUND {
            Ok(false)
        } else {
            Err(Self::status_error(key, status))
        }
    }

    async fn object_size(&self, key: &str) -> Result<u64, CacheError> {
        let resp = self
            .authorize(self.client.head(self.object_url(key)))
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Self::status_error(key, status));
        }
        resp.headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| CacheError::InvalidEntry(format!("{key}: missing content-length")))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let url = format!(
            "{}/{}?list-type=2&prefix={}",
            self.endpoint, self.bucket, prefix
        );
        let resp = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Self::status_error(prefix, status));
        }
        let body = resp.text().await.map_err(Self::transport_error)?;

        let mut keys: Vec<String> = key_pattern()
            .captures_iter(&body)
            .map(|cap| cap[1].to_string())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn location(&self) -> String {
        format!("{}/{}", self.endpoint, self.bucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_xml_extracts_keys() {
        let body = r#"<?xml version="1.0"?>
            <ListBucketResult>
              <Contents><Key>objects/aa</Key><Size>10</Size></Contents>
              <Contents><Key>objects/bb</Key><Size>20</Size></Contents>
            </ListBucketResult>"#;

        let keys: Vec<String> = key_pattern()
            .captures_iter(body)
            .map(|cap| cap[1].to_string())
            .collect();
        assert_eq!(keys, vec!["objects/aa", "objects/bb"]);
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            HttpObjectStore::status_error("k", StatusCode::NOT_FOUND),
            CacheError::NotFound { .. }
        ));
        assert!(matches!(
            HttpObjectStore::status_error("k", StatusCode::SERVICE_UNAVAILABLE),
            CacheError::Unavailable(_)
        ));
        assert!(matches!(
            HttpObjectStore::status_error("k", StatusCode::FORBIDDEN),
            CacheError::InvalidEntry(_)
        ));
    }

    #[test]
    fn endpoint_trailing_slash_is_normalized() {
        let store =
            HttpObjectStore::new("https://cache.example/", "bucket", CacheBackendKind::S3)
                .unwrap();
        assert_eq!(store.object_url("objects/x"), "https://cache.example/bucket/objects/x");
    }
}
