//! HTTP object store backend
//!
//! Objects are addressed as `<endpoint>/<bucket>/<key>`. Writes use a bearer
//! credential. Reads are served by the store itself: `url()` returns either
//! the plain object URL (public buckets) or a time-limited signed URL.
//!
//! Signature: hex HMAC-SHA256, keyed with the signing secret, over
//! `"GET\n/<bucket>/<key>\n<expires>"`, appended as
//! `?expires=<unix secs>&signature=<hex>`.

use super::{alternate_key, validate_key, BlobReader, BlobStorage, StorageError, StorageResult};
use async_trait::async_trait;
use axum::body::Bytes;
use futures::TryStreamExt;
use reqwest::{Client, StatusCode};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::io::StreamReader;
use tracing::debug;
use tracker_common::config::StorageConfig;

const MAX_KEY_ATTEMPTS: usize = 5;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct ObjectStorage {
    client: Client,
    endpoint: String,
    bucket: String,
    access_key: Option<String>,
    signing_secret: Option<String>,
    url_ttl: Duration,
    public_urls: bool,
}

impl ObjectStorage {
    pub fn new(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        access_key: Option<String>,
        signing_secret: Option<String>,
        url_ttl: Duration,
        public_urls: bool,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            access_key,
            signing_secret,
            url_ttl,
            public_urls,
        }
    }

    /// Build from `[storage]` configuration
    pub fn from_config(config: &StorageConfig) -> StorageResult<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| StorageError::Backend("storage.endpoint is not set".to_string()))?;
        let bucket = config
            .bucket
            .clone()
            .ok_or_else(|| StorageError::Backend("storage.bucket is not set".to_string()))?;
        Ok(Self::new(
            endpoint,
            bucket,
            config.access_key.clone(),
            config.signing_secret.clone(),
            Duration::from_secs(config.url_ttl_secs),
            config.public_urls,
        ))
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }

    fn request(&self, method: reqwest::Method, key: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.object_url(key));
        match &self.access_key {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Signed URL valid until `expires` (unix seconds)
    pub fn signed_url(&self, key: &str, expires: i64) -> Option<String> {
        let secret = self.signing_secret.as_deref()?;
        let signature = sign(&self.bucket, key, expires, secret)?;
        Some(format!(
            "{}?expires={}&signature={}",
            self.object_url(key),
            expires,
            signature
        ))
    }

    async fn put_new(&self, key: &str, bytes: Bytes) -> StorageResult<bool> {
        validate_key(key)?;
        let response = self
            .request(reqwest::Method::PUT, key)
            .header("If-None-Match", "*")
            .body(bytes)
            .send()
            .await
            .map_err(backend_error)?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::PRECONDITION_FAILED | StatusCode::CONFLICT => Ok(false),
            status => Err(StorageError::Backend(format!("PUT {} returned {}", key, status))),
        }
    }
}

fn signing_mac(bucket: &str, key: &str, expires: i64, secret: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(format!("GET\n/{}/{}\n{}", bucket, key, expires).as_bytes());
    Some(mac)
}

/// Hex HMAC-SHA256 over method, object path and expiry
pub fn sign(bucket: &str, key: &str, expires: i64, secret: &str) -> Option<String> {
    let mac = signing_mac(bucket, key, expires, secret)?;
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex signature produced by [`sign`]
pub fn verify_signature(bucket: &str, key: &str, expires: i64, secret: &str, signature: &str) -> bool {
    let Ok(provided) = hex::decode(signature) else {
        return false;
    };
    signing_mac(bucket, key, expires, secret).is_some_and(|mac| mac.verify_slice(&provided).is_ok())
}

fn backend_error(e: reqwest::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

#[async_trait]
impl BlobStorage for ObjectStorage {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        let response = self
            .request(reqwest::Method::HEAD, key)
            .send()
            .await
            .map_err(backend_error)?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(StorageError::Backend(format!("HEAD {} returned {}", key, status))),
        }
    }

    async fn save(&self, key: &str, bytes: Bytes) -> StorageResult<String> {
        let mut candidate = key.to_string();
        for _ in 0..MAX_KEY_ATTEMPTS {
            if !self.exists(&candidate).await? && self.put_new(&candidate, bytes.clone()).await? {
                debug!(key = %candidate, size = bytes.len(), "Stored object");
                return Ok(candidate);
            }
            candidate = alternate_key(key);
        }
        Err(StorageError::Backend(format!("No free key for {}", key)))
    }

    async fn open(&self, key: &str) -> StorageResult<BlobReader> {
        validate_key(key)?;
        let response = self
            .request(reqwest::Method::GET, key)
            .send()
            .await
            .map_err(backend_error)?;
        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => return Err(StorageError::NotFound(key.to_string())),
            status => {
                return Err(StorageError::Backend(format!("GET {} returned {}", key, status)))
            }
        }
        let len = response.content_length();
        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(BlobReader {
            reader: Box::pin(StreamReader::new(stream)),
            len,
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        let response = self
            .request(reqwest::Method::DELETE, key)
            .send()
            .await
            .map_err(backend_error)?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            status => Err(StorageError::Backend(format!("DELETE {} returned {}", key, status))),
        }
    }

    fn url(&self, key: &str) -> Option<String> {
        validate_key(key).ok()?;
        if self.public_urls {
            return Some(self.object_url(key));
        }
        let ttl = chrono::Duration::from_std(self.url_ttl).ok()?;
        let expires = (tracker_common::time::now() + ttl).timestamp();
        self.signed_url(key, expires)
    }

    fn path(&self, _key: &str) -> Option<PathBuf> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(public_urls: bool, secret: Option<&str>) -> ObjectStorage {
        ObjectStorage::new(
            "https://objects.example.com/",
            "evidence",
            None,
            secret.map(str::to_string),
            Duration::from_secs(300),
            public_urls,
        )
    }

    #[test]
    fn test_public_url_is_plain() {
        let s = storage(true, None);
        assert_eq!(
            s.url("sources/a/r.pdf").as_deref(),
            Some("https://objects.example.com/evidence/sources/a/r.pdf")
        );
    }

    #[test]
    fn test_signed_url_carries_expiry_and_signature() {
        let s = storage(false, Some("s3cret"));
        let url = s.signed_url("sources/a/r.pdf", 1_700_000_000).unwrap();
        let expected = sign("evidence", "sources/a/r.pdf", 1_700_000_000, "s3cret").unwrap();
        assert_eq!(
            url,
            format!(
                "https://objects.example.com/evidence/sources/a/r.pdf?expires=1700000000&signature={}",
                expected
            )
        );
        assert_eq!(expected.len(), 64);
    }

    #[test]
    fn test_signature_depends_on_every_input() {
        let base = sign("b", "k", 1, "s");
        assert_ne!(base, sign("b", "k2", 1, "s"));
        assert_ne!(base, sign("b", "k", 2, "s"));
        assert_ne!(base, sign("b", "k", 1, "t"));
        assert_ne!(base, sign("c", "k", 1, "s"));
    }

    #[test]
    fn test_signature_is_hmac_sha256() {
        // RFC 4231 test case 2
        let mut mac = HmacSha256::new_from_slice(b"Jefe").unwrap();
        mac.update(b"what do ya want for nothing?");
        assert_eq!(
            hex::encode(mac.finalize().into_bytes()),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
        // Appending the secret to the message is not what gets signed
        let signature = sign("b", "k", 1, "s").unwrap();
        let mut mac = HmacSha256::new_from_slice(b"s").unwrap();
        mac.update(b"GET\n/b/k\n1");
        assert_eq!(signature, hex::encode(mac.finalize().into_bytes()));
    }

    #[test]
    fn test_verify_signature() {
        let signature = sign("evidence", "sources/a/r.pdf", 42, "s3cret").unwrap();
        assert!(verify_signature("evidence", "sources/a/r.pdf", 42, "s3cret", &signature));
        assert!(!verify_signature("evidence", "sources/a/r.pdf", 43, "s3cret", &signature));
        assert!(!verify_signature("evidence", "sources/a/r.pdf", 42, "other", &signature));
        assert!(!verify_signature("evidence", "sources/a/r.pdf", 42, "s3cret", "zz"));
        assert!(!verify_signature("evidence", "sources/a/r.pdf", 42, "s3cret", &signature[..62]));
    }

    #[test]
    fn test_url_expires_in_future() {
        let s = storage(false, Some("s3cret"));
        let url = s.url("sources/a/r.pdf").unwrap();
        let expires: i64 = url
            .split("expires=")
            .nth(1)
            .and_then(|rest| rest.split('&').next())
            .and_then(|v| v.parse().ok())
            .unwrap();
        let now = tracker_common::time::now().timestamp();
        assert!(expires > now && expires <= now + 301);
    }

    #[test]
    fn test_no_secret_no_signed_url() {
        let s = storage(false, None);
        assert!(s.url("sources/a/r.pdf").is_none());
        assert!(s.path("sources/a/r.pdf").is_none());
    }
}
