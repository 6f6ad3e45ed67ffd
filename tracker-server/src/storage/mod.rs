//! Blob storage abstraction
//!
//! Backends are selected once at startup and shared process-wide. Callers
//! branch only on capabilities: `url()` returning a URL means the backend
//! can serve the object itself; `path()` means the object is a local file.
//! Keys are never overwritten: saving onto an existing key stores the bytes
//! under a fresh, unique key instead and returns that key.

pub mod local;
pub mod object;

pub use local::LocalStorage;
pub use object::ObjectStorage;

use async_trait::async_trait;
use axum::body::Bytes;
use std::path::PathBuf;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Readable stored object
pub struct BlobReader {
    pub reader: Pin<Box<dyn AsyncRead + Send>>,
    /// Size in bytes when the backend knows it
    pub len: Option<u64>,
}

impl std::fmt::Debug for BlobReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobReader").field("len", &self.len).finish()
    }
}

#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Store `bytes`; returns the key actually used
    async fn save(&self, key: &str, bytes: Bytes) -> StorageResult<String>;

    async fn open(&self, key: &str) -> StorageResult<BlobReader>;

    /// Remove an object; missing objects are not an error
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Directly servable URL (public or signed), if supported
    fn url(&self, key: &str) -> Option<String>;

    /// Local filesystem path, if supported
    fn path(&self, key: &str) -> Option<PathBuf>;
}

/// Read a whole object into memory
pub async fn read_all(storage: &dyn BlobStorage, key: &str) -> StorageResult<Bytes> {
    let mut blob = storage.open(key).await?;
    let mut buf = Vec::with_capacity(blob.len.unwrap_or(0) as usize);
    blob.reader.read_to_end(&mut buf).await?;
    Ok(Bytes::from(buf))
}

/// Reduce a client-supplied file name to a safe single path segment
///
/// Directory parts are dropped; anything outside `[A-Za-z0-9._-]` becomes
/// `_`; leading dots are stripped. Never returns an empty string.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    let truncated: String = if cleaned.chars().count() > 120 {
        // Keep the extension when shortening
        match cleaned.rfind('.') {
            Some(dot) if cleaned.len() - dot <= 10 => {
                let ext = &cleaned[dot..];
                let stem: String = cleaned[..dot].chars().take(120 - ext.len()).collect();
                format!("{}{}", stem, ext)
            }
            _ => cleaned.chars().take(120).collect(),
        }
    } else {
        cleaned.to_string()
    };
    if truncated.is_empty() {
        "file".to_string()
    } else {
        truncated
    }
}

/// Permanent key for a file attached to a source
pub fn source_key(original_name: &str) -> String {
    format!("sources/{}/{}", Uuid::new_v4().simple(), sanitize_filename(original_name))
}

/// Temporary key for a file held in the staging area
pub fn staging_key(batch: &str, original_name: &str) -> String {
    format!(
        "tmp/{}/{}/{}",
        batch,
        Uuid::new_v4().simple(),
        sanitize_filename(original_name)
    )
}

/// Alternative key used when `key` is already taken
pub(crate) fn alternate_key(key: &str) -> String {
    let prefix = &Uuid::new_v4().simple().to_string()[..8];
    match key.rsplit_once('/') {
        Some((dir, name)) => format!("{}/{}_{}", dir, prefix, name),
        None => format!("{}_{}", prefix, key),
    }
}

/// Reject keys that could escape the storage root
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.contains('\0')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
