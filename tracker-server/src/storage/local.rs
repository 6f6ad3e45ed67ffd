//! Filesystem backend
//!
//! Objects live under a root directory. No URLs: the gateway streams them.

use super::{alternate_key, validate_key, BlobReader, BlobStorage, StorageError, StorageResult};
use async_trait::async_trait;
use axum::body::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Attempts at finding a free key before giving up
const MAX_KEY_ATTEMPTS: usize = 5;

#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    /// Write to a file that must not exist yet
    async fn write_new(&self, key: &str, bytes: &[u8]) -> StorageResult<bool> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;
        let mut file = match file {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(true)
    }
}

#[async_trait]
impl BlobStorage for LocalStorage {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.resolve(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn save(&self, key: &str, bytes: Bytes) -> StorageResult<String> {
        let mut candidate = key.to_string();
        for _ in 0..MAX_KEY_ATTEMPTS {
            if self.write_new(&candidate, &bytes).await? {
                debug!(key = %candidate, size = bytes.len(), "Stored local object");
                return Ok(candidate);
            }
            candidate = alternate_key(key);
        }
        Err(StorageError::Backend(format!("No free key for {}", key)))
    }

    async fn open(&self, key: &str) -> StorageResult<BlobReader> {
        let path = self.resolve(key)?;
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata().await.ok().map(|m| m.len());
        Ok(BlobReader {
            reader: Box::pin(file),
            len,
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn url(&self, _key: &str) -> Option<String> {
        None
    }

    fn path(&self, key: &str) -> Option<PathBuf> {
        self.resolve(key).ok()
    }
}
