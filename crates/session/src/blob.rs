use std::collections::HashMap;
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob io error: {0}")]
    Io(#[from] io::Error),
    #[error("blob not found: {0}")]
    NotFound(String),
}

/// Content key for an uploaded blob: lowercase hex SHA-256 of the bytes
/// plus the extension, e.g. `9f86…0a08.jpg`. Identical uploads share a
/// key, which deduplicates re-sent photos for free.
pub fn content_key(data: &[u8], ext: &str) -> String {
    let digest = Sha256::digest(data);
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{hex}.{ext}")
}

/// Holds original uploads outside the session record; captures refer to
/// their bytes by content key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` and return its content key. Storing the same bytes
    /// again overwrites with identical content and returns the same key.
    async fn put(&self, data: &[u8], ext: &str) -> Result<String, BlobError>;
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError>;
}

/// Filesystem store, fanned out by the first hash byte:
/// `<root>/<first-2-hex>/<key>`.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let shard = key.get(..2).unwrap_or("00");
        self.root.join(shard).join(key)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, data: &[u8], ext: &str) -> Result<String, BlobError> {
        let key = content_key(data, ext);
        let path = self.path_for(&key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        Ok(key)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store for tests and throwaway deployments.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, data: &[u8], ext: &str) -> Result<String, BlobError> {
        let key = content_key(data, ext);
        self.blobs.lock().await.insert(key.clone(), data.to_vec());
        Ok(key)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        self.blobs
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }
}
