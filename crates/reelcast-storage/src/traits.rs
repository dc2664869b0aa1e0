//! Storage abstraction trait

use crate::keys;
use crate::StorageBackend;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    /// The location is a URL outside this store's public base.
    #[error("Location is not served by this store: {0}")]
    ForeignLocation(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage abstraction trait
///
/// Implemented by every artifact store backend. Uploads to an existing key
/// overwrite it unconditionally, which is what makes reprocessing a video
/// idempotent.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Upload data to a specific storage key. Returns the public URL.
    async fn upload_with_key(
        &self,
        storage_key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<String>;

    /// Upload a local file to a specific storage key. Returns the public URL.
    async fn upload_file(
        &self,
        storage_key: &str,
        path: &Path,
        content_type: &str,
    ) -> StorageResult<String> {
        let data = tokio::fs::read(path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to read {}: {}", path.display(), e))
        })?;
        self.upload_with_key(storage_key, data, content_type).await
    }

    /// Download a file by its storage key
    async fn download(&self, storage_key: &str) -> StorageResult<Vec<u8>>;

    /// Download by storage key or by a public URL of this store.
    ///
    /// Returns [`StorageError::ForeignLocation`] for URLs this store does not serve.
    async fn download_location(&self, location: &str) -> StorageResult<Vec<u8>> {
        let key = self
            .key_for_location(location)
            .ok_or_else(|| StorageError::ForeignLocation(location.to_string()))?;
        self.download(&key).await
    }

    /// Delete a file by its storage key. Missing files are not an error.
    async fn delete(&self, storage_key: &str) -> StorageResult<()>;

    async fn exists(&self, storage_key: &str) -> StorageResult<bool>;

    /// Base URL under which every key is publicly reachable, without trailing slash.
    fn public_base(&self) -> String;

    fn public_url(&self, storage_key: &str) -> String {
        keys::public_url(&self.public_base(), storage_key)
    }

    /// Map a stored location (key or public URL) back to a storage key.
    fn key_for_location(&self, location: &str) -> Option<String> {
        keys::key_for_location(&self.public_base(), location)
    }

    fn backend_type(&self) -> StorageBackend;
}
