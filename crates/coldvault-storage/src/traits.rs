//! Storage abstraction traits
//!
//! All storage backends must implement these. The lifecycle layer never
//! touches bytes directly; it moves files between a primary artifact store,
//! a local scratch volume, and a cold archival tier through these seams.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

use coldvault_core::models::StorageClass;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Primary artifact store, addressed by content digest within a
/// credentials-keyed pool (`None` selects the default pool).
#[async_trait]
pub trait ArtifactStorage: Send + Sync {
    /// Copy the object into `dest_dir` and return the local path.
    /// `expected_len` is the full length when the caller knows it; backends
    /// may use it to bound the read.
    async fn fetch(
        &self,
        key: &str,
        expected_len: Option<u64>,
        credentials_key: Option<&str>,
        dest_dir: &Path,
    ) -> StorageResult<PathBuf>;

    /// Write the file under `key`, replacing any existing object.
    async fn store(&self, key: &str, file: &Path, credentials_key: Option<&str>)
        -> StorageResult<()>;

    async fn delete(&self, key: &str, credentials_key: Option<&str>) -> StorageResult<()>;

    async fn exists(&self, key: &str, credentials_key: Option<&str>) -> StorageResult<bool>;
}

/// Archival storage tier. Objects written with a non-standard storage
/// class need a thaw before [`ColdStorage::get`] succeeds;
/// [`ColdStorage::restore_ready`] reports whether the thaw has finished.
#[async_trait]
pub trait ColdStorage: Send + Sync {
    /// Upload the file and return the number of bytes written.
    async fn put(&self, key: &str, file: &Path, storage_class: StorageClass)
        -> StorageResult<u64>;

    /// Download the object into `dest_dir` and return the local path.
    async fn get(&self, key: &str, dest_dir: &Path) -> StorageResult<PathBuf>;

    /// Whether the archived object is thawed and readable.
    async fn restore_ready(&self, key: &str) -> StorageResult<bool>;
}

/// Reject keys that could escape a backend's root directory.
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.contains("..") || key.starts_with('/') || key.contains('\\') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
