use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

use coldvault_core::models::StorageClass;

use crate::traits::{validate_key, ColdStorage, StorageError, StorageResult};

/// Filesystem-backed cold storage for development and tests. A real
/// archival tier imposes a thaw delay; locally an object is readable as
/// soon as it exists, so `restore_ready` reduces to an existence check.
#[derive(Clone)]
pub struct LocalColdStorage {
    base_path: PathBuf,
}

impl LocalColdStorage {
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create cold storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;
        Ok(Self { base_path })
    }

    fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.base_path.join(key))
    }
}

#[async_trait]
impl ColdStorage for LocalColdStorage {
    async fn put(
        &self,
        key: &str,
        file: &Path,
        storage_class: StorageClass,
    ) -> StorageResult<u64> {
        let dest = self.object_path(key)?;
        let written = fs::copy(file, &dest)
            .await
            .map_err(|e| StorageError::UploadFailed(format!("{}: {}", key, e)))?;
        tracing::debug!(key = %key, storage_class = %storage_class, bytes = written, "cold object stored");
        Ok(written)
    }

    async fn get(&self, key: &str, dest_dir: &Path) -> StorageResult<PathBuf> {
        let src = self.object_path(key)?;
        if !fs::try_exists(&src).await? {
            return Err(StorageError::NotFound(key.to_string()));
        }
        let dest = dest_dir.join(key);
        fs::copy(&src, &dest)
            .await
            .map_err(|e| StorageError::DownloadFailed(format!("{}: {}", key, e)))?;
        Ok(dest)
    }

    async fn restore_ready(&self, key: &str) -> StorageResult<bool> {
        let path = self.object_path(key)?;
        Ok(fs::try_exists(&path).await?)
    }
}
