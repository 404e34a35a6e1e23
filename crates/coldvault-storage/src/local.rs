use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::traits::{validate_key, ArtifactStorage, StorageError, StorageResult};

const DEFAULT_POOL: &str = "default";

/// Local filesystem artifact store. Each credentials key maps to its own
/// pool directory under the base path.
#[derive(Clone)]
pub struct LocalArtifactStorage {
    base_path: PathBuf,
}

impl LocalArtifactStorage {
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;
        Ok(Self { base_path })
    }

    fn object_path(&self, key: &str, credentials_key: Option<&str>) -> StorageResult<PathBuf> {
        validate_key(key)?;
        let pool = credentials_key.unwrap_or(DEFAULT_POOL);
        validate_key(pool)?;
        Ok(self.base_path.join(pool).join(key))
    }
}

#[async_trait]
impl ArtifactStorage for LocalArtifactStorage {
    async fn fetch(
        &self,
        key: &str,
        _expected_len: Option<u64>,
        credentials_key: Option<&str>,
        dest_dir: &Path,
    ) -> StorageResult<PathBuf> {
        let src = self.object_path(key, credentials_key)?;
        if !fs::try_exists(&src).await? {
            return Err(StorageError::NotFound(key.to_string()));
        }
        let dest = dest_dir.join(key);
        fs::copy(&src, &dest)
            .await
            .map_err(|e| StorageError::DownloadFailed(format!("{}: {}", key, e)))?;
        Ok(dest)
    }

    async fn store(
        &self,
        key: &str,
        file: &Path,
        credentials_key: Option<&str>,
    ) -> StorageResult<()> {
        let dest = self.object_path(key, credentials_key)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(file, &dest)
            .await
            .map_err(|e| StorageError::UploadFailed(format!("{}: {}", key, e)))?;
        Ok(())
    }

    async fn delete(&self, key: &str, credentials_key: Option<&str>) -> StorageResult<()> {
        let path = self.object_path(key, credentials_key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed(format!("{}: {}", key, e))),
        }
    }

    async fn exists(&self, key: &str, credentials_key: Option<&str>) -> StorageResult<bool> {
        let path = self.object_path(key, credentials_key)?;
        Ok(fs::try_exists(&path).await?)
    }
}
