//! Content digest helpers. Restore verifies every recovered artifact
//! against the digest recorded at archive time before committing it back
//! to primary storage.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;

pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hash a file's contents. Runs on the blocking pool; suitable for large
/// artifacts.
pub async fn sha256_file(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&path)
            .with_context(|| format!("open {} for hashing", path.display()))?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher)
            .with_context(|| format!("hash {}", path.display()))?;
        Ok(hex::encode(hasher.finalize()))
    })
    .await
    .context("spawn_blocking for file hashing")?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_input_hashes_to_known_digest() {
        assert_eq!(
            sha256_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn file_digest_matches_bytes_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"cold bytes").unwrap();
        drop(file);

        assert_eq!(sha256_file(&path).await.unwrap(), sha256_bytes(b"cold bytes"));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(sha256_file(&dir.path().join("absent")).await.is_err());
    }
}
