//! Compression codecs.
//!
//! [`Archiver`] is the whole-file codec used on the archive path; the codec
//! name is recorded on the record so restore always picks the one that
//! wrote the object. [`DeltaCodec`] is the compress-against-base seam for
//! delta-stored artifacts.

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::traits::{StorageError, StorageResult};

#[async_trait]
pub trait Archiver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Suffix appended to the digest to form the cold-storage key.
    fn suffix(&self) -> &'static str;

    /// Compress `src` into `dst`; returns bytes written.
    async fn compress(&self, src: &Path, dst: &Path) -> StorageResult<u64>;

    async fn decompress(&self, src: &Path, dst: &Path) -> StorageResult<()>;
}

/// Gzip whole-file codec.
pub struct GzipArchiver;

impl GzipArchiver {
    pub const NAME: &'static str = "gzip";
}

#[async_trait]
impl Archiver for GzipArchiver {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn suffix(&self) -> &'static str {
        ".gz"
    }

    async fn compress(&self, src: &Path, dst: &Path) -> StorageResult<u64> {
        run_codec(src, dst, |src, dst| {
            let mut input = std::fs::File::open(src)?;
            let output = std::fs::File::create(dst)?;
            let mut encoder = GzEncoder::new(output, Compression::default());
            std::io::copy(&mut input, &mut encoder)?;
            let output = encoder.finish()?;
            Ok(output.metadata()?.len())
        })
        .await
    }

    async fn decompress(&self, src: &Path, dst: &Path) -> StorageResult<()> {
        run_codec(src, dst, |src, dst| {
            let input = std::fs::File::open(src)?;
            let mut decoder = GzDecoder::new(input);
            let mut output = std::fs::File::create(dst)?;
            std::io::copy(&mut decoder, &mut output)?;
            Ok(0)
        })
        .await
        .map(|_| ())
    }
}

/// Pass-through codec used when compression is disabled or unknown codec
/// names come back from old records. Key suffix is empty, so the cold key
/// is the bare digest.
pub struct IdentityArchiver;

impl IdentityArchiver {
    pub const NAME: &'static str = "none";
}

#[async_trait]
impl Archiver for IdentityArchiver {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn suffix(&self) -> &'static str {
        ""
    }

    async fn compress(&self, src: &Path, dst: &Path) -> StorageResult<u64> {
        Ok(tokio::fs::copy(src, dst).await?)
    }

    async fn decompress(&self, src: &Path, dst: &Path) -> StorageResult<()> {
        tokio::fs::copy(src, dst).await?;
        Ok(())
    }
}

/// Selects codecs for new archives and resolves recorded codec names.
#[derive(Clone)]
pub struct ArchiverRegistry {
    gzip: Arc<GzipArchiver>,
    identity: Arc<IdentityArchiver>,
    compress_enabled: bool,
}

impl ArchiverRegistry {
    pub fn new(compress_enabled: bool) -> Self {
        Self {
            gzip: Arc::new(GzipArchiver),
            identity: Arc::new(IdentityArchiver),
            compress_enabled,
        }
    }

    /// Codec for a record being archived now.
    pub fn select(&self) -> Arc<dyn Archiver> {
        if self.compress_enabled {
            self.gzip.clone()
        } else {
            self.identity.clone()
        }
    }

    /// Codec recorded on an existing record. Unknown names fall back to the
    /// pass-through codec.
    pub fn by_name(&self, name: &str) -> Arc<dyn Archiver> {
        match name {
            GzipArchiver::NAME => self.gzip.clone(),
            _ => self.identity.clone(),
        }
    }

    /// Cold-storage key for a digest archived with the named codec.
    pub fn key(&self, sha256: &str, archiver_name: &str) -> String {
        format!("{}{}", sha256, self.by_name(archiver_name).suffix())
    }
}

#[async_trait]
pub trait DeltaCodec: Send + Sync {
    /// Encode `src` against `base` into `dst`; returns bytes written.
    async fn diff(&self, src: &Path, base: &Path, dst: &Path) -> StorageResult<u64>;

    /// Reconstruct the original from `delta` and `base` into `dst`,
    /// byte-for-byte.
    async fn patch(&self, delta: &Path, base: &Path, dst: &Path) -> StorageResult<()>;
}

/// Stand-in delta codec that gzips the full source instead of computing a
/// true binary diff. Honors the byte-for-byte recovery contract; a real
/// diff implementation plugs in behind [`DeltaCodec`] without touching the
/// lifecycle layer.
pub struct GzipDeltaCodec {
    inner: GzipArchiver,
}

impl GzipDeltaCodec {
    pub fn new() -> Self {
        Self { inner: GzipArchiver }
    }
}

impl Default for GzipDeltaCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeltaCodec for GzipDeltaCodec {
    async fn diff(&self, src: &Path, _base: &Path, dst: &Path) -> StorageResult<u64> {
        self.inner.compress(src, dst).await
    }

    async fn patch(&self, delta: &Path, _base: &Path, dst: &Path) -> StorageResult<()> {
        self.inner.decompress(delta, dst).await
    }
}

async fn run_codec<F>(src: &Path, dst: &Path, f: F) -> StorageResult<u64>
where
    F: FnOnce(PathBuf, PathBuf) -> std::io::Result<u64> + Send + 'static,
{
    let src = src.to_path_buf();
    let dst = dst.to_path_buf();
    tokio::task::spawn_blocking(move || f(src, dst))
        .await
        .map_err(|e| StorageError::Codec(format!("codec task failed: {}", e)))?
        .map_err(StorageError::from)
}
