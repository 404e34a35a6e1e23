//! Delta-compression worker.
//!
//! Routes compress records by status: `Created` records are encoded as a
//! delta against their base and the delta artifact replaces the source in
//! primary storage; `WaitToUncompress` records are reconstructed. When a
//! record's base is itself delta-stored the whole base chain is queued and
//! unpacked root-first, one claimed link at a time.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use coldvault_core::models::{CompressRecord, CompressStatus};
use coldvault_core::store::CompressStore;
use coldvault_core::Throughput;
use coldvault_storage::{ArtifactStorage, DeltaCodec};

use crate::events::{EventBus, StorageEvent};

pub struct DeltaWorker {
    store: Arc<dyn CompressStore>,
    storage: Arc<dyn ArtifactStorage>,
    codec: Arc<dyn DeltaCodec>,
    events: EventBus,
    work_dir: PathBuf,
}

impl DeltaWorker {
    pub fn new(
        store: Arc<dyn CompressStore>,
        storage: Arc<dyn ArtifactStorage>,
        codec: Arc<dyn DeltaCodec>,
        events: EventBus,
        work_dir: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            storage,
            codec,
            events,
            work_dir,
        })
    }

    pub async fn process(&self, record: CompressRecord) -> Result<()> {
        match record.status {
            CompressStatus::Created => self.compress_one(record).await,
            CompressStatus::WaitToUncompress => self.uncompress_chain(record).await,
            other => {
                warn!(status = %other, sha256 = %record.sha256, "no handler for record status");
                Ok(())
            }
        }
    }

    async fn compress_one(&self, mut record: CompressRecord) -> Result<()> {
        // A self-referential delta would lose the base bytes.
        if record.sha256 == record.base_sha256 {
            anyhow::bail!("delta source and base must differ: {}", record.sha256);
        }
        if !self
            .store
            .try_claim(record.id, CompressStatus::Created, CompressStatus::Compressing)
            .await?
        {
            info!(sha256 = %record.sha256, "already being compressed by another runner");
            return Ok(());
        }
        record.status = CompressStatus::Compressing;
        debug!(sha256 = %record.sha256, base = %record.base_sha256, "start delta compress");

        let started = Instant::now();
        let creds = record.storage_credentials_key.clone();
        let work = async {
            let scratch = tempfile::Builder::new()
                .prefix(&record.sha256)
                .tempdir_in(&self.work_dir)
                .context("create scratch dir")?;
            let src = self
                .storage
                .fetch(
                    &record.sha256,
                    Some(record.uncompressed_size.max(0) as u64),
                    creds.as_deref(),
                    scratch.path(),
                )
                .await
                .context("fetch delta source")?;
            let base = self
                .storage
                .fetch(
                    &record.base_sha256,
                    record.base_size.map(|s| s.max(0) as u64),
                    creds.as_deref(),
                    scratch.path(),
                )
                .await
                .context("fetch delta base")?;
            let delta_path = scratch.path().join(record.delta_key());
            let delta_size = self
                .codec
                .diff(&src, &base, &delta_path)
                .await
                .context("encode delta")?;
            self.storage
                .store(&record.delta_key(), &delta_path, creds.as_deref())
                .await
                .context("store delta artifact")?;
            Ok::<u64, anyhow::Error>(delta_size)
        };

        match work.await {
            Ok(delta_size) => {
                record.compressed_size = delta_size as i64;
                record.status = CompressStatus::Compressed;
                record.touch();
                self.store.update(&record).await?;
                let throughput =
                    Throughput::new(record.uncompressed_size.max(0) as u64, started.elapsed());
                self.events.publish(StorageEvent::FileCompressed {
                    sha256: record.sha256.clone(),
                    base_sha256: record.base_sha256.clone(),
                    uncompressed: record.uncompressed_size,
                    compressed: record.compressed_size,
                    storage_credentials_key: record.storage_credentials_key.clone(),
                    throughput,
                });
                info!(sha256 = %record.sha256, %throughput, "delta compress complete");
                Ok(())
            }
            Err(e) => {
                record.status = CompressStatus::CompressFailed;
                record.touch();
                if let Err(update_err) = self.store.update(&record).await {
                    error!(sha256 = %record.sha256, error = %update_err, "failed to persist compress failure");
                }
                error!(sha256 = %record.sha256, error = %e, "delta compress failed");
                Err(e)
            }
        }
    }

    /// Queue the record plus every delta-stored base above it, then unpack
    /// root-first. A failed link stops the chain; later runs resume from
    /// the waiting links.
    async fn uncompress_chain(&self, record: CompressRecord) -> Result<()> {
        let creds = record.storage_credentials_key.clone();
        let mut chain = vec![record];
        loop {
            let base_digest = match chain.last() {
                Some(top) => top.base_sha256.clone(),
                None => break,
            };
            let base = self
                .store
                .find_by_digest(
                    &base_digest,
                    creds.as_deref(),
                    &[CompressStatus::Compressed, CompressStatus::Completed],
                )
                .await?;
            match base {
                Some(mut base) => {
                    base.status = CompressStatus::WaitToUncompress;
                    base.touch();
                    self.store.update(&base).await?;
                    chain.push(base);
                }
                None => break,
            }
        }
        debug!(chain_len = chain.len(), "delta restore chain");

        while let Some(link) = chain.pop() {
            if !self.uncompress_one(link).await? {
                break;
            }
        }
        Ok(())
    }

    async fn uncompress_one(&self, mut record: CompressRecord) -> Result<bool> {
        let creds = record.storage_credentials_key.clone();
        // A base still unpacking means this link gets retried later.
        if let Some(base) = self
            .store
            .find_by_digest(
                &record.base_sha256,
                creds.as_deref(),
                &[CompressStatus::WaitToUncompress, CompressStatus::Uncompressing],
            )
            .await?
        {
            info!(sha256 = %record.sha256, base = %base.sha256, "base still unpacking, deferring");
            return Ok(false);
        }
        if !self
            .store
            .try_claim(
                record.id,
                CompressStatus::WaitToUncompress,
                CompressStatus::Uncompressing,
            )
            .await?
        {
            info!(sha256 = %record.sha256, "already being uncompressed by another runner");
            return Ok(false);
        }
        record.status = CompressStatus::Uncompressing;
        debug!(sha256 = %record.sha256, "start delta restore");

        let started = Instant::now();
        let work = async {
            let scratch = tempfile::Builder::new()
                .prefix(&record.sha256)
                .tempdir_in(&self.work_dir)
                .context("create scratch dir")?;
            let delta = self
                .storage
                .fetch(
                    &record.delta_key(),
                    Some(record.compressed_size.max(0) as u64),
                    creds.as_deref(),
                    scratch.path(),
                )
                .await
                .context("fetch delta artifact")?;
            let base = self
                .storage
                .fetch(
                    &record.base_sha256,
                    record.base_size.map(|s| s.max(0) as u64),
                    creds.as_deref(),
                    scratch.path(),
                )
                .await
                .context("fetch delta base")?;
            let out = scratch.path().join(format!("{}.restored", record.sha256));
            self.codec
                .patch(&delta, &base, &out)
                .await
                .context("apply delta")?;
            self.storage
                .store(&record.sha256, &out, creds.as_deref())
                .await
                .context("store reconstructed artifact")?;
            self.storage
                .delete(&record.delta_key(), creds.as_deref())
                .await
                .context("delete delta artifact")?;
            Ok::<(), anyhow::Error>(())
        };

        match work.await {
            Ok(()) => {
                record.status = CompressStatus::Uncompressed;
                record.touch();
                self.store.update(&record).await?;
                let throughput =
                    Throughput::new(record.uncompressed_size.max(0) as u64, started.elapsed());
                self.events.publish(StorageEvent::FileUncompressed {
                    sha256: record.sha256.clone(),
                    compressed: record.compressed_size,
                    uncompressed: record.uncompressed_size,
                    storage_credentials_key: record.storage_credentials_key.clone(),
                    throughput,
                });
                info!(sha256 = %record.sha256, %throughput, "delta restore complete");
                Ok(true)
            }
            Err(e) => {
                record.status = CompressStatus::UncompressFailed;
                record.touch();
                if let Err(update_err) = self.store.update(&record).await {
                    error!(sha256 = %record.sha256, error = %update_err, "failed to persist uncompress failure");
                }
                error!(sha256 = %record.sha256, error = %e, "delta restore failed");
                Err(e)
            }
        }
    }
}
