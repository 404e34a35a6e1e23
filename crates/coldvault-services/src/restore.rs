//! Restore pipeline: `WaitToRestore -> Restoring -> {Restored |
//! RestoreFailed}`, falling back to `WaitToRestore` while the cold object
//! is still thawing.
//!
//! Pages are shuffled before processing to spread load across the cold
//! store's key space, then handled sequentially; parallelism against the
//! cold tier is the client's own concern. A digest mismatch on the
//! recovered bytes is a hard failure and never reaches primary storage.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use coldvault_core::digest::sha256_file;
use coldvault_core::models::{ArchiveRecord, ArchiveStatus};
use coldvault_core::store::ArchiveStore;
use coldvault_core::{AppError, Throughput};
use coldvault_storage::{ArchiverRegistry, ArtifactStorage, ColdStorage};
use coldvault_worker::{JobHandler, JobMonitorRegistry, JobRunner, JobSummary};

use crate::events::{EventBus, StorageEvent};

pub const JOB_NAME: &str = "restore";

#[derive(Clone, Debug)]
pub struct RestoreConfig {
    pub work_dir: PathBuf,
    pub page_size: i64,
}

pub struct RestorePipeline {
    store: Arc<dyn ArchiveStore>,
    storage: Arc<dyn ArtifactStorage>,
    cold: Arc<dyn ColdStorage>,
    archivers: ArchiverRegistry,
    events: EventBus,
    registry: Arc<JobMonitorRegistry>,
    work_dir: PathBuf,
    page_size: i64,
}

impl RestorePipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ArchiveStore>,
        storage: Arc<dyn ArtifactStorage>,
        cold: Arc<dyn ColdStorage>,
        archivers: ArchiverRegistry,
        events: EventBus,
        registry: Arc<JobMonitorRegistry>,
        config: RestoreConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            storage,
            cold,
            archivers,
            events,
            registry,
            work_dir: config.work_dir,
            page_size: config.page_size,
        })
    }

    /// One pass over the `WaitToRestore` backlog.
    pub async fn run(self: Arc<Self>) -> JobSummary {
        let (tx, rx) = mpsc::channel(16);
        let store = self.store.clone();
        let page_size = self.page_size;

        let lister = tokio::spawn(async move {
            let mut after = None;
            loop {
                let mut page = match store
                    .page_by_status(ArchiveStatus::WaitToRestore, after, page_size)
                    .await
                {
                    Ok(page) => page,
                    Err(e) => {
                        error!(error = %e, "listing restore candidates failed");
                        break;
                    }
                };
                let Some(last) = page.last() else { break };
                after = Some(last.id);
                let full_page = page.len() as i64 == page_size;
                // Spread the page across the cold store's key space.
                page.shuffle(&mut rand::rng());
                for record in page {
                    if tx.send(record).await.is_err() {
                        return;
                    }
                }
                if !full_page {
                    break;
                }
            }
        });

        let runner = JobRunner::new(
            JOB_NAME,
            self.registry.clone(),
            Arc::new(RestoreJob(self.clone())) as Arc<dyn JobHandler<ArchiveRecord>>,
        );
        let summary = runner.run(rx).await;
        let _ = lister.await;
        summary
    }

    pub async fn run_scheduled(self: Arc<Self>, every: Duration, cancel: CancellationToken) {
        let mut tick = interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    let summary = self.clone().run().await;
                    debug!(
                        total = summary.counters.total,
                        failed = summary.counters.failed,
                        "scheduled restore run finished"
                    );
                }
            }
        }
    }

    /// Claim and restore a single record. "Not thawed yet" is a deferral,
    /// not a failure: the record goes back to `WaitToRestore` and the next
    /// run picks it up again.
    pub async fn restore_one(&self, mut record: ArchiveRecord) -> Result<()> {
        if !self
            .store
            .try_claim(
                record.id,
                ArchiveStatus::WaitToRestore,
                ArchiveStatus::Restoring,
            )
            .await?
        {
            info!(sha256 = %record.sha256, "already being restored by another runner");
            return Ok(());
        }
        record.status = ArchiveStatus::Restoring;
        debug!(sha256 = %record.sha256, "start restore");

        let key = self.archivers.key(&record.sha256, &record.archiver);
        match self.cold.restore_ready(&key).await {
            Ok(true) => {}
            Ok(false) => {
                record.status = ArchiveStatus::WaitToRestore;
                record.touch();
                self.store.update(&record).await?;
                debug!(key = %key, "cold object not thawed yet, deferring");
                return Ok(());
            }
            Err(e) => return self.fail(record, e.into()).await,
        }

        let started = Instant::now();
        match self.materialize(&record, &key).await {
            Ok(()) => {
                record.status = ArchiveStatus::Restored;
                record.touch();
                self.store.update(&record).await?;
                let throughput = Throughput::new(record.size.max(0) as u64, started.elapsed());
                self.events.publish(StorageEvent::FileRestored {
                    sha256: record.sha256.clone(),
                    storage_credentials_key: record.storage_credentials_key.clone(),
                    throughput,
                });
                info!(sha256 = %record.sha256, %throughput, "restore complete");
                Ok(())
            }
            Err(e) => self.fail(record, e).await,
        }
    }

    async fn fail(&self, mut record: ArchiveRecord, e: anyhow::Error) -> Result<()> {
        record.status = ArchiveStatus::RestoreFailed;
        record.touch();
        if let Err(update_err) = self.store.update(&record).await {
            error!(sha256 = %record.sha256, error = %update_err, "failed to persist restore failure");
        }
        error!(sha256 = %record.sha256, error = %e, "restore failed");
        Err(e)
    }

    /// Download, decompress, verify, and store back. The scratch dir is
    /// removed on every exit path.
    async fn materialize(&self, record: &ArchiveRecord, key: &str) -> Result<()> {
        let scratch = tempfile::Builder::new()
            .prefix(&record.sha256)
            .tempdir_in(&self.work_dir)
            .context("create scratch dir")?;

        let archived = self
            .cold
            .get(key, scratch.path())
            .await
            .context("download archived object")?;

        let recovered = scratch.path().join(format!("{}.restored", record.sha256));
        self.archivers
            .by_name(&record.archiver)
            .decompress(&archived, &recovered)
            .await
            .context("decompress archived object")?;

        let digest = sha256_file(&recovered).await?;
        if digest != record.sha256 {
            return Err(AppError::IntegrityCheckFailed {
                expected: record.sha256.clone(),
                actual: digest,
            }
            .into());
        }

        self.storage
            .store(
                &record.sha256,
                &recovered,
                record.storage_credentials_key.as_deref(),
            )
            .await
            .context("store recovered artifact")?;
        Ok(())
    }
}

struct RestoreJob(Arc<RestorePipeline>);

#[async_trait]
impl JobHandler<ArchiveRecord> for RestoreJob {
    async fn on_item(&self, item: ArchiveRecord) -> Result<()> {
        self.0.restore_one(item).await
    }

    fn size_of(&self, item: &ArchiveRecord) -> u64 {
        item.size.max(0) as u64
    }
}
