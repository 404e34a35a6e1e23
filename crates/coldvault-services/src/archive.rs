//! Archive pipeline: `Created -> Archiving -> {Archived | ArchiveFailed}`.
//!
//! A scheduled run lists `Created` records by keyset cursor, claims each
//! one with a status CAS, and moves the claimed records through three
//! independently bounded stages: download from primary storage, compress,
//! upload to cold storage. The download stage additionally waits on the
//! disk-health gate, so a full working volume stops new downloads without
//! touching work already past that stage.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use coldvault_core::models::{ArchiveRecord, ArchiveStatus, StorageClass};
use coldvault_core::store::ArchiveStore;
use coldvault_core::Throughput;
use coldvault_infra::DiskHealthGate;
use coldvault_storage::{Archiver, ArchiverRegistry, ArtifactStorage, ColdStorage};
use coldvault_worker::{FanOutJobRunner, JobHandler, JobMonitorRegistry, JobSummary, StageResult};

use crate::events::{EventBus, StorageEvent};

pub const JOB_NAME: &str = "archive";

#[derive(Clone, Debug)]
pub struct ArchiveConfig {
    pub work_dir: PathBuf,
    pub page_size: i64,
    /// In-flight records per run; also the listing channel depth, so the
    /// scan never reads far ahead of processing.
    pub prefetch: usize,
    pub download_workers: usize,
    pub compress_workers: usize,
    pub upload_workers: usize,
}

pub struct ArchivePipeline {
    store: Arc<dyn ArchiveStore>,
    storage: Arc<dyn ArtifactStorage>,
    cold: Arc<dyn ColdStorage>,
    archivers: ArchiverRegistry,
    events: EventBus,
    registry: Arc<JobMonitorRegistry>,
    health: DiskHealthGate,
    download_slots: Arc<Semaphore>,
    compress_slots: Arc<Semaphore>,
    upload_slots: Arc<Semaphore>,
    work_dir: PathBuf,
    page_size: i64,
    prefetch: usize,
}

impl ArchivePipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ArchiveStore>,
        storage: Arc<dyn ArtifactStorage>,
        cold: Arc<dyn ColdStorage>,
        archivers: ArchiverRegistry,
        events: EventBus,
        registry: Arc<JobMonitorRegistry>,
        health: DiskHealthGate,
        config: ArchiveConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            storage,
            cold,
            archivers,
            events,
            registry,
            health,
            download_slots: Arc::new(Semaphore::new(config.download_workers.max(1))),
            compress_slots: Arc::new(Semaphore::new(config.compress_workers.max(1))),
            upload_slots: Arc::new(Semaphore::new(config.upload_workers.max(1))),
            work_dir: config.work_dir,
            page_size: config.page_size,
            prefetch: config.prefetch.max(1),
        })
    }

    /// One complete pass over the `Created` backlog. Resolves only after
    /// every dispatched record has reached a terminal write.
    pub async fn run(self: Arc<Self>) -> JobSummary {
        let (tx, rx) = mpsc::channel(self.prefetch);
        let store = self.store.clone();
        let page_size = self.page_size;

        let lister = tokio::spawn(async move {
            let mut after = None;
            loop {
                let page = match store
                    .page_by_status(ArchiveStatus::Created, after, page_size)
                    .await
                {
                    Ok(page) => page,
                    Err(e) => {
                        error!(error = %e, "listing archive candidates failed");
                        break;
                    }
                };
                let Some(last) = page.last() else { break };
                after = Some(last.id);
                let full_page = page.len() as i64 == page_size;
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

        let runner = FanOutJobRunner::new(
            JOB_NAME,
            self.registry.clone(),
            Arc::new(ArchiveJob(self.clone())) as Arc<dyn JobHandler<ArchiveRecord>>,
            self.prefetch,
        );
        let summary = runner.run(rx).await;
        let _ = lister.await;
        summary
    }

    /// Re-run on a fixed interval; each tick awaits the previous run, so a
    /// single trigger source never overlaps itself.
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
                        "scheduled archive run finished"
                    );
                }
            }
        }
    }

    /// Claim and archive a single record. A lost claim is a silent skip;
    /// any stage error writes `ArchiveFailed` and surfaces to the caller's
    /// counters.
    pub async fn archive_one(&self, mut record: ArchiveRecord) -> Result<()> {
        if !self
            .store
            .try_claim(record.id, ArchiveStatus::Created, ArchiveStatus::Archiving)
            .await?
        {
            info!(sha256 = %record.sha256, "already being archived by another runner");
            return Ok(());
        }
        record.status = ArchiveStatus::Archiving;
        debug!(sha256 = %record.sha256, "start archive");

        let staged = self.run_stages(record).await;
        let elapsed = staged.elapsed();
        let mut record = staged.item;
        match staged.error {
            None => {
                record.status = ArchiveStatus::Archived;
                record.touch();
                self.store.update(&record).await?;
                let throughput = Throughput::new(record.size.max(0) as u64, elapsed);
                self.events.publish(StorageEvent::FileArchived {
                    sha256: record.sha256.clone(),
                    storage_credentials_key: record.storage_credentials_key.clone(),
                    size: record.size,
                    throughput,
                });
                info!(sha256 = %record.sha256, %throughput, "archive complete");
                Ok(())
            }
            Some(e) => {
                record.status = ArchiveStatus::ArchiveFailed;
                record.touch();
                if let Err(update_err) = self.store.update(&record).await {
                    error!(sha256 = %record.sha256, error = %update_err, "failed to persist archive failure");
                }
                error!(sha256 = %record.sha256, error = %e, "archive failed");
                Err(e)
            }
        }
    }

    async fn run_stages(&self, mut record: ArchiveRecord) -> StageResult<ArchiveRecord> {
        let started = Instant::now();
        let work = async {
            let scratch = tempfile::Builder::new()
                .prefix(&record.sha256)
                .tempdir_in(&self.work_dir)
                .context("create scratch dir")?;

            let original = self.download_stage(&record, scratch.path()).await?;

            let archiver = self.archivers.select();
            record.archiver = archiver.name().to_string();
            let key = self.archivers.key(&record.sha256, &record.archiver);
            let upload_path = if archiver.suffix().is_empty() {
                original
            } else {
                let packed = scratch.path().join(&key);
                self.compress_stage(&archiver, &original, &packed).await?;
                packed
            };

            let uploaded = self
                .upload_stage(&key, &upload_path, record.storage_class)
                .await?;
            record.compressed_size = uploaded as i64;
            Ok::<_, anyhow::Error>(())
        };
        match work.await {
            Ok(()) => StageResult::ok(record, started),
            Err(e) => StageResult::failed(record, e, started),
        }
    }

    async fn download_stage(&self, record: &ArchiveRecord, dest: &Path) -> Result<PathBuf> {
        // Admission: a full working volume pauses new downloads here.
        self.health.wait_healthy().await;
        let _slot = self
            .download_slots
            .clone()
            .acquire_owned()
            .await
            .context("download stage closed")?;
        self.storage
            .fetch(
                &record.sha256,
                Some(record.size.max(0) as u64),
                record.storage_credentials_key.as_deref(),
                dest,
            )
            .await
            .context("download artifact")
    }

    async fn compress_stage(
        &self,
        archiver: &Arc<dyn Archiver>,
        src: &Path,
        dst: &Path,
    ) -> Result<u64> {
        let _slot = self
            .compress_slots
            .clone()
            .acquire_owned()
            .await
            .context("compress stage closed")?;
        archiver.compress(src, dst).await.context("compress artifact")
    }

    async fn upload_stage(&self, key: &str, path: &Path, class: StorageClass) -> Result<u64> {
        let _slot = self
            .upload_slots
            .clone()
            .acquire_owned()
            .await
            .context("upload stage closed")?;
        self.cold
            .put(key, path, class)
            .await
            .context("upload to cold storage")
    }
}

struct ArchiveJob(Arc<ArchivePipeline>);

#[async_trait]
impl JobHandler<ArchiveRecord> for ArchiveJob {
    async fn on_item(&self, item: ArchiveRecord) -> Result<()> {
        self.0.archive_one(item).await
    }

    fn size_of(&self, item: &ArchiveRecord) -> u64 {
        item.size.max(0) as u64
    }
}
