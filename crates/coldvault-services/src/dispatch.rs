//! Candidate dispatcher: one demand-fed sink per record kind.
//!
//! Externally observed eligibility events go straight into the matching
//! sink; demand signalled by each sink's pull subscriber triggers a
//! backlog-refill query that prefers records stuck in a waiting status
//! past the staleness threshold, then tops up with newly eligible ones.
//! Handlers route records by status into the pipelines.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use coldvault_core::models::{ArchiveRecord, ArchiveStatus, CompressRecord, CompressStatus};
use coldvault_core::store::{ArchiveStore, CompressStore};
use coldvault_worker::{
    BacklogFeed, BacklogSource, BufferedResourceManager, PullSubscriber, ResourceHandler,
    ResourceManager, TaskOutcome,
};

use crate::archive::ArchivePipeline;
use crate::compress::DeltaWorker;
use crate::restore::RestorePipeline;

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    pub sink_buffer: usize,
    pub max_concurrency: usize,
    pub queue_capacity: usize,
    pub pull_interval: Duration,
    /// Age after which a record in a waiting status is offered again.
    pub retry_stale: chrono::Duration,
}

struct ArchiveBacklog {
    store: Arc<dyn ArchiveStore>,
    retry_stale: chrono::Duration,
}

#[async_trait]
impl BacklogSource<ArchiveRecord> for ArchiveBacklog {
    async fn refill(&self, demand: usize) -> anyhow::Result<Vec<ArchiveRecord>> {
        let limit = demand as i64;
        let cutoff = Utc::now() - self.retry_stale;
        let mut records = self
            .store
            .stale_by_status(ArchiveStatus::WaitToRestore, cutoff, limit)
            .await?;
        let shortfall = limit - records.len() as i64;
        if shortfall > 0 {
            let fresh = self
                .store
                .page_by_status(ArchiveStatus::Created, None, shortfall)
                .await?;
            records.extend(fresh);
        }
        Ok(records)
    }
}

struct CompressBacklog {
    store: Arc<dyn CompressStore>,
    retry_stale: chrono::Duration,
}

#[async_trait]
impl BacklogSource<CompressRecord> for CompressBacklog {
    async fn refill(&self, demand: usize) -> anyhow::Result<Vec<CompressRecord>> {
        let limit = demand as i64;
        let cutoff = Utc::now() - self.retry_stale;
        let mut records = self
            .store
            .stale_by_status(CompressStatus::WaitToUncompress, cutoff, limit)
            .await?;
        let shortfall = limit - records.len() as i64;
        if shortfall > 0 {
            let fresh = self
                .store
                .page_by_status(CompressStatus::Created, None, shortfall)
                .await?;
            records.extend(fresh);
        }
        Ok(records)
    }
}

struct ArchiveCandidateHandler {
    archive: Arc<ArchivePipeline>,
    restore: Arc<RestorePipeline>,
}

#[async_trait]
impl ResourceHandler<ArchiveRecord> for ArchiveCandidateHandler {
    async fn handle(&self, record: ArchiveRecord) -> TaskOutcome {
        // Failures are logged and persisted by the pipelines themselves.
        let result = match record.status {
            ArchiveStatus::Created => self.archive.archive_one(record).await,
            ArchiveStatus::WaitToRestore => self.restore.restore_one(record).await,
            other => {
                warn!(status = %other, "no handler for record status");
                Ok(())
            }
        };
        match result {
            Ok(()) => TaskOutcome::Completed,
            Err(_) => TaskOutcome::Failed,
        }
    }
}

struct CompressCandidateHandler {
    worker: Arc<DeltaWorker>,
}

#[async_trait]
impl ResourceHandler<CompressRecord> for CompressCandidateHandler {
    async fn handle(&self, record: CompressRecord) -> TaskOutcome {
        match self.worker.process(record).await {
            Ok(()) => TaskOutcome::Completed,
            Err(_) => TaskOutcome::Failed,
        }
    }
}

pub struct CandidateDispatcher {
    archive_feed: BacklogFeed<ArchiveRecord>,
    compress_feed: BacklogFeed<CompressRecord>,
    archive_manager: BufferedResourceManager<ArchiveRecord>,
    compress_manager: BufferedResourceManager<CompressRecord>,
    cancel: CancellationToken,
}

impl CandidateDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        archive: Arc<ArchivePipeline>,
        restore: Arc<RestorePipeline>,
        delta: Arc<DeltaWorker>,
        archive_store: Arc<dyn ArchiveStore>,
        compress_store: Arc<dyn CompressStore>,
        config: DispatcherConfig,
    ) -> Self {
        let cancel = CancellationToken::new();

        let archive_manager = BufferedResourceManager::new(
            config.max_concurrency,
            config.queue_capacity,
            Arc::new(ArchiveCandidateHandler { archive, restore }),
        );
        let (archive_feed, archive_rx, archive_demand, _archive_refill) = BacklogFeed::start(
            config.sink_buffer,
            Arc::new(ArchiveBacklog {
                store: archive_store,
                retry_stale: config.retry_stale,
            }),
            cancel.child_token(),
        );
        PullSubscriber::spawn(
            archive_rx,
            archive_demand,
            archive_manager.clone(),
            config.pull_interval,
            cancel.child_token(),
        );

        let compress_manager = BufferedResourceManager::new(
            config.max_concurrency,
            config.queue_capacity,
            Arc::new(CompressCandidateHandler { worker: delta }),
        );
        let (compress_feed, compress_rx, compress_demand, _compress_refill) = BacklogFeed::start(
            config.sink_buffer,
            Arc::new(CompressBacklog {
                store: compress_store,
                retry_stale: config.retry_stale,
            }),
            cancel.child_token(),
        );
        PullSubscriber::spawn(
            compress_rx,
            compress_demand,
            compress_manager.clone(),
            config.pull_interval,
            cancel.child_token(),
        );

        Self {
            archive_feed,
            compress_feed,
            archive_manager,
            compress_manager,
            cancel,
        }
    }

    /// Push an archive-record eligibility event into its sink.
    pub async fn notify_archive(&self, record: ArchiveRecord) -> bool {
        self.archive_feed.emit(record).await
    }

    /// Push a compress-record eligibility event into its sink.
    pub async fn notify_compress(&self, record: CompressRecord) -> bool {
        self.compress_feed.emit(record).await
    }

    /// Stop demand and refuse new submissions. Work already in flight
    /// finishes normally; sink contents are not guaranteed to drain.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.archive_manager.stop();
        self.compress_manager.stop();
    }
}
