//! Service wiring: database, storage backends, health monitoring, the
//! candidate dispatcher, and the two scheduled pipeline entrypoints.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use coldvault_core::Config;
use coldvault_db::{ArchiveRepository, CompressRepository};
use coldvault_infra::DiskHealthMonitor;
use coldvault_services::{
    ArchiveConfig, ArchivePipeline, CandidateDispatcher, DeltaWorker, DispatcherConfig, EventBus,
    RestoreConfig, RestorePipeline,
};
use coldvault_storage::{ArchiverRegistry, GzipDeltaCodec, LocalArtifactStorage, LocalColdStorage};
use coldvault_worker::JobMonitorRegistry;

pub struct App {
    dispatcher: CandidateDispatcher,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl App {
    pub async fn start(config: Config) -> Result<App> {
        tokio::fs::create_dir_all(&config.work_dir)
            .await
            .with_context(|| format!("create work dir {}", config.work_dir.display()))?;

        let pool = coldvault_db::connect(&config.database_url, config.db_max_connections).await?;
        let archive_store = Arc::new(ArchiveRepository::new(pool.clone()));
        let compress_store = Arc::new(CompressRepository::new(pool));

        let storage = Arc::new(LocalArtifactStorage::new(&config.storage_root).await?);
        let cold = Arc::new(LocalColdStorage::new(&config.cold_storage_root).await?);
        let archivers = ArchiverRegistry::new(config.compress_enabled);
        let events = EventBus::new(config.event_bus_capacity);
        let registry = Arc::new(JobMonitorRegistry::new());

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        tasks.push(
            registry
                .clone()
                .spawn_reporter(config.monitor_report_interval, cancel.child_token()),
        );

        let monitor = DiskHealthMonitor::new(
            &config.work_dir,
            config.min_disk_free_bytes,
            config.disk_check_interval,
        );
        let (health, monitor_task) = monitor.start(cancel.child_token());
        tasks.push(monitor_task);

        let archive = ArchivePipeline::new(
            archive_store.clone(),
            storage.clone(),
            cold.clone(),
            archivers.clone(),
            events.clone(),
            registry.clone(),
            health,
            ArchiveConfig {
                work_dir: config.work_dir.clone(),
                page_size: config.page_size,
                prefetch: config.pipeline_prefetch,
                download_workers: config.download_workers,
                compress_workers: config.compress_workers,
                upload_workers: config.upload_workers,
            },
        );
        let restore = RestorePipeline::new(
            archive_store.clone(),
            storage.clone(),
            cold,
            archivers,
            events.clone(),
            registry,
            RestoreConfig {
                work_dir: config.work_dir.clone(),
                page_size: config.page_size,
            },
        );
        let delta = DeltaWorker::new(
            compress_store.clone(),
            storage,
            Arc::new(GzipDeltaCodec::new()),
            events,
            config.work_dir.clone(),
        );

        tasks.push(tokio::spawn(
            archive
                .clone()
                .run_scheduled(config.archive_interval, cancel.child_token()),
        ));
        tasks.push(tokio::spawn(
            restore
                .clone()
                .run_scheduled(config.restore_interval, cancel.child_token()),
        ));

        let dispatcher = CandidateDispatcher::start(
            archive,
            restore,
            delta,
            archive_store,
            compress_store,
            DispatcherConfig {
                sink_buffer: config.pending_queue_size,
                max_concurrency: config.max_concurrency,
                queue_capacity: config.pending_queue_size,
                pull_interval: config.pull_interval,
                retry_stale: config.retry_stale,
            },
        );

        info!("coldvault daemon started");
        Ok(App {
            dispatcher,
            cancel,
            tasks,
        })
    }

    /// Stop demand, cancel background tasks, and wait for them to wind
    /// down. Work already in flight completes on its own.
    pub async fn shutdown(self) {
        self.dispatcher.shutdown();
        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
        info!("coldvault daemon stopped");
    }
}
