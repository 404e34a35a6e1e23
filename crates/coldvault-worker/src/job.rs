//! Job runners: turn a stream of domain items into a monitored,
//! synchronously-awaitable run. A single item's failure never terminates
//! the run; registry cleanup happens on every exit path, including
//! cancellation of the run future.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use coldvault_core::Throughput;

use crate::monitor::{JobContext, JobCounters, JobMonitorRegistry};

/// Per-item work invoked by a job runner.
#[async_trait]
pub trait JobHandler<T>: Send + Sync {
    async fn on_item(&self, item: T) -> anyhow::Result<()>;

    /// Bytes attributed to the item in the job's byte counters.
    fn size_of(&self, _item: &T) -> u64 {
        0
    }
}

/// Final counters of a finished run.
#[derive(Debug, Clone)]
pub struct JobSummary {
    pub name: String,
    pub counters: JobCounters,
    pub elapsed: Duration,
}

impl JobSummary {
    pub fn throughput(&self) -> Throughput {
        Throughput::new(self.counters.total_bytes, self.elapsed)
    }
}

/// Deregisters on drop so cleanup survives cancellation of the run future.
struct RegistryGuard {
    registry: Arc<JobMonitorRegistry>,
    name: String,
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        self.registry.deregister(&self.name);
    }
}

/// Sequential job runner: items are handled inline, one at a time.
pub struct JobRunner<T> {
    name: String,
    registry: Arc<JobMonitorRegistry>,
    handler: Arc<dyn JobHandler<T>>,
}

impl<T: Send + 'static> JobRunner<T> {
    pub fn new(
        name: impl Into<String>,
        registry: Arc<JobMonitorRegistry>,
        handler: Arc<dyn JobHandler<T>>,
    ) -> Self {
        Self {
            name: name.into(),
            registry,
            handler,
        }
    }

    /// Drive the run to completion. Returning is the completion latch:
    /// when this resolves, every item has been handled and the job is
    /// deregistered.
    pub async fn run(&self, mut items: mpsc::Receiver<T>) -> JobSummary {
        let ctx = Arc::new(JobContext::new(self.name.clone()));
        self.registry.register(ctx.clone());
        let _guard = RegistryGuard {
            registry: self.registry.clone(),
            name: self.name.clone(),
        };

        while let Some(item) = items.recv().await {
            let bytes = self.handler.size_of(&item);
            match self.handler.on_item(item).await {
                Ok(()) => ctx.record_success(bytes),
                Err(e) => {
                    error!(job = %self.name, error = %e, "item failed");
                    ctx.record_failure(bytes);
                }
            }
        }

        finish(&self.name, &ctx)
    }
}

/// Fan-out job runner: each item is dispatched to a bounded worker pool.
/// Completion is only reported after every dispatched item has finished.
pub struct FanOutJobRunner<T> {
    name: String,
    registry: Arc<JobMonitorRegistry>,
    handler: Arc<dyn JobHandler<T>>,
    workers: usize,
}

impl<T: Send + 'static> FanOutJobRunner<T> {
    pub fn new(
        name: impl Into<String>,
        registry: Arc<JobMonitorRegistry>,
        handler: Arc<dyn JobHandler<T>>,
        workers: usize,
    ) -> Self {
        Self {
            name: name.into(),
            registry,
            handler,
            workers,
        }
    }

    pub async fn run(&self, mut items: mpsc::Receiver<T>) -> JobSummary {
        let ctx = Arc::new(JobContext::new(self.name.clone()));
        self.registry.register(ctx.clone());
        let _guard = RegistryGuard {
            registry: self.registry.clone(),
            name: self.name.clone(),
        };

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let tracker = TaskTracker::new();

        while let Some(item) = items.recv().await {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let handler = self.handler.clone();
            let ctx = ctx.clone();
            let name = self.name.clone();
            tracker.spawn(async move {
                let _permit = permit;
                let bytes = handler.size_of(&item);
                match handler.on_item(item).await {
                    Ok(()) => ctx.record_success(bytes),
                    Err(e) => {
                        error!(job = %name, error = %e, "item failed");
                        ctx.record_failure(bytes);
                    }
                }
            });
        }

        // Completion barrier: the upstream channel is exhausted, but the
        // run is only complete once all dispatched work has finished.
        tracker.close();
        tracker.wait().await;

        finish(&self.name, &ctx)
    }
}

fn finish(name: &str, ctx: &JobContext) -> JobSummary {
    let summary = JobSummary {
        name: name.to_string(),
        counters: ctx.counters(),
        elapsed: ctx.elapsed(),
    };
    info!(
        job = %name,
        success = summary.counters.success,
        failed = summary.counters.failed,
        total = summary.counters.total,
        throughput = %summary.throughput(),
        "job run complete"
    );
    summary
}
