//! Per-job counters and the process-wide monitor registry.
//!
//! The registry is an explicit object created at wiring time and handed to
//! whoever needs it; a single background reporter task logs every
//! registered job's counters at a fixed interval.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use coldvault_core::Throughput;

/// Point-in-time copy of a job's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounters {
    pub success: u64,
    pub failed: u64,
    pub total: u64,
    pub total_bytes: u64,
}

/// Mutable bookkeeping for one job run. Counters only ever increase;
/// `total` and `total_bytes` move on every processed item regardless of
/// outcome.
pub struct JobContext {
    name: String,
    success: AtomicU64,
    failed: AtomicU64,
    total: AtomicU64,
    total_bytes: AtomicU64,
    started_at: Instant,
}

impl JobContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            success: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            total: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record_success(&self, bytes: u64) {
        self.success.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_failure(&self, bytes: u64) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn counters(&self) -> JobCounters {
        JobCounters {
            success: self.success.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            total: self.total.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn throughput(&self) -> Throughput {
        Throughput::new(self.counters().total_bytes, self.elapsed())
    }
}

/// Named registry of running jobs, polled by the reporter task.
#[derive(Default)]
pub struct JobMonitorRegistry {
    jobs: Mutex<HashMap<String, Arc<JobContext>>>,
}

impl JobMonitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, ctx: Arc<JobContext>) {
        let mut jobs = self.lock();
        if jobs.insert(ctx.name().to_string(), ctx.clone()).is_some() {
            warn!(job = %ctx.name(), "job registered while a previous run was still registered");
        }
    }

    pub fn deregister(&self, name: &str) {
        self.lock().remove(name);
    }

    pub fn snapshot(&self) -> Vec<(String, JobCounters)> {
        self.lock()
            .iter()
            .map(|(name, ctx)| (name.clone(), ctx.counters()))
            .collect()
    }

    /// Spawn the single background reporter that logs every registered
    /// job's counters until cancelled.
    pub fn spawn_reporter(
        self: Arc<Self>,
        report_interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = self;
        tokio::spawn(async move {
            let mut tick = interval(report_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        for (name, counters) in registry.snapshot() {
                            info!(
                                job = %name,
                                success = counters.success,
                                failed = counters.failed,
                                total = counters.total,
                                total_bytes = counters.total_bytes,
                                "job progress"
                            );
                        }
                    }
                }
            }
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<JobContext>>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
