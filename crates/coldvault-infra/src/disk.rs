//! Disk-health admission gate.
//!
//! A periodic probe of the working volume's free space flips a shared
//! health flag. The download stage reads the flag before accepting new
//! work and backs off while unhealthy; everything already in flight
//! finishes normally. The gate composes with, and is independent of, the
//! semaphore bounds on stage concurrency.

use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::Disks;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Read side of the health flag. Cheap to clone; safe to share across
/// stages.
#[derive(Clone)]
pub struct DiskHealthGate {
    rx: watch::Receiver<bool>,
}

impl DiskHealthGate {
    pub fn is_healthy(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the volume is healthy. Returns immediately when it
    /// already is; if the monitor has gone away the gate stays at its last
    /// observed value rather than blocking forever.
    pub async fn wait_healthy(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                debug!("disk health monitor gone, proceeding with last known state");
                return;
            }
        }
    }

    /// A gate that always reports healthy. For wiring paths that have no
    /// disk constraint (and for tests).
    pub fn always_healthy() -> Self {
        let (tx, rx) = watch::channel(true);
        // Keep the sender alive so `changed()` never errors out.
        std::mem::forget(tx);
        Self { rx }
    }

    /// A gate driven by the returned sender. Test hook.
    pub fn manual(initial: bool) -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(initial);
        (tx, Self { rx })
    }
}

/// Periodic free-space probe for the working volume.
pub struct DiskHealthMonitor {
    work_dir: PathBuf,
    min_free_bytes: u64,
    check_interval: Duration,
}

impl DiskHealthMonitor {
    pub fn new(work_dir: impl Into<PathBuf>, min_free_bytes: u64, check_interval: Duration) -> Self {
        Self {
            work_dir: work_dir.into(),
            min_free_bytes,
            check_interval,
        }
    }

    /// Spawn the probe task. The gate starts healthy and is re-evaluated
    /// every interval until cancellation.
    pub fn start(self, cancel: CancellationToken) -> (DiskHealthGate, JoinHandle<()>) {
        let (tx, rx) = watch::channel(true);
        let handle = tokio::spawn(async move {
            let mut tick = interval(self.check_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        let work_dir = self.work_dir.clone();
                        let probe = tokio::task::spawn_blocking(move || available_space(&work_dir)).await;
                        let healthy = match probe {
                            Ok(Some(available)) => {
                                let healthy = available >= self.min_free_bytes;
                                if !healthy {
                                    warn!(
                                        available_bytes = available,
                                        min_free_bytes = self.min_free_bytes,
                                        path = %self.work_dir.display(),
                                        "low free disk space, pausing downloads"
                                    );
                                }
                                healthy
                            }
                            Ok(None) => {
                                warn!(path = %self.work_dir.display(), "could not determine disk space, assuming healthy");
                                true
                            }
                            Err(e) => {
                                warn!(error = %e, "disk probe task failed, assuming healthy");
                                true
                            }
                        };
                        if healthy && !*tx.borrow() {
                            info!(path = %self.work_dir.display(), "disk space recovered, resuming downloads");
                        }
                        if tx.send(healthy).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        (DiskHealthGate { rx }, handle)
    }
}

/// Available bytes on the disk holding `path`, picking the longest matching
/// mount point.
fn available_space(path: &Path) -> Option<u64> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}
