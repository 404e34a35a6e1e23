//! Active-pull subscribers.
//!
//! Instead of being pushed data it must drop or buffer, the consumer
//! periodically computes its own free capacity and requests exactly that
//! much more from upstream. Completion of a dispatched item requests one
//! more unit, which keeps demand at steady state between timer ticks.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::resource::{ResourceHandler, ResourceManager, Submission};
use crate::wrappers::PriorityWrapper;

/// Sends demand requests upstream. Cloneable; a request of zero is a no-op.
#[derive(Clone)]
pub struct DemandHandle {
    tx: mpsc::UnboundedSender<usize>,
}

impl DemandHandle {
    pub fn request(&self, n: usize) {
        if n > 0 {
            let _ = self.tx.send(n);
        }
    }
}

pub fn demand_channel() -> (DemandHandle, mpsc::UnboundedReceiver<usize>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DemandHandle { tx }, rx)
}

/// Feeds a resource manager from an upstream item channel under explicit
/// demand equal to the manager's free capacity.
pub struct PullSubscriber;

impl PullSubscriber {
    pub fn spawn<T, M>(
        mut items: mpsc::Receiver<T>,
        demand: DemandHandle,
        manager: M,
        pull_interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()>
    where
        T: Send + 'static,
        M: ResourceManager<T> + 'static,
    {
        tokio::spawn(async move {
            demand.request(manager.remaining_capacity());
            // Initial demand was just issued; the first recompute comes one
            // interval later.
            let mut tick = interval_at(Instant::now() + pull_interval, pull_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        demand.request(manager.remaining_capacity());
                    }
                    item = items.recv() => {
                        let Some(item) = item else { break };
                        match manager.process(item) {
                            Ok(Submission::Admitted(rx)) => {
                                let demand = demand.clone();
                                tokio::spawn(async move {
                                    let _ = rx.await;
                                    demand.request(1);
                                });
                            }
                            Ok(Submission::Queued) => {}
                            Ok(Submission::Rejected) => {
                                warn!("item rejected by resource manager");
                            }
                            Err(e) => {
                                warn!(error = %e, "resource manager closed, stopping subscriber");
                                break;
                            }
                        }
                    }
                }
            }
            debug!("pull subscriber stopped");
        })
    }
}

/// Pull subscriber with a fixed local concurrency limit and a cheap-spill
/// admission policy: an item arriving while all permits are taken is
/// dropped with a warning instead of queued. Callers that need no-loss
/// semantics use [`PullSubscriber`] with a buffered manager.
pub struct SpillingPullSubscriber;

impl SpillingPullSubscriber {
    pub fn spawn<T>(
        mut items: mpsc::Receiver<PriorityWrapper<T>>,
        demand: DemandHandle,
        limit: usize,
        handler: Arc<dyn ResourceHandler<T>>,
        pull_interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()>
    where
        T: Send + 'static,
    {
        tokio::spawn(async move {
            let semaphore = Arc::new(Semaphore::new(limit));
            demand.request(semaphore.available_permits());
            let mut tick = interval_at(Instant::now() + pull_interval, pull_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        demand.request(semaphore.available_permits());
                    }
                    item = items.recv() => {
                        let Some(wrapped) = item else { break };
                        match semaphore.clone().try_acquire_owned() {
                            Ok(permit) => {
                                let handler = handler.clone();
                                let demand = demand.clone();
                                tokio::spawn(async move {
                                    let _permit = permit;
                                    handler.handle(wrapped.item).await;
                                    demand.request(1);
                                });
                            }
                            Err(_) => {
                                warn!(priority = wrapped.priority, "no free worker, dropping item");
                            }
                        }
                    }
                }
            }
            debug!("spilling pull subscriber stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{BufferedResourceManager, TaskOutcome};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        handled: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl ResourceHandler<u32> for Counter {
        async fn handle(&self, _resource: u32) -> TaskOutcome {
            tokio::time::sleep(self.delay).await;
            self.handled.fetch_add(1, Ordering::SeqCst);
            TaskOutcome::Completed
        }
    }

    #[tokio::test]
    async fn initial_demand_equals_free_capacity() {
        let handler = Arc::new(Counter {
            handled: AtomicUsize::new(0),
            delay: Duration::ZERO,
        });
        let manager = BufferedResourceManager::new(3, 10, handler);
        let (demand, mut demand_rx) = demand_channel();
        let (_items_tx, items_rx) = mpsc::channel::<u32>(8);
        let cancel = CancellationToken::new();

        let handle = PullSubscriber::spawn(
            items_rx,
            demand,
            manager,
            Duration::from_secs(60),
            cancel.clone(),
        );

        assert_eq!(demand_rx.recv().await.unwrap(), 3);
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn completion_requests_one_more() {
        let handler = Arc::new(Counter {
            handled: AtomicUsize::new(0),
            delay: Duration::from_millis(5),
        });
        let manager = BufferedResourceManager::new(1, 10, handler.clone());
        let (demand, mut demand_rx) = demand_channel();
        let (items_tx, items_rx) = mpsc::channel::<u32>(8);
        let cancel = CancellationToken::new();

        let handle = PullSubscriber::spawn(
            items_rx,
            demand,
            manager,
            Duration::from_secs(60),
            cancel.clone(),
        );

        // Initial demand.
        assert_eq!(demand_rx.recv().await.unwrap(), 1);
        items_tx.send(7).await.unwrap();
        // Steady-state demand after the dispatched item completes.
        assert_eq!(demand_rx.recv().await.unwrap(), 1);
        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn spilling_subscriber_drops_beyond_limit() {
        let handler = Arc::new(Counter {
            handled: AtomicUsize::new(0),
            delay: Duration::from_millis(100),
        });
        let (demand, _demand_rx) = demand_channel();
        let (items_tx, items_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let handle = SpillingPullSubscriber::spawn(
            items_rx,
            demand,
            1,
            handler.clone(),
            Duration::from_secs(60),
            cancel.clone(),
        );

        items_tx.send(PriorityWrapper::new(1u32, 5)).await.unwrap();
        items_tx.send(PriorityWrapper::new(2u32, 5)).await.unwrap();
        items_tx.send(PriorityWrapper::new(3u32, 5)).await.unwrap();

        // Give the in-flight item time to finish; the spilled ones are gone.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
