//! Demand-driven backlog feed.
//!
//! One bounded sink per entity kind. External eligibility events are
//! pushed straight in; every demand request from the consumer side
//! triggers a backlog-refill query against the backing store for at most
//! that many records. The store is therefore queried in proportion to
//! real processing capacity, never polled unconditionally.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::pull::{demand_channel, DemandHandle};

/// Finds up to `demand` backlog records that are ready for processing.
#[async_trait]
pub trait BacklogSource<T>: Send + Sync {
    async fn refill(&self, demand: usize) -> anyhow::Result<Vec<T>>;
}

/// Producer half of a fed sink. Cheap to clone.
pub struct BacklogFeed<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for BacklogFeed<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send + 'static> BacklogFeed<T> {
    /// Build the sink and spawn the refill task. Returns the feed (for
    /// pushing external events), the item receiver the subscriber
    /// consumes, the demand handle it signals with, and the refill task.
    pub fn start(
        buffer: usize,
        source: Arc<dyn BacklogSource<T>>,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<T>, DemandHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(buffer);
        let (demand, mut demand_rx) = demand_channel();

        let feed_tx = tx.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    request = demand_rx.recv() => {
                        let Some(demand) = request else { break };
                        match source.refill(demand).await {
                            Ok(records) => {
                                debug!(demand, found = records.len(), "backlog refill");
                                for record in records {
                                    if feed_tx.send(record).await.is_err() {
                                        return;
                                    }
                                }
                            }
                            Err(e) => {
                                error!(error = %e, "backlog refill query failed");
                            }
                        }
                    }
                }
            }
        });

        (Self { tx }, rx, demand, handle)
    }

    /// Push an externally observed eligibility event into the sink.
    /// Returns false once the sink is closed.
    pub async fn emit(&self, item: T) -> bool {
        self.tx.send(item).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NumberSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BacklogSource<u32> for NumberSource {
        async fn refill(&self, demand: usize) -> anyhow::Result<Vec<u32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((0..demand as u32).collect())
        }
    }

    #[tokio::test]
    async fn demand_triggers_refill_of_exactly_that_many() {
        let source = Arc::new(NumberSource {
            calls: AtomicUsize::new(0),
        });
        let cancel = CancellationToken::new();
        let (_feed, mut rx, demand, handle) =
            BacklogFeed::start(16, source.clone(), cancel.clone());

        demand.request(3);
        for _ in 0..3 {
            assert!(rx.recv().await.is_some());
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn external_events_flow_through_the_sink() {
        let source = Arc::new(NumberSource {
            calls: AtomicUsize::new(0),
        });
        let cancel = CancellationToken::new();
        let (feed, mut rx, _demand, handle) = BacklogFeed::start(4, source, cancel.clone());

        assert!(feed.emit(42).await);
        assert_eq!(rx.recv().await, Some(42));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn zero_demand_is_not_sent() {
        let source = Arc::new(NumberSource {
            calls: AtomicUsize::new(0),
        });
        let cancel = CancellationToken::new();
        let (_feed, _rx, demand, handle) = BacklogFeed::start(4, source.clone(), cancel.clone());

        demand.request(0);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);

        cancel.cancel();
        handle.await.unwrap();
    }
}
