//! Bounded-concurrency resource manager with overflow queueing.
//!
//! A counting semaphore caps in-flight work; submissions that find no free
//! permit land in a bounded queue, and a full queue is an explicit
//! [`Submission::Rejected`] rather than a silent loss. Draining is
//! continuation-driven: a worker that finishes its unit pops the next
//! queued item and runs it under the same permit, so queued work can never
//! be rejected a second time.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tracing::warn;

use async_trait::async_trait;
use coldvault_core::AppError;

/// Result of one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed,
}

/// Per-resource work. Implementations report failure through the outcome;
/// they must not panic the worker.
#[async_trait]
pub trait ResourceHandler<T>: Send + Sync {
    async fn handle(&self, resource: T) -> TaskOutcome;
}

/// What happened to a submission.
#[derive(Debug)]
pub enum Submission {
    /// Running now; the receiver resolves to the outcome.
    Admitted(oneshot::Receiver<TaskOutcome>),
    /// Waiting in the overflow queue; picked up by the drain chain.
    Queued,
    /// The overflow queue was full. The item is dropped and the caller
    /// knows it.
    Rejected,
}

/// Capability contract for anything that accepts resources for processing.
pub trait ResourceManager<T>: Send + Sync {
    fn start(&self);
    fn stop(&self);
    fn is_busy(&self) -> bool;
    /// Free capacity as seen by pull scheduling: zero while there is any
    /// backlog, otherwise the number of free permits.
    fn remaining_capacity(&self) -> usize;
    fn process(&self, resource: T) -> Result<Submission, AppError>;
}

struct Inner<T> {
    handler: Arc<dyn ResourceHandler<T>>,
    semaphore: Arc<Semaphore>,
    queue: Mutex<VecDeque<T>>,
    queue_capacity: usize,
    max_concurrency: usize,
    running: AtomicBool,
}

impl<T> Inner<T> {
    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct BufferedResourceManager<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for BufferedResourceManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> BufferedResourceManager<T> {
    pub fn new(
        max_concurrency: usize,
        queue_capacity: usize,
        handler: Arc<dyn ResourceHandler<T>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                handler,
                semaphore: Arc::new(Semaphore::new(max_concurrency)),
                queue: Mutex::new(VecDeque::new()),
                queue_capacity,
                max_concurrency,
                running: AtomicBool::new(true),
            }),
        }
    }
}

impl<T: Send + 'static> ResourceManager<T> for BufferedResourceManager<T> {
    fn start(&self) {
        self.inner.running.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
    }

    fn is_busy(&self) -> bool {
        self.inner.semaphore.available_permits() < self.inner.max_concurrency
            || !self.inner.lock_queue().is_empty()
    }

    fn remaining_capacity(&self) -> usize {
        if !self.inner.lock_queue().is_empty() {
            return 0;
        }
        self.inner.semaphore.available_permits()
    }

    fn process(&self, resource: T) -> Result<Submission, AppError> {
        if !self.inner.running.load(Ordering::SeqCst) {
            return Err(AppError::ManagerClosed);
        }
        match self.inner.semaphore.clone().try_acquire_owned() {
            Ok(permit) => {
                let (tx, rx) = oneshot::channel();
                let inner = self.inner.clone();
                tokio::spawn(run_chain(inner, permit, resource, tx));
                Ok(Submission::Admitted(rx))
            }
            Err(_) => {
                let mut queue = self.inner.lock_queue();
                if queue.len() < self.inner.queue_capacity {
                    queue.push_back(resource);
                    Ok(Submission::Queued)
                } else {
                    drop(queue);
                    warn!(
                        queue_capacity = self.inner.queue_capacity,
                        "overflow queue full, rejecting submission"
                    );
                    Ok(Submission::Rejected)
                }
            }
        }
    }
}

/// Run the admitted resource, then keep the permit and drain queued items
/// until the queue is empty or the manager stops.
async fn run_chain<T: Send + 'static>(
    inner: Arc<Inner<T>>,
    permit: OwnedSemaphorePermit,
    first: T,
    notify: oneshot::Sender<TaskOutcome>,
) {
    let mut resource = first;
    let mut notify = Some(notify);
    loop {
        let outcome = inner.handler.handle(resource).await;
        if let Some(tx) = notify.take() {
            let _ = tx.send(outcome);
        }
        if !inner.running.load(Ordering::SeqCst) {
            break;
        }
        match inner.lock_queue().pop_front() {
            Some(next) => resource = next,
            None => break,
        }
    }
    drop(permit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Recorder {
        current: AtomicUsize,
        peak: AtomicUsize,
        handled: AtomicUsize,
        delay: Duration,
    }

    impl Recorder {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                handled: AtomicUsize::new(0),
                delay,
            })
        }
    }

    #[async_trait]
    impl ResourceHandler<u32> for Recorder {
        async fn handle(&self, _resource: u32) -> TaskOutcome {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            self.handled.fetch_add(1, Ordering::SeqCst);
            TaskOutcome::Completed
        }
    }

    async fn wait_idle<T: Send + 'static>(manager: &BufferedResourceManager<T>) {
        while manager.is_busy() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn never_exceeds_max_concurrency() {
        let recorder = Recorder::new(Duration::from_millis(10));
        let manager = BufferedResourceManager::new(3, 100, recorder.clone());

        for i in 0..30 {
            let submission = manager.process(i).unwrap();
            assert!(!matches!(submission, Submission::Rejected));
        }
        wait_idle(&manager).await;

        assert_eq!(recorder.handled.load(Ordering::SeqCst), 30);
        assert!(recorder.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn queue_overflow_is_an_explicit_rejection() {
        let recorder = Recorder::new(Duration::from_millis(50));
        let manager = BufferedResourceManager::new(1, 2, recorder.clone());

        assert!(matches!(manager.process(0).unwrap(), Submission::Admitted(_)));
        assert!(matches!(manager.process(1).unwrap(), Submission::Queued));
        assert!(matches!(manager.process(2).unwrap(), Submission::Queued));
        assert!(matches!(manager.process(3).unwrap(), Submission::Rejected));

        wait_idle(&manager).await;
        // The admitted item and both queued items complete; the rejected
        // one is lost, and the caller was told.
        assert_eq!(recorder.handled.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn drain_chain_completes_capacity_plus_queue() {
        let recorder = Recorder::new(Duration::from_millis(5));
        let manager = BufferedResourceManager::new(2, 4, recorder.clone());

        for i in 0..6 {
            assert!(!matches!(manager.process(i).unwrap(), Submission::Rejected));
        }
        wait_idle(&manager).await;
        assert_eq!(recorder.handled.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn admitted_receiver_resolves_to_outcome() {
        let recorder = Recorder::new(Duration::from_millis(1));
        let manager = BufferedResourceManager::new(1, 0, recorder);

        match manager.process(7).unwrap() {
            Submission::Admitted(rx) => {
                assert_eq!(rx.await.unwrap(), TaskOutcome::Completed);
            }
            other => panic!("expected admission, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn stopped_manager_fails_fast() {
        let recorder = Recorder::new(Duration::ZERO);
        let manager = BufferedResourceManager::new(1, 1, recorder);

        manager.stop();
        assert!(matches!(manager.process(1), Err(AppError::ManagerClosed)));

        manager.start();
        assert!(manager.process(1).is_ok());
    }

    #[tokio::test]
    async fn capacity_is_zero_while_backlog_exists() {
        let recorder = Recorder::new(Duration::from_millis(50));
        let manager = BufferedResourceManager::new(1, 2, recorder);

        assert_eq!(manager.remaining_capacity(), 1);
        let _ = manager.process(0).unwrap();
        assert_eq!(manager.remaining_capacity(), 0);
        let _ = manager.process(1).unwrap();
        // Queue non-empty: no capacity even after the permit frees up.
        assert_eq!(manager.remaining_capacity(), 0);
        wait_idle(&manager).await;
        assert_eq!(manager.remaining_capacity(), 1);
    }
}
