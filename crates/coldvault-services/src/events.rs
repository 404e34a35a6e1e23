//! Fire-and-forget lifecycle events.
//!
//! Published on successful archive/restore/compress transitions. Delivery
//! is best-effort: with no subscribers the event is dropped, and a slow
//! subscriber may observe lag. Nothing in the pipelines depends on a
//! subscriber existing.

use tokio::sync::broadcast;
use tracing::debug;

use coldvault_core::Throughput;

#[derive(Debug, Clone)]
pub enum StorageEvent {
    FileArchived {
        sha256: String,
        storage_credentials_key: Option<String>,
        size: i64,
        throughput: Throughput,
    },
    FileRestored {
        sha256: String,
        storage_credentials_key: Option<String>,
        throughput: Throughput,
    },
    FileCompressed {
        sha256: String,
        base_sha256: String,
        uncompressed: i64,
        compressed: i64,
        storage_credentials_key: Option<String>,
        throughput: Throughput,
    },
    FileUncompressed {
        sha256: String,
        compressed: i64,
        uncompressed: i64,
        storage_credentials_key: Option<String>,
        throughput: Throughput,
    },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StorageEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: StorageEvent) {
        debug!(?event, "publishing storage event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.tx.subscribe()
    }
}
