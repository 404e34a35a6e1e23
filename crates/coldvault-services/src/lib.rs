//! Pipeline orchestration: the archive and restore state machines, the
//! delta-compression worker, and the demand-driven dispatcher that keeps
//! them fed from the backing store.

pub mod archive;
pub mod compress;
pub mod dispatch;
pub mod events;
pub mod restore;

pub use archive::{ArchiveConfig, ArchivePipeline};
pub use compress::DeltaWorker;
pub use dispatch::{CandidateDispatcher, DispatcherConfig};
pub use events::{EventBus, StorageEvent};
pub use restore::{RestoreConfig, RestorePipeline};
