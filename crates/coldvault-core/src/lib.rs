//! Core domain types for coldvault: archive/compress records and their
//! lifecycles, the backing-store contracts, configuration, and shared
//! utilities (throughput measurement, content digests).

pub mod config;
pub mod digest;
pub mod error;
pub mod models;
pub mod store;
pub mod throughput;

pub use config::Config;
pub use error::AppError;
pub use models::{
    ArchiveRecord, ArchiveStatus, CompressRecord, CompressStatus, StorageClass,
};
pub use store::{ArchiveStore, CompressStore};
pub use throughput::Throughput;
