pub mod archive;
pub mod compress;

pub use archive::{ArchiveRecord, ArchiveStatus, StorageClass};
pub use compress::{CompressRecord, CompressStatus};
