//! Storage backends and codecs.
//!
//! Two narrow contracts separate the lifecycle layer from byte movement:
//! [`ArtifactStorage`] reads and writes original artifacts by digest inside
//! credential-keyed pools, and [`ColdStorage`] is the archival tier with a
//! thaw delay before archived objects become readable. Codec traits
//! ([`Archiver`], [`DeltaCodec`]) cover whole-file compression and
//! delta-against-base compression; both are swappable stages.

pub mod codec;
pub mod cold_local;
pub mod local;
pub mod traits;

pub use codec::{Archiver, ArchiverRegistry, DeltaCodec, GzipArchiver, GzipDeltaCodec, IdentityArchiver};
pub use cold_local::LocalColdStorage;
pub use local::LocalArtifactStorage;
pub use traits::{ArtifactStorage, ColdStorage, StorageError, StorageResult};
