//! Backing-store contracts.
//!
//! The repositories in `coldvault-db` implement these traits over Postgres;
//! tests substitute in-memory implementations. `try_claim` is the single
//! cross-process synchronization primitive in the system: a conditional
//! status update that succeeds for exactly one of any number of concurrent
//! claimants.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{ArchiveRecord, ArchiveStatus, CompressRecord, CompressStatus};

#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Keyset-paginated scan: records in `status` with `id > after`,
    /// ascending by id, at most `limit` rows. Pass `None` to start a scan.
    async fn page_by_status(
        &self,
        status: ArchiveStatus,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ArchiveRecord>>;

    /// Records sitting in `status` since before `modified_before`, oldest
    /// first. Feeds backlog refill for retry-waiting work.
    async fn stale_by_status(
        &self,
        status: ArchiveStatus,
        modified_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ArchiveRecord>>;

    /// Compare-and-set the record's status. Returns `true` iff exactly one
    /// row still in `from` was moved to `to`; `false` means another runner
    /// holds the claim.
    async fn try_claim(&self, id: Uuid, from: ArchiveStatus, to: ArchiveStatus) -> Result<bool>;

    async fn insert(&self, record: &ArchiveRecord) -> Result<()>;

    async fn update(&self, record: &ArchiveRecord) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<ArchiveRecord>>;
}

#[async_trait]
pub trait CompressStore: Send + Sync {
    async fn page_by_status(
        &self,
        status: CompressStatus,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<CompressRecord>>;

    async fn stale_by_status(
        &self,
        status: CompressStatus,
        modified_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<CompressRecord>>;

    async fn try_claim(&self, id: Uuid, from: CompressStatus, to: CompressStatus) -> Result<bool>;

    async fn insert(&self, record: &CompressRecord) -> Result<()>;

    async fn update(&self, record: &CompressRecord) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<CompressRecord>>;

    /// Look up a record by content digest within one storage pool, limited
    /// to the given statuses. Used to walk delta base chains.
    async fn find_by_digest(
        &self,
        sha256: &str,
        storage_credentials_key: Option<&str>,
        statuses: &[CompressStatus],
    ) -> Result<Option<CompressRecord>>;
}
