//! In-memory fakes and fixtures shared by the pipeline tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use coldvault_core::models::{
    ArchiveRecord, ArchiveStatus, CompressRecord, CompressStatus, StorageClass,
};
use coldvault_core::store::{ArchiveStore, CompressStore};
use coldvault_storage::{ColdStorage, LocalColdStorage, StorageResult};

#[derive(Default)]
pub struct MemoryArchiveStore {
    records: Mutex<HashMap<Uuid, ArchiveRecord>>,
}

impl MemoryArchiveStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, record: ArchiveRecord) {
        self.lock().insert(record.id, record);
    }

    pub fn status_of(&self, id: Uuid) -> Option<ArchiveStatus> {
        self.lock().get(&id).map(|r| r.status)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, ArchiveRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ArchiveStore for MemoryArchiveStore {
    async fn page_by_status(
        &self,
        status: ArchiveStatus,
        after: Option<Uuid>,
        limit: i64,
    ) -> anyhow::Result<Vec<ArchiveRecord>> {
        let mut page: Vec<ArchiveRecord> = self
            .lock()
            .values()
            .filter(|r| r.status == status && after.map_or(true, |a| r.id > a))
            .cloned()
            .collect();
        page.sort_by_key(|r| r.id);
        page.truncate(limit.max(0) as usize);
        Ok(page)
    }

    async fn stale_by_status(
        &self,
        status: ArchiveStatus,
        modified_before: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<ArchiveRecord>> {
        let mut page: Vec<ArchiveRecord> = self
            .lock()
            .values()
            .filter(|r| r.status == status && r.last_modified_date < modified_before)
            .cloned()
            .collect();
        page.sort_by_key(|r| r.last_modified_date);
        page.truncate(limit.max(0) as usize);
        Ok(page)
    }

    async fn try_claim(
        &self,
        id: Uuid,
        from: ArchiveStatus,
        to: ArchiveStatus,
    ) -> anyhow::Result<bool> {
        let mut records = self.lock();
        match records.get_mut(&id) {
            Some(record) if record.status == from => {
                record.status = to;
                record.touch();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert(&self, record: &ArchiveRecord) -> anyhow::Result<()> {
        self.lock().insert(record.id, record.clone());
        Ok(())
    }

    async fn update(&self, record: &ArchiveRecord) -> anyhow::Result<()> {
        self.lock().insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<ArchiveRecord>> {
        Ok(self.lock().get(&id).cloned())
    }
}

#[derive(Default)]
pub struct MemoryCompressStore {
    records: Mutex<HashMap<Uuid, CompressRecord>>,
}

impl MemoryCompressStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, record: CompressRecord) {
        self.lock().insert(record.id, record);
    }

    pub fn status_of(&self, id: Uuid) -> Option<CompressStatus> {
        self.lock().get(&id).map(|r| r.status)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, CompressRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CompressStore for MemoryCompressStore {
    async fn page_by_status(
        &self,
        status: CompressStatus,
        after: Option<Uuid>,
        limit: i64,
    ) -> anyhow::Result<Vec<CompressRecord>> {
        let mut page: Vec<CompressRecord> = self
            .lock()
            .values()
            .filter(|r| r.status == status && after.map_or(true, |a| r.id > a))
            .cloned()
            .collect();
        page.sort_by_key(|r| r.id);
        page.truncate(limit.max(0) as usize);
        Ok(page)
    }

    async fn stale_by_status(
        &self,
        status: CompressStatus,
        modified_before: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<CompressRecord>> {
        let mut page: Vec<CompressRecord> = self
            .lock()
            .values()
            .filter(|r| r.status == status && r.last_modified_date < modified_before)
            .cloned()
            .collect();
        page.sort_by_key(|r| r.last_modified_date);
        page.truncate(limit.max(0) as usize);
        Ok(page)
    }

    async fn try_claim(
        &self,
        id: Uuid,
        from: CompressStatus,
        to: CompressStatus,
    ) -> anyhow::Result<bool> {
        let mut records = self.lock();
        match records.get_mut(&id) {
            Some(record) if record.status == from => {
                record.status = to;
                record.touch();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert(&self, record: &CompressRecord) -> anyhow::Result<()> {
        self.lock().insert(record.id, record.clone());
        Ok(())
    }

    async fn update(&self, record: &CompressRecord) -> anyhow::Result<()> {
        self.lock().insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<CompressRecord>> {
        Ok(self.lock().get(&id).cloned())
    }

    async fn find_by_digest(
        &self,
        sha256: &str,
        storage_credentials_key: Option<&str>,
        statuses: &[CompressStatus],
    ) -> anyhow::Result<Option<CompressRecord>> {
        Ok(self
            .lock()
            .values()
            .find(|r| {
                r.sha256 == sha256
                    && r.storage_credentials_key.as_deref() == storage_credentials_key
                    && statuses.contains(&r.status)
            })
            .cloned())
    }
}

/// Cold storage whose thaw state is controlled by the test.
pub struct GatedColdStorage {
    inner: LocalColdStorage,
    ready: AtomicBool,
}

impl GatedColdStorage {
    pub async fn new(base_path: &Path, ready: bool) -> Arc<Self> {
        Arc::new(Self {
            inner: LocalColdStorage::new(base_path).await.unwrap(),
            ready: AtomicBool::new(ready),
        })
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }
}

#[async_trait]
impl ColdStorage for GatedColdStorage {
    async fn put(
        &self,
        key: &str,
        file: &Path,
        storage_class: StorageClass,
    ) -> StorageResult<u64> {
        self.inner.put(key, file, storage_class).await
    }

    async fn get(&self, key: &str, dest_dir: &Path) -> StorageResult<std::path::PathBuf> {
        self.inner.get(key, dest_dir).await
    }

    async fn restore_ready(&self, key: &str) -> StorageResult<bool> {
        if !self.ready.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.inner.restore_ready(key).await
    }
}

/// Poll until `check` passes or the timeout elapses.
pub async fn wait_for<F>(timeout: Duration, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached within {:?}", timeout);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
