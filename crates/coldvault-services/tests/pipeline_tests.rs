mod helpers;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast::error::TryRecvError;

use coldvault_core::digest::sha256_bytes;
use coldvault_core::models::{ArchiveRecord, ArchiveStatus, CompressRecord, CompressStatus};
use coldvault_core::store::{ArchiveStore, CompressStore};
use coldvault_infra::DiskHealthGate;
use coldvault_storage::{
    Archiver, ArchiverRegistry, ArtifactStorage, ColdStorage, GzipArchiver, GzipDeltaCodec,
    LocalArtifactStorage,
};
use coldvault_worker::JobMonitorRegistry;

use coldvault_services::{
    ArchiveConfig, ArchivePipeline, CandidateDispatcher, DeltaWorker, DispatcherConfig, EventBus,
    RestoreConfig, RestorePipeline, StorageEvent,
};

use helpers::{wait_for, GatedColdStorage, MemoryArchiveStore, MemoryCompressStore};

struct Fixture {
    _root: tempfile::TempDir,
    work_dir: PathBuf,
    store: Arc<MemoryArchiveStore>,
    storage: Arc<LocalArtifactStorage>,
    cold: Arc<GatedColdStorage>,
    events: EventBus,
    archive: Arc<ArchivePipeline>,
    restore: Arc<RestorePipeline>,
}

async fn fixture_with(page_size: i64, gate: DiskHealthGate, cold_ready: bool) -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let work_dir = root.path().join("work");
    tokio::fs::create_dir_all(&work_dir).await.unwrap();

    let store = MemoryArchiveStore::new();
    let storage = Arc::new(
        LocalArtifactStorage::new(root.path().join("storage"))
            .await
            .unwrap(),
    );
    let cold_dir = root.path().join("cold");
    tokio::fs::create_dir_all(&cold_dir).await.unwrap();
    let cold = GatedColdStorage::new(&cold_dir, cold_ready).await;
    let events = EventBus::new(64);
    let registry = Arc::new(JobMonitorRegistry::new());
    let archivers = ArchiverRegistry::new(true);

    let archive = ArchivePipeline::new(
        store.clone(),
        storage.clone(),
        cold.clone(),
        archivers.clone(),
        events.clone(),
        registry.clone(),
        gate,
        ArchiveConfig {
            work_dir: work_dir.clone(),
            page_size,
            prefetch: 2,
            download_workers: 2,
            compress_workers: 2,
            upload_workers: 2,
        },
    );
    let restore = RestorePipeline::new(
        store.clone(),
        storage.clone(),
        cold.clone(),
        archivers,
        events.clone(),
        registry,
        RestoreConfig {
            work_dir: work_dir.clone(),
            page_size,
        },
    );

    Fixture {
        _root: root,
        work_dir,
        store,
        storage,
        cold,
        events,
        archive,
        restore,
    }
}

async fn fixture() -> Fixture {
    fixture_with(100, DiskHealthGate::always_healthy(), true).await
}

/// Write `payload` into primary storage and register a `Created` record.
async fn seed_created(fx: &Fixture, payload: &[u8]) -> ArchiveRecord {
    let digest = sha256_bytes(payload);
    let file = fx.work_dir.join(format!("seed-{}", digest));
    tokio::fs::write(&file, payload).await.unwrap();
    fx.storage.store(&digest, &file, None).await.unwrap();
    tokio::fs::remove_file(&file).await.unwrap();

    let record = ArchiveRecord::new(digest, payload.len() as i64, None);
    fx.store.push(record.clone());
    record
}

/// Put a gzip-archived copy of `payload` into cold storage and register a
/// `WaitToRestore` record for it.
async fn seed_wait_to_restore(fx: &Fixture, payload: &[u8]) -> ArchiveRecord {
    let digest = sha256_bytes(payload);
    let plain = fx.work_dir.join(format!("plain-{}", digest));
    tokio::fs::write(&plain, payload).await.unwrap();
    let packed = fx.work_dir.join(format!("packed-{}", digest));
    GzipArchiver.compress(&plain, &packed).await.unwrap();
    let key = format!("{}.gz", digest);
    fx.cold
        .put(&key, &packed, Default::default())
        .await
        .unwrap();

    let mut record = ArchiveRecord::new(digest, payload.len() as i64, None);
    record.archiver = GzipArchiver::NAME.to_string();
    record.status = ArchiveStatus::WaitToRestore;
    fx.store.push(record.clone());
    record
}

#[tokio::test]
async fn archive_run_moves_created_record_to_archived() {
    let fx = fixture().await;
    let payload = b"a cold artifact that nobody has read in months".repeat(64);
    let record = seed_created(&fx, &payload).await;
    let mut events = fx.events.subscribe();

    let summary = fx.archive.clone().run().await;

    assert_eq!(summary.counters.success, 1);
    assert_eq!(summary.counters.failed, 0);
    assert_eq!(summary.counters.total, 1);

    let stored = fx.store.get(record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ArchiveStatus::Archived);
    assert!(stored.compressed_size > 0);
    assert_eq!(stored.archiver, GzipArchiver::NAME);

    let key = format!("{}.gz", record.sha256);
    assert!(fx.cold.restore_ready(&key).await.unwrap());

    match events.try_recv().unwrap() {
        StorageEvent::FileArchived { sha256, size, .. } => {
            assert_eq!(sha256, record.sha256);
            assert_eq!(size, payload.len() as i64);
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn archive_failure_marks_record_and_run_continues() {
    let fx = fixture().await;
    let good = seed_created(&fx, b"present artifact").await;

    // Record whose bytes were never written to primary storage.
    let missing = ArchiveRecord::new(sha256_bytes(b"missing artifact"), 16, None);
    fx.store.push(missing.clone());

    let summary = fx.archive.clone().run().await;

    assert_eq!(summary.counters.total, 2);
    assert_eq!(summary.counters.success, 1);
    assert_eq!(summary.counters.failed, 1);
    assert_eq!(fx.store.status_of(good.id), Some(ArchiveStatus::Archived));
    assert_eq!(
        fx.store.status_of(missing.id),
        Some(ArchiveStatus::ArchiveFailed)
    );
}

#[tokio::test]
async fn cursor_pagination_covers_every_record_exactly_once() {
    let fx = fixture_with(10, DiskHealthGate::always_healthy(), true).await;
    let mut ids = Vec::new();
    for i in 0..25u32 {
        let payload = format!("artifact number {}", i).into_bytes();
        ids.push(seed_created(&fx, &payload).await.id);
    }
    let mut events = fx.events.subscribe();

    let summary = fx.archive.clone().run().await;

    assert_eq!(summary.counters.total, 25);
    assert_eq!(summary.counters.failed, 0);
    for id in ids {
        assert_eq!(fx.store.status_of(id), Some(ArchiveStatus::Archived));
    }
    let mut archived_events = 0;
    while events.try_recv().is_ok() {
        archived_events += 1;
    }
    assert_eq!(archived_events, 25);
}

#[tokio::test]
async fn exactly_one_of_many_concurrent_claims_wins() {
    let store = MemoryArchiveStore::new();
    let record = ArchiveRecord::new("abc", 1, None);
    store.push(record.clone());

    let mut handles = Vec::new();
    for _ in 0..32 {
        let store = store.clone();
        let id = record.id;
        handles.push(tokio::spawn(async move {
            store
                .try_claim(id, ArchiveStatus::Created, ArchiveStatus::Archiving)
                .await
                .unwrap()
        }));
    }

    let mut wins = 0;
    for handle in handles {
        if handle.await.unwrap() {
            wins += 1;
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(store.status_of(record.id), Some(ArchiveStatus::Archiving));
}

#[tokio::test]
async fn unhealthy_disk_pauses_downloads_until_recovery() {
    let (health_tx, gate) = DiskHealthGate::manual(false);
    let fx = fixture_with(100, gate, true).await;
    let record = seed_created(&fx, b"blocked until the volume drains").await;

    let archive = fx.archive.clone();
    let run = tokio::spawn(async move { archive.run().await });

    // The record is claimed but the download stage must hold at the gate.
    wait_for(Duration::from_secs(2), || {
        fx.store.status_of(record.id) == Some(ArchiveStatus::Archiving)
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fx.store.status_of(record.id), Some(ArchiveStatus::Archiving));

    health_tx.send(true).unwrap();
    let summary = run.await.unwrap();
    assert_eq!(summary.counters.success, 1);
    assert_eq!(fx.store.status_of(record.id), Some(ArchiveStatus::Archived));
}

#[tokio::test]
async fn not_thawed_record_defers_without_failure_or_event() {
    let fx = fixture_with(100, DiskHealthGate::always_healthy(), false).await;
    let record = seed_wait_to_restore(&fx, b"still frozen").await;
    let mut events = fx.events.subscribe();

    let summary = fx.restore.clone().run().await;

    assert_eq!(summary.counters.failed, 0);
    assert_eq!(summary.counters.total, 1);
    assert_eq!(
        fx.store.status_of(record.id),
        Some(ArchiveStatus::WaitToRestore)
    );
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn deferred_restore_succeeds_once_cold_storage_thaws() {
    let fx = fixture_with(100, DiskHealthGate::always_healthy(), false).await;
    let record = seed_wait_to_restore(&fx, b"patience pays off").await;

    // First run: not thawed, record loops back to waiting.
    fx.restore.clone().run().await;
    assert_eq!(
        fx.store.status_of(record.id),
        Some(ArchiveStatus::WaitToRestore)
    );

    // Thaw finishes; the next scheduled run picks the record up again.
    fx.cold.set_ready(true);
    let mut events = fx.events.subscribe();
    let summary = fx.restore.clone().run().await;

    assert_eq!(summary.counters.success, 1);
    assert_eq!(summary.counters.failed, 0);
    assert_eq!(fx.store.status_of(record.id), Some(ArchiveStatus::Restored));
    assert!(fx.storage.exists(&record.sha256, None).await.unwrap());
    match events.try_recv().unwrap() {
        StorageEvent::FileRestored { sha256, .. } => assert_eq!(sha256, record.sha256),
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn digest_mismatch_fails_hard_and_stores_nothing() {
    let fx = fixture().await;

    // The cold object decompresses to bytes that do NOT hash to the
    // record's digest.
    let expected_digest = sha256_bytes(b"what was archived");
    let plain = fx.work_dir.join("tampered");
    tokio::fs::write(&plain, b"tampered bytes").await.unwrap();
    let packed = fx.work_dir.join("tampered.gz");
    GzipArchiver.compress(&plain, &packed).await.unwrap();
    let key = format!("{}.gz", expected_digest);
    fx.cold.put(&key, &packed, Default::default()).await.unwrap();

    let mut record = ArchiveRecord::new(expected_digest.clone(), 14, None);
    record.archiver = GzipArchiver::NAME.to_string();
    record.status = ArchiveStatus::WaitToRestore;
    fx.store.push(record.clone());
    let mut events = fx.events.subscribe();

    let summary = fx.restore.clone().run().await;

    assert_eq!(summary.counters.failed, 1);
    assert_eq!(
        fx.store.status_of(record.id),
        Some(ArchiveStatus::RestoreFailed)
    );
    // The corrupt bytes never reached primary storage.
    assert!(!fx.storage.exists(&expected_digest, None).await.unwrap());
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn dispatcher_feeds_stale_waiting_and_fresh_records() {
    let fx = fixture().await;

    // A restore candidate that has been waiting past the staleness cutoff.
    let mut waiting = seed_wait_to_restore(&fx, b"stale waiting artifact").await;
    waiting.last_modified_date = Utc::now() - chrono::Duration::hours(2);
    fx.store.update(&waiting).await.unwrap();

    // A freshly eligible archive candidate.
    let fresh = seed_created(&fx, b"fresh archive candidate").await;

    let compress_store = MemoryCompressStore::new();
    let delta = DeltaWorker::new(
        compress_store.clone(),
        fx.storage.clone(),
        Arc::new(GzipDeltaCodec::new()),
        fx.events.clone(),
        fx.work_dir.clone(),
    );
    let dispatcher = CandidateDispatcher::start(
        fx.archive.clone(),
        fx.restore.clone(),
        delta,
        fx.store.clone(),
        compress_store,
        DispatcherConfig {
            sink_buffer: 16,
            max_concurrency: 2,
            queue_capacity: 16,
            pull_interval: Duration::from_millis(50),
            retry_stale: chrono::Duration::minutes(30),
        },
    );

    wait_for(Duration::from_secs(5), || {
        fx.store.status_of(waiting.id) == Some(ArchiveStatus::Restored)
            && fx.store.status_of(fresh.id) == Some(ArchiveStatus::Archived)
    })
    .await;

    dispatcher.shutdown();
}

#[tokio::test]
async fn delta_compress_then_restore_round_trips() {
    let fx = fixture().await;
    let compress_store = MemoryCompressStore::new();
    let delta = DeltaWorker::new(
        compress_store.clone(),
        fx.storage.clone(),
        Arc::new(GzipDeltaCodec::new()),
        fx.events.clone(),
        fx.work_dir.clone(),
    );

    let payload = b"current revision of the artifact".repeat(32);
    let base_payload = b"previous revision of the artifact".repeat(32);
    let digest = sha256_bytes(&payload);
    let base_digest = sha256_bytes(&base_payload);
    for (name, bytes) in [(&digest, &payload), (&base_digest, &base_payload)] {
        let file = fx.work_dir.join(format!("seed-{}", name));
        tokio::fs::write(&file, bytes).await.unwrap();
        fx.storage.store(name, &file, None).await.unwrap();
    }

    let mut record = CompressRecord::new(digest.clone(), base_digest, payload.len() as i64, None);
    compress_store.push(record.clone());

    delta.process(record.clone()).await.unwrap();
    assert_eq!(
        compress_store.status_of(record.id),
        Some(CompressStatus::Compressed)
    );
    assert!(fx.storage.exists(&record.delta_key(), None).await.unwrap());

    // Bring it back.
    record = compress_store.get(record.id).await.unwrap().unwrap();
    record.status = CompressStatus::WaitToUncompress;
    compress_store.push(record.clone());

    delta.process(record.clone()).await.unwrap();
    assert_eq!(
        compress_store.status_of(record.id),
        Some(CompressStatus::Uncompressed)
    );
    assert!(fx.storage.exists(&digest, None).await.unwrap());
    // The delta artifact is gone once the source is reconstructed.
    assert!(!fx.storage.exists(&record.delta_key(), None).await.unwrap());
}

#[tokio::test]
async fn delta_restore_unpacks_base_chain_root_first() {
    let fx = fixture().await;
    let compress_store = MemoryCompressStore::new();
    let delta = DeltaWorker::new(
        compress_store.clone(),
        fx.storage.clone(),
        Arc::new(GzipDeltaCodec::new()),
        fx.events.clone(),
        fx.work_dir.clone(),
    );

    // root (plain) <- middle (delta) <- leaf (delta)
    let root_payload = b"root revision".to_vec();
    let middle_payload = b"middle revision".to_vec();
    let leaf_payload = b"leaf revision".to_vec();
    let root_digest = sha256_bytes(&root_payload);
    let middle_digest = sha256_bytes(&middle_payload);
    let leaf_digest = sha256_bytes(&leaf_payload);

    let root_file = fx.work_dir.join("root");
    tokio::fs::write(&root_file, &root_payload).await.unwrap();
    fx.storage.store(&root_digest, &root_file, None).await.unwrap();

    let codec = GzipDeltaCodec::new();
    for (digest, payload, base) in [
        (&middle_digest, &middle_payload, &root_digest),
        (&leaf_digest, &leaf_payload, &middle_digest),
    ] {
        let plain = fx.work_dir.join(format!("plain-{}", digest));
        tokio::fs::write(&plain, payload).await.unwrap();
        let packed = fx.work_dir.join(format!("delta-{}", digest));
        use coldvault_storage::DeltaCodec;
        codec.diff(&plain, &root_file, &packed).await.unwrap();
        fx.storage
            .store(&format!("{}.delta", digest), &packed, None)
            .await
            .unwrap();
        let mut record =
            CompressRecord::new(digest.clone(), base.clone(), payload.len() as i64, None);
        record.compressed_size = 1;
        record.status = CompressStatus::Compressed;
        compress_store.push(record);
    }

    // Ask for the leaf; the worker must surface the middle link first.
    let mut leaf = compress_store
        .find_by_digest(&leaf_digest, None, &[CompressStatus::Compressed])
        .await
        .unwrap()
        .unwrap();
    leaf.status = CompressStatus::WaitToUncompress;
    compress_store.push(leaf.clone());

    delta.process(leaf.clone()).await.unwrap();

    assert_eq!(
        compress_store.status_of(leaf.id),
        Some(CompressStatus::Uncompressed)
    );
    let middle = compress_store
        .find_by_digest(&middle_digest, None, &[CompressStatus::Uncompressed])
        .await
        .unwrap();
    assert!(middle.is_some(), "middle link must be unpacked as well");
    assert!(fx.storage.exists(&leaf_digest, None).await.unwrap());
    assert!(fx.storage.exists(&middle_digest, None).await.unwrap());
}
