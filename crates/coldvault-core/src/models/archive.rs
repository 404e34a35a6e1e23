use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle of an archived artifact.
///
/// Transitions are monotonic along one of two paths:
/// `Created -> Archiving -> {Archived | ArchiveFailed}` and
/// `WaitToRestore -> Restoring -> {Restored | RestoreFailed}`.
/// A record whose cold-storage object is not yet thawed falls back from
/// `Restoring` to `WaitToRestore` and is retried on a later run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveStatus {
    Created,
    Archiving,
    Archived,
    ArchiveFailed,
    WaitToRestore,
    Restoring,
    Restored,
    RestoreFailed,
}

impl Display for ArchiveStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ArchiveStatus::Created => write!(f, "created"),
            ArchiveStatus::Archiving => write!(f, "archiving"),
            ArchiveStatus::Archived => write!(f, "archived"),
            ArchiveStatus::ArchiveFailed => write!(f, "archive_failed"),
            ArchiveStatus::WaitToRestore => write!(f, "wait_to_restore"),
            ArchiveStatus::Restoring => write!(f, "restoring"),
            ArchiveStatus::Restored => write!(f, "restored"),
            ArchiveStatus::RestoreFailed => write!(f, "restore_failed"),
        }
    }
}

impl FromStr for ArchiveStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ArchiveStatus::Created),
            "archiving" => Ok(ArchiveStatus::Archiving),
            "archived" => Ok(ArchiveStatus::Archived),
            "archive_failed" => Ok(ArchiveStatus::ArchiveFailed),
            "wait_to_restore" => Ok(ArchiveStatus::WaitToRestore),
            "restoring" => Ok(ArchiveStatus::Restoring),
            "restored" => Ok(ArchiveStatus::Restored),
            "restore_failed" => Ok(ArchiveStatus::RestoreFailed),
            _ => Err(anyhow::anyhow!("Invalid archive status: {}", s)),
        }
    }
}

/// Cold-storage tier requested when uploading an archived artifact.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageClass {
    Standard,
    #[default]
    DeepArchive,
}

impl Display for StorageClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            StorageClass::Standard => write!(f, "standard"),
            StorageClass::DeepArchive => write!(f, "deep_archive"),
        }
    }
}

impl FromStr for StorageClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(StorageClass::Standard),
            "deep_archive" => Ok(StorageClass::DeepArchive),
            _ => Err(anyhow::anyhow!("Invalid storage class: {}", s)),
        }
    }
}

/// A single artifact tracked through the archive/restore lifecycle.
///
/// `compressed_size` is `-1` until the archive stage has produced the
/// uploaded object. `archiver` records which codec wrote that object so a
/// later restore picks the matching one regardless of current config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub id: Uuid,
    pub sha256: String,
    pub size: i64,
    /// Which backing storage pool owns the original bytes.
    pub storage_credentials_key: Option<String>,
    pub archiver: String,
    pub compressed_size: i64,
    pub storage_class: StorageClass,
    pub status: ArchiveStatus,
    pub created_at: DateTime<Utc>,
    pub last_modified_date: DateTime<Utc>,
}

impl ArchiveRecord {
    pub fn new(sha256: impl Into<String>, size: i64, storage_credentials_key: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            sha256: sha256.into(),
            size,
            storage_credentials_key,
            archiver: String::new(),
            compressed_size: -1,
            storage_class: StorageClass::default(),
            status: ArchiveStatus::Created,
            created_at: now,
            last_modified_date: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_modified_date = Utc::now();
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for ArchiveRecord {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(ArchiveRecord {
            id: row.get("id"),
            sha256: row.get("sha256"),
            size: row.get("size"),
            storage_credentials_key: row.get("storage_credentials_key"),
            archiver: row.get("archiver"),
            compressed_size: row.get("compressed_size"),
            storage_class: row.get::<String, _>("storage_class").parse().map_err(
                |e: anyhow::Error| {
                    sqlx::Error::Decode(format!("Failed to parse storage_class: {}", e).into())
                },
            )?,
            status: row.get::<String, _>("status").parse().map_err(|e: anyhow::Error| {
                sqlx::Error::Decode(format!("Failed to parse status: {}", e).into())
            })?,
            created_at: row.get("created_at"),
            last_modified_date: row.get("last_modified_date"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_display() {
        for status in [
            ArchiveStatus::Created,
            ArchiveStatus::Archiving,
            ArchiveStatus::Archived,
            ArchiveStatus::ArchiveFailed,
            ArchiveStatus::WaitToRestore,
            ArchiveStatus::Restoring,
            ArchiveStatus::Restored,
            ArchiveStatus::RestoreFailed,
        ] {
            assert_eq!(status.to_string().parse::<ArchiveStatus>().unwrap(), status);
        }
    }

    #[test]
    fn new_record_starts_created_with_unknown_compressed_size() {
        let record = ArchiveRecord::new("abc", 100, None);
        assert_eq!(record.status, ArchiveStatus::Created);
        assert_eq!(record.compressed_size, -1);
        assert_eq!(record.storage_class, StorageClass::DeepArchive);
    }
}
