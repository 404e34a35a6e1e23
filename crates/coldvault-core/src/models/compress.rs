use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle of a delta-compressed artifact.
///
/// `Completed` marks a record whose delta was verified and whose source may
/// be reclaimed; it still participates in base-chain walks during restore.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CompressStatus {
    Created,
    Compressing,
    Compressed,
    CompressFailed,
    WaitToUncompress,
    Uncompressing,
    Uncompressed,
    UncompressFailed,
    Completed,
}

impl Display for CompressStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            CompressStatus::Created => write!(f, "created"),
            CompressStatus::Compressing => write!(f, "compressing"),
            CompressStatus::Compressed => write!(f, "compressed"),
            CompressStatus::CompressFailed => write!(f, "compress_failed"),
            CompressStatus::WaitToUncompress => write!(f, "wait_to_uncompress"),
            CompressStatus::Uncompressing => write!(f, "uncompressing"),
            CompressStatus::Uncompressed => write!(f, "uncompressed"),
            CompressStatus::UncompressFailed => write!(f, "uncompress_failed"),
            CompressStatus::Completed => write!(f, "completed"),
        }
    }
}

impl FromStr for CompressStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(CompressStatus::Created),
            "compressing" => Ok(CompressStatus::Compressing),
            "compressed" => Ok(CompressStatus::Compressed),
            "compress_failed" => Ok(CompressStatus::CompressFailed),
            "wait_to_uncompress" => Ok(CompressStatus::WaitToUncompress),
            "uncompressing" => Ok(CompressStatus::Uncompressing),
            "uncompressed" => Ok(CompressStatus::Uncompressed),
            "uncompress_failed" => Ok(CompressStatus::UncompressFailed),
            "completed" => Ok(CompressStatus::Completed),
            _ => Err(anyhow::anyhow!("Invalid compress status: {}", s)),
        }
    }
}

/// An artifact stored as a binary delta against a base artifact.
///
/// The source and base digests must differ; a self-referential delta would
/// lose the base bytes once the source is reclaimed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressRecord {
    pub id: Uuid,
    pub sha256: String,
    pub base_sha256: String,
    pub storage_credentials_key: Option<String>,
    pub uncompressed_size: i64,
    pub base_size: Option<i64>,
    pub compressed_size: i64,
    pub status: CompressStatus,
    pub created_at: DateTime<Utc>,
    pub last_modified_date: DateTime<Utc>,
}

impl CompressRecord {
    pub fn new(
        sha256: impl Into<String>,
        base_sha256: impl Into<String>,
        uncompressed_size: i64,
        storage_credentials_key: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            sha256: sha256.into(),
            base_sha256: base_sha256.into(),
            storage_credentials_key,
            uncompressed_size,
            base_size: None,
            compressed_size: -1,
            status: CompressStatus::Created,
            created_at: now,
            last_modified_date: now,
        }
    }

    /// Storage key of the delta artifact written for this record.
    pub fn delta_key(&self) -> String {
        format!("{}.delta", self.sha256)
    }

    pub fn touch(&mut self) {
        self.last_modified_date = Utc::now();
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for CompressRecord {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(CompressRecord {
            id: row.get("id"),
            sha256: row.get("sha256"),
            base_sha256: row.get("base_sha256"),
            storage_credentials_key: row.get("storage_credentials_key"),
            uncompressed_size: row.get("uncompressed_size"),
            base_size: row.get("base_size"),
            compressed_size: row.get("compressed_size"),
            status: row.get::<String, _>("status").parse().map_err(|e: anyhow::Error| {
                sqlx::Error::Decode(format!("Failed to parse status: {}", e).into())
            })?,
            created_at: row.get("created_at"),
            last_modified_date: row.get("last_modified_date"),
        })
    }
}
