use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use coldvault_core::models::{ArchiveRecord, ArchiveStatus};
use coldvault_core::store::ArchiveStore;

const COLUMNS: &str = r#"
    id,
    sha256,
    size,
    storage_credentials_key,
    archiver,
    compressed_size,
    storage_class,
    status,
    created_at,
    last_modified_date
"#;

#[derive(Clone)]
pub struct ArchiveRepository {
    pool: PgPool,
}

impl ArchiveRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArchiveStore for ArchiveRepository {
    #[tracing::instrument(skip(self))]
    async fn page_by_status(
        &self,
        status: ArchiveStatus,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ArchiveRecord>> {
        let records = sqlx::query_as::<Postgres, ArchiveRecord>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM archive_records
            WHERE status = $1 AND ($2::uuid IS NULL OR id > $2)
            ORDER BY id ASC
            LIMIT $3
            "#,
        ))
        .bind(status.to_string())
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch archive record page")?;

        Ok(records)
    }

    #[tracing::instrument(skip(self))]
    async fn stale_by_status(
        &self,
        status: ArchiveStatus,
        modified_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ArchiveRecord>> {
        let records = sqlx::query_as::<Postgres, ArchiveRecord>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM archive_records
            WHERE status = $1 AND last_modified_date < $2
            ORDER BY last_modified_date ASC
            LIMIT $3
            "#,
        ))
        .bind(status.to_string())
        .bind(modified_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch stale archive records")?;

        Ok(records)
    }

    #[tracing::instrument(skip(self))]
    async fn try_claim(&self, id: Uuid, from: ArchiveStatus, to: ArchiveStatus) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE archive_records
            SET status = $3, last_modified_date = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(from.to_string())
        .bind(to.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to claim archive record")?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self, record), fields(id = %record.id, sha256 = %record.sha256))]
    async fn insert(&self, record: &ArchiveRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO archive_records (
                id, sha256, size, storage_credentials_key, archiver,
                compressed_size, storage_class, status, created_at, last_modified_date
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.id)
        .bind(&record.sha256)
        .bind(record.size)
        .bind(&record.storage_credentials_key)
        .bind(&record.archiver)
        .bind(record.compressed_size)
        .bind(record.storage_class.to_string())
        .bind(record.status.to_string())
        .bind(record.created_at)
        .bind(record.last_modified_date)
        .execute(&self.pool)
        .await
        .context("Failed to insert archive record")?;

        Ok(())
    }

    #[tracing::instrument(skip(self, record), fields(id = %record.id, status = %record.status))]
    async fn update(&self, record: &ArchiveRecord) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE archive_records
            SET sha256 = $2,
                size = $3,
                storage_credentials_key = $4,
                archiver = $5,
                compressed_size = $6,
                storage_class = $7,
                status = $8,
                last_modified_date = $9
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(&record.sha256)
        .bind(record.size)
        .bind(&record.storage_credentials_key)
        .bind(&record.archiver)
        .bind(record.compressed_size)
        .bind(record.storage_class.to_string())
        .bind(record.status.to_string())
        .bind(record.last_modified_date)
        .execute(&self.pool)
        .await
        .context("Failed to update archive record")?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, id: Uuid) -> Result<Option<ArchiveRecord>> {
        let record = sqlx::query_as::<Postgres, ArchiveRecord>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM archive_records
            WHERE id = $1
            "#,
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch archive record")?;

        Ok(record)
    }
}
