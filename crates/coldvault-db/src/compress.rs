use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use coldvault_core::models::{CompressRecord, CompressStatus};
use coldvault_core::store::CompressStore;

const COLUMNS: &str = r#"
    id,
    sha256,
    base_sha256,
    storage_credentials_key,
    uncompressed_size,
    base_size,
    compressed_size,
    status,
    created_at,
    last_modified_date
"#;

#[derive(Clone)]
pub struct CompressRepository {
    pool: PgPool,
}

impl CompressRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CompressStore for CompressRepository {
    #[tracing::instrument(skip(self))]
    async fn page_by_status(
        &self,
        status: CompressStatus,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<CompressRecord>> {
        let records = sqlx::query_as::<Postgres, CompressRecord>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM compress_records
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
        .context("Failed to fetch compress record page")?;

        Ok(records)
    }

    #[tracing::instrument(skip(self))]
    async fn stale_by_status(
        &self,
        status: CompressStatus,
        modified_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<CompressRecord>> {
        let records = sqlx::query_as::<Postgres, CompressRecord>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM compress_records
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
        .context("Failed to fetch stale compress records")?;

        Ok(records)
    }

    #[tracing::instrument(skip(self))]
    async fn try_claim(&self, id: Uuid, from: CompressStatus, to: CompressStatus) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE compress_records
            SET status = $3, last_modified_date = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(from.to_string())
        .bind(to.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to claim compress record")?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self, record), fields(id = %record.id, sha256 = %record.sha256))]
    async fn insert(&self, record: &CompressRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO compress_records (
                id, sha256, base_sha256, storage_credentials_key, uncompressed_size,
                base_size, compressed_size, status, created_at, last_modified_date
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.id)
        .bind(&record.sha256)
        .bind(&record.base_sha256)
        .bind(&record.storage_credentials_key)
        .bind(record.uncompressed_size)
        .bind(record.base_size)
        .bind(record.compressed_size)
        .bind(record.status.to_string())
        .bind(record.created_at)
        .bind(record.last_modified_date)
        .execute(&self.pool)
        .await
        .context("Failed to insert compress record")?;

        Ok(())
    }

    #[tracing::instrument(skip(self, record), fields(id = %record.id, status = %record.status))]
    async fn update(&self, record: &CompressRecord) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE compress_records
            SET sha256 = $2,
                base_sha256 = $3,
                storage_credentials_key = $4,
                uncompressed_size = $5,
                base_size = $6,
                compressed_size = $7,
                status = $8,
                last_modified_date = $9
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(&record.sha256)
        .bind(&record.base_sha256)
        .bind(&record.storage_credentials_key)
        .bind(record.uncompressed_size)
        .bind(record.base_size)
        .bind(record.compressed_size)
        .bind(record.status.to_string())
        .bind(record.last_modified_date)
        .execute(&self.pool)
        .await
        .context("Failed to update compress record")?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, id: Uuid) -> Result<Option<CompressRecord>> {
        let record = sqlx::query_as::<Postgres, CompressRecord>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM compress_records
            WHERE id = $1
            "#,
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch compress record")?;

        Ok(record)
    }

    #[tracing::instrument(skip(self))]
    async fn find_by_digest(
        &self,
        sha256: &str,
        storage_credentials_key: Option<&str>,
        statuses: &[CompressStatus],
    ) -> Result<Option<CompressRecord>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.to_string()).collect();
        let record = sqlx::query_as::<Postgres, CompressRecord>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM compress_records
            WHERE sha256 = $1
              AND storage_credentials_key IS NOT DISTINCT FROM $2
              AND status = ANY($3)
            LIMIT 1
            "#,
        ))
        .bind(sha256)
        .bind(storage_credentials_key)
        .bind(statuses)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch compress record by digest")?;

        Ok(record)
    }
}
