//! Postgres repositories implementing the backing-store contracts.
//!
//! The status-conditional UPDATE in `try_claim` is the system's only
//! cross-process synchronization: any number of runners may race on the
//! same record and exactly one sees `rows_affected == 1`.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

mod archive;
mod compress;

pub use archive::ArchiveRepository;
pub use compress::CompressRepository;

/// Connect a pool and run pending migrations.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    Ok(pool)
}
