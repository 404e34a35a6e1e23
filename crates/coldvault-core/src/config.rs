//! Configuration module
//!
//! All settings come from the environment (a `.env` file is honored in
//! development). Every knob has a default tuned for a single modest
//! instance; only `DATABASE_URL` is required.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

const DEFAULT_PAGE_SIZE: i64 = 1000;
const DEFAULT_MAX_CONCURRENCY: usize = 4;
const DEFAULT_PENDING_QUEUE_SIZE: usize = 1000;
const DEFAULT_PULL_INTERVAL_MS: u64 = 1000;
const DEFAULT_ARCHIVE_INTERVAL_SECS: u64 = 3600;
const DEFAULT_RESTORE_INTERVAL_SECS: u64 = 3600;
const DEFAULT_RETRY_STALE_SECS: i64 = 1800;
const DEFAULT_MIN_DISK_FREE_GB: u64 = 10;
const DEFAULT_DISK_CHECK_INTERVAL_SECS: u64 = 30;
const DEFAULT_MONITOR_REPORT_INTERVAL_SECS: u64 = 60;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    /// Scratch volume for in-flight downloads and codec output.
    pub work_dir: PathBuf,
    /// Root of the local primary-storage pools.
    pub storage_root: PathBuf,
    /// Root of the local cold-storage backend.
    pub cold_storage_root: PathBuf,
    pub page_size: i64,
    /// Parallel in-flight units per resource manager.
    pub max_concurrency: usize,
    /// Overflow queue depth per resource manager.
    pub pending_queue_size: usize,
    pub pull_interval: Duration,
    pub archive_interval: Duration,
    pub restore_interval: Duration,
    /// How long a record may sit in a waiting status before backlog refill
    /// picks it up again.
    pub retry_stale: chrono::Duration,
    pub download_workers: usize,
    pub compress_workers: usize,
    pub upload_workers: usize,
    /// In-flight records per pipeline run; kept small so stacked stage
    /// buffers do not amplify upstream reads.
    pub pipeline_prefetch: usize,
    pub compress_enabled: bool,
    pub min_disk_free_bytes: u64,
    pub disk_check_interval: Duration,
    pub monitor_report_interval: Duration,
    pub event_bus_capacity: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::Config("DATABASE_URL is not set".to_string()))?;

        Ok(Self {
            database_url,
            db_max_connections: parse_env("COLDVAULT_DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?,
            work_dir: PathBuf::from(env_or("COLDVAULT_WORK_DIR", "/var/lib/coldvault/work")),
            storage_root: PathBuf::from(env_or("COLDVAULT_STORAGE_ROOT", "/var/lib/coldvault/storage")),
            cold_storage_root: PathBuf::from(env_or("COLDVAULT_COLD_ROOT", "/var/lib/coldvault/cold")),
            page_size: parse_env("COLDVAULT_PAGE_SIZE", DEFAULT_PAGE_SIZE)?,
            max_concurrency: parse_env("COLDVAULT_MAX_CONCURRENCY", DEFAULT_MAX_CONCURRENCY)?,
            pending_queue_size: parse_env("COLDVAULT_PENDING_QUEUE_SIZE", DEFAULT_PENDING_QUEUE_SIZE)?,
            pull_interval: Duration::from_millis(parse_env(
                "COLDVAULT_PULL_INTERVAL_MS",
                DEFAULT_PULL_INTERVAL_MS,
            )?),
            archive_interval: Duration::from_secs(parse_env(
                "COLDVAULT_ARCHIVE_INTERVAL_SECS",
                DEFAULT_ARCHIVE_INTERVAL_SECS,
            )?),
            restore_interval: Duration::from_secs(parse_env(
                "COLDVAULT_RESTORE_INTERVAL_SECS",
                DEFAULT_RESTORE_INTERVAL_SECS,
            )?),
            retry_stale: chrono::Duration::seconds(parse_env(
                "COLDVAULT_RETRY_STALE_SECS",
                DEFAULT_RETRY_STALE_SECS,
            )?),
            download_workers: parse_env("COLDVAULT_DOWNLOAD_WORKERS", 4)?,
            compress_workers: parse_env("COLDVAULT_COMPRESS_WORKERS", 2)?,
            upload_workers: parse_env("COLDVAULT_UPLOAD_WORKERS", 2)?,
            pipeline_prefetch: parse_env("COLDVAULT_PIPELINE_PREFETCH", 4)?,
            compress_enabled: parse_env("COLDVAULT_COMPRESS_ENABLED", true)?,
            min_disk_free_bytes: parse_env("COLDVAULT_MIN_DISK_FREE_GB", DEFAULT_MIN_DISK_FREE_GB)?
                * 1024
                * 1024
                * 1024,
            disk_check_interval: Duration::from_secs(parse_env(
                "COLDVAULT_DISK_CHECK_INTERVAL_SECS",
                DEFAULT_DISK_CHECK_INTERVAL_SECS,
            )?),
            monitor_report_interval: Duration::from_secs(parse_env(
                "COLDVAULT_MONITOR_REPORT_INTERVAL_SECS",
                DEFAULT_MONITOR_REPORT_INTERVAL_SECS,
            )?),
            event_bus_capacity: parse_env("COLDVAULT_EVENT_BUS_CAPACITY", 256)?,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| AppError::Config(format!("invalid {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_falls_back_to_default() {
        assert_eq!(parse_env("COLDVAULT_TEST_UNSET_KEY", 7usize).unwrap(), 7);
    }

    #[test]
    fn parse_env_rejects_garbage() {
        env::set_var("COLDVAULT_TEST_GARBAGE_KEY", "not-a-number");
        assert!(parse_env("COLDVAULT_TEST_GARBAGE_KEY", 7usize).is_err());
        env::remove_var("COLDVAULT_TEST_GARBAGE_KEY");
    }
}
