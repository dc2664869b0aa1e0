//! Configuration module
//!
//! Worker and CLI settings read from the environment (and `.env` when
//! present). Optional values fall back to typed defaults; required values
//! and malformed numbers are reported as [`ConfigError`].

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::constants::DEFAULT_WORKER_CONCURRENCY;
use crate::storage_types::StorageBackend;

const MAX_CONNECTIONS: u32 = 10;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const TASK_QUEUE_POLL_INTERVAL_MS: u64 = 1000;
const TASK_QUEUE_MAX_RETRIES: i32 = 3;
const TASK_QUEUE_VISIBILITY_TIMEOUT_SECS: i32 = 900;
const STALE_TASK_REAP_INTERVAL_SECS: u64 = 60;
const STALE_TASK_GRACE_PERIOD_SECS: i64 = 120;
const TASK_RETENTION_DAYS: i32 = 30;
const DOWNLOAD_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has an invalid value: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("{0}")]
    Storage(String),
}

/// Artifact store settings.
#[derive(Clone, Debug)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    /// Custom endpoint for S3-compatible providers (MinIO, Spaces, ...).
    pub s3_endpoint: Option<String>,
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
}

/// Task queue and worker pool settings.
#[derive(Clone, Debug)]
pub struct QueueSettings {
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    pub max_retries: i32,
    /// Visibility timeout stamped on each task as `timeout_seconds`.
    pub visibility_timeout_secs: i32,
    /// 0 disables the stale task reaper.
    pub stale_task_reap_interval_secs: u64,
    pub stale_task_grace_period_secs: i64,
    /// Retention for finished tasks. 0 disables cleanup.
    pub retention_days: i32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_WORKER_CONCURRENCY,
            poll_interval_ms: TASK_QUEUE_POLL_INTERVAL_MS,
            max_retries: TASK_QUEUE_MAX_RETRIES,
            visibility_timeout_secs: TASK_QUEUE_VISIBILITY_TIMEOUT_SECS,
            stale_task_reap_interval_secs: STALE_TASK_REAP_INTERVAL_SECS,
            stale_task_grace_period_secs: STALE_TASK_GRACE_PERIOD_SECS,
            retention_days: TASK_RETENTION_DAYS,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub environment: String,
    pub log_json: bool,
    pub storage: StorageSettings,
    pub queue: QueueSettings,
    pub ffmpeg_path: String,
    /// Root under which per-task work areas are created.
    pub work_dir: PathBuf,
    pub download_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = match var("STORAGE_BACKEND") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                key: "STORAGE_BACKEND",
                value: raw,
            })?,
            None => StorageBackend::S3,
        };

        let storage = StorageSettings {
            backend,
            s3_bucket: var("S3_BUCKET"),
            s3_region: var("S3_REGION").or_else(|| var("AWS_REGION")),
            s3_endpoint: var("S3_ENDPOINT"),
            local_storage_path: var("LOCAL_STORAGE_PATH"),
            local_storage_base_url: var("LOCAL_STORAGE_BASE_URL"),
        };

        let queue = QueueSettings {
            max_workers: parse_or(&var, "WORKER_CONCURRENCY", DEFAULT_WORKER_CONCURRENCY)?,
            poll_interval_ms: parse_or(
                &var,
                "TASK_QUEUE_POLL_INTERVAL_MS",
                TASK_QUEUE_POLL_INTERVAL_MS,
            )?,
            max_retries: parse_or(&var, "TASK_QUEUE_MAX_RETRIES", TASK_QUEUE_MAX_RETRIES)?,
            visibility_timeout_secs: parse_or(
                &var,
                "TASK_QUEUE_VISIBILITY_TIMEOUT_SECS",
                TASK_QUEUE_VISIBILITY_TIMEOUT_SECS,
            )?,
            stale_task_reap_interval_secs: parse_or(
                &var,
                "STALE_TASK_REAP_INTERVAL_SECS",
                STALE_TASK_REAP_INTERVAL_SECS,
            )?,
            stale_task_grace_period_secs: parse_or(
                &var,
                "STALE_TASK_GRACE_PERIOD_SECS",
                STALE_TASK_GRACE_PERIOD_SECS,
            )?,
            retention_days: parse_or(&var, "TASK_RETENTION_DAYS", TASK_RETENTION_DAYS)?,
        };

        let config = Config {
            database_url: var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            db_max_connections: parse_or(&var, "DB_MAX_CONNECTIONS", MAX_CONNECTIONS)?,
            db_timeout_seconds: parse_or(&var, "DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS)?,
            environment: var("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            log_json: var("LOG_FORMAT")
                .map(|f| f.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            storage,
            queue,
            ffmpeg_path: var("FFMPEG_PATH").unwrap_or_else(|| "ffmpeg".to_string()),
            work_dir: var("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| env::temp_dir().join("reelcast")),
            download_timeout_secs: parse_or(&var, "DOWNLOAD_TIMEOUT_SECS", DOWNLOAD_TIMEOUT_SECS)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.database_url.starts_with("postgres://")
            && !self.database_url.starts_with("postgresql://")
        {
            return Err(ConfigError::Invalid {
                key: "DATABASE_URL",
                value: "<redacted>".to_string(),
            });
        }

        if self.queue.max_workers == 0 {
            return Err(ConfigError::Invalid {
                key: "WORKER_CONCURRENCY",
                value: "0".to_string(),
            });
        }

        if self.queue.visibility_timeout_secs <= 0 {
            return Err(ConfigError::Invalid {
                key: "TASK_QUEUE_VISIBILITY_TIMEOUT_SECS",
                value: self.queue.visibility_timeout_secs.to_string(),
            });
        }

        match self.storage.backend {
            StorageBackend::S3 => {
                if self.storage.s3_bucket.is_none() {
                    return Err(ConfigError::Storage(
                        "S3_BUCKET must be set when using S3 storage backend".to_string(),
                    ));
                }
                if self.storage.s3_region.is_none() {
                    return Err(ConfigError::Storage(
                        "S3_REGION or AWS_REGION must be set when using S3 storage backend"
                            .to_string(),
                    ));
                }
            }
            StorageBackend::Local => {
                if self.storage.local_storage_path.is_none() {
                    return Err(ConfigError::Storage(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                            .to_string(),
                    ));
                }
                if self.storage.local_storage_base_url.is_none() {
                    return Err(ConfigError::Storage(
                        "LOCAL_STORAGE_BASE_URL must be set when using local storage backend"
                            .to_string(),
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }
}

fn parse_or<T, F>(var: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}
