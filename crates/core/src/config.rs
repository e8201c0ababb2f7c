//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Object store configuration for package archives.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory holding the `packages/` tree.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to the ambient AWS credential chain if not set.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to the ambient AWS credential chain if not set.
        secret_access_key: Option<String>,
        /// Force path-style URLs (`endpoint/bucket/key`). Required for MinIO.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.trim().is_empty() {
                    return Err("s3 config requires a non-empty bucket".to_string());
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ),
                }
            }
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (local runs and tests).
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// How long a statement waits on a locked database before failing, in seconds.
        #[serde(default = "default_sqlite_busy_timeout_secs")]
        busy_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL. Takes precedence over the individual fields.
        url: Option<String>,
        host: Option<String>,
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        username: Option<String>,
        /// Prefer PKGEDIT_METADATA__PASSWORD over storing this in a file.
        password: Option<String>,
        database: Option<String>,
        ssl_mode: Option<PgSslMode>,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    // One per backup worker plus the sequential applier
    11
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(60_000)
}

fn default_sqlite_busy_timeout_secs() -> Option<u64> {
    Some(DEFAULT_SQLITE_BUSY_TIMEOUT_SECS)
}

/// SQLite busy timeout used when none is configured.
pub const DEFAULT_SQLITE_BUSY_TIMEOUT_SECS: u64 = 5;

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            busy_timeout_secs: default_sqlite_busy_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                max_connections,
                ..
            } => {
                if *max_connections == 0 {
                    return Err("postgres max_connections must be at least 1".to_string());
                }
                match (url.as_ref(), host.as_ref(), database.as_ref()) {
                    (Some(_), _, _) => Ok(()),
                    (None, Some(_), Some(_)) => Ok(()),
                    (None, None, _) => Err(
                        "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                    ),
                    (None, Some(_), None) => Err(
                        "postgres config requires 'database' when using individual fields"
                            .to_string(),
                    ),
                }
            }
        }
    }
}

/// Edit pipeline tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum number of backups created concurrently in the fan-out phase.
    #[serde(default = "default_backup_concurrency")]
    pub backup_concurrency: usize,
    /// Interval between storage-side copy status checks, in milliseconds.
    #[serde(default = "default_copy_poll_interval_ms")]
    pub copy_poll_interval_ms: u64,
    /// Give up on a pending backup copy after this many seconds (default: wait forever).
    #[serde(default)]
    pub copy_max_wait_secs: Option<u64>,
}

fn default_backup_concurrency() -> usize {
    10
}

fn default_copy_poll_interval_ms() -> u64 {
    3000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            backup_concurrency: default_backup_concurrency(),
            copy_poll_interval_ms: default_copy_poll_interval_ms(),
            copy_max_wait_secs: None,
        }
    }
}

impl PipelineConfig {
    /// Copy status poll interval as a Duration.
    pub fn copy_poll_interval(&self) -> Duration {
        Duration::from_millis(self.copy_poll_interval_ms)
    }

    /// Maximum wait for a pending backup copy, if bounded.
    pub fn copy_max_wait(&self) -> Option<Duration> {
        self.copy_max_wait_secs.map(Duration::from_secs)
    }

    /// Validate pipeline configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.backup_concurrency == 0 {
            return Err("pipeline.backup_concurrency must be at least 1".to_string());
        }
        if self.copy_poll_interval_ms == 0 {
            return Err("pipeline.copy_poll_interval_ms must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Complete worker configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Object store holding package archives.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Metadata store holding edit requests.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Pipeline tuning.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Validate every section, returning the first error.
    pub fn validate(&self) -> crate::Result<()> {
        self.storage.validate().map_err(crate::Error::Config)?;
        self.metadata.validate().map_err(crate::Error::Config)?;
        self.pipeline.validate().map_err(crate::Error::Config)?;
        Ok(())
    }
}
