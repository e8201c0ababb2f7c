//! Object storage abstraction and backends for package archives.
//!
//! This crate provides:
//! - Atomic whole-object reads and writes
//! - Storage-side copies with pollable status, used for original backups
//! - Backends: local filesystem and S3-compatible

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use backends::s3::{S3Backend, S3Settings};
pub use error::{StorageError, StorageResult};
pub use traits::{CopyStatus, ObjectMeta, ObjectStore};

use pkgedit_core::config::StorageConfig;
use std::sync::Arc;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
        } => {
            let backend = S3Backend::new(S3Settings {
                bucket: bucket.clone(),
                endpoint: endpoint.clone(),
                region: region.clone(),
                prefix: prefix.clone(),
                credentials: access_key_id.clone().zip(secret_access_key.clone()),
                force_path_style: *force_path_style,
            })?;
            Ok(Arc::new(backend))
        }
    }
}
