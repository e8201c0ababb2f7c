//! Original-archive backups.
//!
//! Before any edit touches a package's live archive, a storage-side copy of
//! it is made under the reserved `.original` key. The backup is created at
//! most once per package version and never overwritten afterwards; every
//! rewrite starts from it.

use crate::error::{PipelineError, PipelineResult};
use pkgedit_core::PackageIdentity;
use pkgedit_core::config::PipelineConfig;
use pkgedit_storage::{CopyStatus, ObjectStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Object keys of a package's live archive and its original backup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupRef {
    pub package: PackageIdentity,
    pub live_key: String,
    pub backup_key: String,
}

impl BackupRef {
    pub fn for_package(package: &PackageIdentity) -> Self {
        Self {
            package: package.clone(),
            live_key: package.live_archive_key(),
            backup_key: package.backup_archive_key(),
        }
    }
}

/// How [`BackupManager::ensure_backup`] satisfied the request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackupOutcome {
    /// The backup already existed and was left untouched.
    Reused(BackupRef),
    /// The backup was copied from the live archive during this call.
    Created(BackupRef),
}

impl BackupOutcome {
    pub fn backup(&self) -> &BackupRef {
        match self {
            Self::Reused(backup) | Self::Created(backup) => backup,
        }
    }

    pub fn into_backup(self) -> BackupRef {
        match self {
            Self::Reused(backup) | Self::Created(backup) => backup,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Creates original backups through the object store's copy primitive.
#[derive(Clone)]
pub struct BackupManager {
    storage: Arc<dyn ObjectStore>,
    poll_interval: Duration,
    max_wait: Option<Duration>,
}

impl BackupManager {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        poll_interval: Duration,
        max_wait: Option<Duration>,
    ) -> Self {
        Self {
            storage,
            poll_interval,
            max_wait,
        }
    }

    pub fn from_config(storage: Arc<dyn ObjectStore>, config: &PipelineConfig) -> Self {
        Self::new(storage, config.copy_poll_interval(), config.copy_max_wait())
    }

    /// Make sure the original backup for `package` exists.
    ///
    /// An existing backup is returned as-is. Otherwise a copy of the live
    /// archive is started and its status polled every `poll_interval` until
    /// it leaves `Pending`. Only `Success` yields a backup; any other
    /// terminal status is `BackupFailed`, and exceeding `max_wait` while
    /// still pending is `BackupTimeout`.
    pub async fn ensure_backup(&self, package: &PackageIdentity) -> PipelineResult<BackupOutcome> {
        let backup = BackupRef::for_package(package);

        if self.storage.exists(&backup.backup_key).await? {
            tracing::debug!(
                package_id = %package.id(),
                version = %package.version(),
                backup_key = %backup.backup_key,
                "Original backup already exists"
            );
            return Ok(BackupOutcome::Reused(backup));
        }

        let started = Instant::now();
        let mut status = self
            .storage
            .start_copy(&backup.live_key, &backup.backup_key)
            .await?;

        while status.is_pending() {
            let waited = started.elapsed();
            if let Some(max_wait) = self.max_wait
                && waited >= max_wait
            {
                return Err(PipelineError::BackupTimeout {
                    key: backup.backup_key,
                    waited,
                });
            }
            tracing::debug!(
                backup_key = %backup.backup_key,
                waited_ms = waited.as_millis() as u64,
                "Backup copy pending"
            );
            tokio::time::sleep(self.poll_interval).await;
            status = self.storage.copy_status(&backup.backup_key).await?;
        }

        match status {
            CopyStatus::Success => {
                tracing::info!(
                    package_id = %package.id(),
                    version = %package.version(),
                    backup_key = %backup.backup_key,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Original backup created"
                );
                Ok(BackupOutcome::Created(backup))
            }
            status => Err(PipelineError::BackupFailed {
                key: backup.backup_key,
                status,
            }),
        }
    }
}
