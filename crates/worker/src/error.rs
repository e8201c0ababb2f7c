//! Pipeline error types.

use pkgedit_metadata::MetadataError;
use pkgedit_storage::{CopyStatus, StorageError};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while backing up or applying a single edit request.
///
/// Everything except a failed eligible-edit fetch is scoped to the edit
/// that raised it; the coordinator logs it and moves on.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("corrupt package archive: {0}")]
    CorruptArchive(String),

    #[error("package archive has no manifest entry")]
    ManifestMissing,

    #[error("invalid package identity: {0}")]
    InvalidPackage(String),

    #[error("backup copy to {key} ended with status {status}")]
    BackupFailed { key: String, status: CopyStatus },

    #[error("backup copy to {key} still pending after {waited:?}")]
    BackupTimeout { key: String, waited: Duration },

    #[error("concurrent modification of edit {edit_key}: expected 1 row updated, got {rows_affected}")]
    ConcurrentModification { edit_key: i64, rows_affected: u64 },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("metadata error: {0}")]
    Metadata(MetadataError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Short machine-readable name, used as a log field.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CorruptArchive(_) => "corrupt_archive",
            Self::ManifestMissing => "manifest_missing",
            Self::InvalidPackage(_) => "invalid_package",
            Self::BackupFailed { .. } => "backup_failed",
            Self::BackupTimeout { .. } => "backup_timeout",
            Self::ConcurrentModification { .. } => "concurrent_modification",
            Self::Storage(_) => "storage_error",
            Self::Metadata(_) => "metadata_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl From<pkgedit_core::Error> for PipelineError {
    fn from(e: pkgedit_core::Error) -> Self {
        match e {
            pkgedit_core::Error::CorruptArchive(msg) => Self::CorruptArchive(msg),
            pkgedit_core::Error::ManifestMissing => Self::ManifestMissing,
            pkgedit_core::Error::InvalidPackage(msg) => Self::InvalidPackage(msg),
            pkgedit_core::Error::Config(msg) => Self::Internal(msg),
        }
    }
}

impl From<MetadataError> for PipelineError {
    fn from(e: MetadataError) -> Self {
        match e {
            MetadataError::ConcurrentModification {
                edit_key,
                rows_affected,
            } => Self::ConcurrentModification {
                edit_key,
                rows_affected,
            },
            other => Self::Metadata(other),
        }
    }
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_row_mismatch_is_lifted() {
        let err = PipelineError::from(MetadataError::ConcurrentModification {
            edit_key: 5,
            rows_affected: 0,
        });
        assert!(matches!(
            err,
            PipelineError::ConcurrentModification {
                edit_key: 5,
                rows_affected: 0
            }
        ));
        assert_eq!(err.code(), "concurrent_modification");
    }

    #[test]
    fn test_codec_errors_keep_their_kind() {
        assert!(matches!(
            PipelineError::from(pkgedit_core::Error::ManifestMissing),
            PipelineError::ManifestMissing
        ));
        assert!(matches!(
            PipelineError::from(pkgedit_core::Error::CorruptArchive("bad".to_string())),
            PipelineError::CorruptArchive(msg) if msg == "bad"
        ));
    }

    #[test]
    fn test_backup_failed_carries_storage_status() {
        let err = PipelineError::BackupFailed {
            key: "packages/foo.1.0.0.nupkg.original".to_string(),
            status: CopyStatus::Aborted("cancelled by operator".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "backup copy to packages/foo.1.0.0.nupkg.original ended with status aborted: cancelled by operator"
        );
    }
}
