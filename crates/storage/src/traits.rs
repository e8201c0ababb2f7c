//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

/// State of a storage-side copy, as reported by the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CopyStatus {
    /// The copy has been accepted but has not finished.
    Pending,
    /// The target holds a complete copy of the source.
    Success,
    /// The copy failed; carries the backend's description.
    Failed(String),
    /// The copy was aborted before completing; carries the backend's description.
    Aborted(String),
}

impl CopyStatus {
    /// Whether the copy is still in progress.
    pub fn is_pending(&self) -> bool {
        matches!(self, CopyStatus::Pending)
    }
}

impl fmt::Display for CopyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyStatus::Pending => f.write_str("pending"),
            CopyStatus::Success => f.write_str("success"),
            CopyStatus::Failed(reason) => write!(f, "failed: {reason}"),
            CopyStatus::Aborted(reason) => write!(f, "aborted: {reason}"),
        }
    }
}

/// Object store abstraction for package archives.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's size without fetching content.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Get an object's content.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Put an object atomically, replacing any existing object at `key`.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Delete an object.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List object keys under a prefix.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Start a storage-side copy of `from` onto `to`.
    ///
    /// Backends that copy synchronously return a terminal status directly.
    /// Otherwise the returned status is `Pending` and progress is observed
    /// through [`ObjectStore::copy_status`] on the target key.
    async fn start_copy(&self, from: &str, to: &str) -> StorageResult<CopyStatus>;

    /// Current status of the copy whose target is `key`.
    async fn copy_status(&self, key: &str) -> StorageResult<CopyStatus>;

    /// Get the name of this storage backend.
    ///
    /// Returns a static string identifier for the backend type (e.g., "s3", "filesystem").
    fn backend_name(&self) -> &'static str;

    /// Verify storage backend connectivity.
    ///
    /// Called once at worker startup, before any edit is processed.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
}
