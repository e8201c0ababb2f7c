//! Edit request repository.

use crate::error::MetadataResult;
use async_trait::async_trait;
use pkgedit_core::EditRequest;

/// Repository for queued edit requests.
///
/// The two state transitions (`mark_attempted`, `mark_completed`) are
/// single-row updates. Anything other than exactly one affected row is
/// reported as `MetadataError::ConcurrentModification`.
#[async_trait]
pub trait EditRepo: Send + Sync {
    /// All requests not yet completed and under the attempt limit, ordered by `edit_key`.
    async fn fetch_eligible_edits(&self) -> MetadataResult<Vec<EditRequest>>;

    /// Record a processing attempt (`tried_count += 1`).
    ///
    /// Only matches a request that is still eligible, so the attempt limit
    /// holds even when two workers race on the same row.
    async fn mark_attempted(&self, edit_key: i64) -> MetadataResult<()>;

    /// Mark a request completed. Matches only a request not already completed.
    async fn mark_completed(&self, edit_key: i64) -> MetadataResult<()>;

    /// Completed requests for one package version, ordered by `edit_key`.
    ///
    /// The identity match is case-insensitive, like `PackageRepo::get_package`.
    async fn fetch_completed_edits(
        &self,
        package_id: &str,
        version: &str,
    ) -> MetadataResult<Vec<EditRequest>>;

    /// Number of requests that reached the attempt limit without completing.
    async fn count_abandoned_edits(&self) -> MetadataResult<u64>;

    /// Enqueue an edit request against a registered package.
    ///
    /// Takes the request's `edit_name`, `tried_count`, `is_completed` and
    /// field values; `edit_key` is assigned by the store and returned.
    async fn create_edit(&self, package_key: i64, edit: &EditRequest) -> MetadataResult<i64>;

    /// Get an edit request by key, joined with its package identity.
    async fn get_edit(&self, edit_key: i64) -> MetadataResult<Option<EditRequest>>;
}
