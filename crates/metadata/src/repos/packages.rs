//! Package repository.

use crate::error::MetadataResult;
use crate::models::PackageRow;
use async_trait::async_trait;

/// Repository for published package versions.
#[async_trait]
pub trait PackageRepo: Send + Sync {
    /// Register a package version. Identity is case-insensitive.
    async fn create_package(&self, package_id: &str, version: &str) -> MetadataResult<PackageRow>;

    /// Look up a package version, ignoring case.
    async fn get_package(&self, package_id: &str, version: &str)
    -> MetadataResult<Option<PackageRow>>;
}
