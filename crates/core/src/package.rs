//! Package identities and their object store keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Object store prefix for package archives.
pub const PACKAGES_PREFIX: &str = "packages";

/// Reserved suffix distinguishing the original backup from the live archive.
///
/// Live keys always end in `.nupkg`, so no live key can carry this suffix.
pub const ORIGINAL_BACKUP_SUFFIX: &str = ".original";

/// A `(package id, version)` pair identifying one published archive.
///
/// Comparison is case-insensitive: both parts are stored lower-cased, the
/// same form used for archive object names.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageIdentity {
    id: String,
    version: String,
}

impl PackageIdentity {
    /// Create an identity, validating and lower-casing both parts.
    pub fn new(id: &str, version: &str) -> crate::Result<Self> {
        Ok(Self {
            id: normalize_part("package id", id)?,
            version: normalize_part("version", version)?,
        })
    }

    /// Lower-cased package id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Lower-cased version string.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Object store key of the live (published) archive.
    pub fn live_archive_key(&self) -> String {
        format!("{}/{}.{}.nupkg", PACKAGES_PREFIX, self.id, self.version)
    }

    /// Object store key of the original pre-edit backup.
    pub fn backup_archive_key(&self) -> String {
        format!("{}{}", self.live_archive_key(), ORIGINAL_BACKUP_SUFFIX)
    }
}

fn normalize_part(what: &str, value: &str) -> crate::Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(crate::Error::InvalidPackage(format!("{what} cannot be empty")));
    }
    if value == "." || value == ".." {
        return Err(crate::Error::InvalidPackage(format!(
            "{what} cannot be a relative path segment"
        )));
    }
    // NuGet ids and versions: alphanumerics plus '.', '-', '_' and '+' (build metadata)
    for c in value.chars() {
        if !matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' | '+') {
            return Err(crate::Error::InvalidPackage(format!(
                "invalid character in {what}: {c:?}"
            )));
        }
    }
    Ok(value.to_ascii_lowercase())
}

impl fmt::Debug for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PackageIdentity({self})")
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.version)
    }
}
