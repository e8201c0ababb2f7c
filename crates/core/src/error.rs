//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("corrupt package archive: {0}")]
    CorruptArchive(String),

    #[error("package archive has no manifest entry")]
    ManifestMissing,

    #[error("invalid package identity: {0}")]
    InvalidPackage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
