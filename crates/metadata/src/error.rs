//! Metadata store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A single-row state transition matched some other number of rows.
    #[error("concurrent modification of edit {edit_key}: expected 1 row updated, got {rows_affected}")]
    ConcurrentModification { edit_key: i64, rows_affected: u64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrent_modification_message() {
        let err = MetadataError::ConcurrentModification {
            edit_key: 42,
            rows_affected: 0,
        };
        assert_eq!(
            err.to_string(),
            "concurrent modification of edit 42: expected 1 row updated, got 0"
        );
    }
}
