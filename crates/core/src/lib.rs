//! Core domain types and shared logic for pkgedit.
//!
//! This crate defines the data model used across all other crates:
//! - Package identities and their object store keys
//! - Edit requests and manifest field mutations
//! - The package archive codec (manifest rewriting)
//! - Configuration shared by the worker and the stores

pub mod archive;
pub mod config;
pub mod edit;
pub mod error;
pub mod package;

pub use edit::{EditRequest, FieldMutation, ManifestField};
pub use error::{Error, Result};
pub use package::PackageIdentity;

/// Maximum number of processing attempts for a single edit request.
///
/// Requests that reach this count without completing are never selected again.
pub const MAX_ATTEMPTS: i32 = 3;
