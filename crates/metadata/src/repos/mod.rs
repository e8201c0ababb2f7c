//! Repository traits for metadata operations.

pub mod edits;
pub mod packages;

pub use edits::EditRepo;
pub use packages::PackageRepo;
