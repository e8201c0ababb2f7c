//! Queued edit application pipeline.
//!
//! This crate provides the batch worker:
//! - Original-archive backups via storage-side copies
//! - Per-edit manifest rewrite and republish
//! - The two-phase coordinator (concurrent backups, sequential application)

pub mod applier;
pub mod backup;
pub mod error;
pub mod pipeline;

pub use applier::EditApplier;
pub use backup::{BackupManager, BackupOutcome, BackupRef};
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{PipelineCoordinator, RunReport};
