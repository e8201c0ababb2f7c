//! Pipeline coordinator: one batch run over all eligible edit requests.

use crate::applier::EditApplier;
use crate::backup::{BackupManager, BackupOutcome, BackupRef};
use crate::error::{PipelineError, PipelineResult};
use dashmap::DashMap;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use pkgedit_core::config::PipelineConfig;
use pkgedit_core::{EditRequest, PackageIdentity};
use pkgedit_metadata::MetadataStore;
use pkgedit_storage::ObjectStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Counters for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Edit requests fetched as eligible.
    pub eligible: u64,
    /// Archives whose original backup was created during this run.
    pub backups_created: u64,
    /// Archives whose original backup already existed.
    pub backups_reused: u64,
    /// Edit requests skipped because no backup could be ensured.
    pub backup_failures: u64,
    /// Edit requests applied and marked completed.
    pub applied: u64,
    /// Edit requests whose application failed.
    pub apply_failures: u64,
    /// Requests at the attempt limit that never completed.
    pub abandoned: u64,
}

impl RunReport {
    /// Whether any edit request failed during the run.
    pub fn has_failures(&self) -> bool {
        self.backup_failures > 0 || self.apply_failures > 0
    }
}

/// Drives a batch run: fan-out backups, then sequential application.
pub struct PipelineCoordinator {
    metadata: Arc<dyn MetadataStore>,
    backups: BackupManager,
    applier: EditApplier,
    backup_concurrency: usize,
}

impl PipelineCoordinator {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            backups: BackupManager::from_config(storage.clone(), config),
            applier: EditApplier::new(storage, metadata.clone()),
            metadata,
            backup_concurrency: config.backup_concurrency.max(1),
        }
    }

    /// Process every eligible edit request once.
    ///
    /// Only a failure to fetch the eligible set fails the run. Per-edit
    /// failures are logged and counted in the returned report.
    pub async fn run(&self) -> PipelineResult<RunReport> {
        let mut report = RunReport::default();

        match self.metadata.count_abandoned_edits().await {
            Ok(0) => {}
            Ok(abandoned) => {
                report.abandoned = abandoned;
                tracing::warn!(
                    abandoned = abandoned,
                    max_attempts = pkgedit_core::MAX_ATTEMPTS,
                    "Edit requests reached the attempt limit without completing"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to count abandoned edit requests");
            }
        }

        let edits = self.metadata.fetch_eligible_edits().await?;
        report.eligible = edits.len() as u64;
        tracing::info!(eligible = edits.len(), "Fetched eligible edit requests");

        if edits.is_empty() {
            return Ok(report);
        }

        let backups = self.create_backups(&edits, &mut report).await;
        self.apply_edits(&edits, &backups, &mut report).await;

        tracing::info!(
            applied = report.applied,
            apply_failures = report.apply_failures,
            backup_failures = report.backup_failures,
            "Pipeline run finished"
        );
        Ok(report)
    }

    /// Phase 1: ensure a backup for every edit, bounded by `backup_concurrency`.
    ///
    /// Edits targeting the same archive share a single `ensure_backup` call.
    /// The returned map holds an entry for every edit whose backup is in place.
    async fn create_backups(
        &self,
        edits: &[EditRequest],
        report: &mut RunReport,
    ) -> Arc<DashMap<i64, BackupRef>> {
        let backups = Arc::new(DashMap::new());

        let mut by_package: HashMap<PackageIdentity, Vec<i64>> = HashMap::new();
        for edit in edits {
            match edit.package() {
                Ok(package) => by_package.entry(package).or_default().push(edit.edit_key),
                Err(e) => {
                    tracing::error!(
                        edit_key = edit.edit_key,
                        package_id = %edit.package_id,
                        version = %edit.version,
                        error = %e,
                        "Skipping edit with invalid package identity"
                    );
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.backup_concurrency));
        let mut in_flight = FuturesUnordered::new();

        for (package, edit_keys) in by_package {
            let manager = self.backups.clone();
            let semaphore = semaphore.clone();
            let backups = backups.clone();

            in_flight.push(tokio::spawn(async move {
                let result = match semaphore.acquire().await {
                    Ok(_permit) => manager.ensure_backup(&package).await,
                    Err(e) => Err(PipelineError::Internal(format!(
                        "backup semaphore closed: {e}"
                    ))),
                };
                if let Ok(outcome) = &result {
                    for edit_key in &edit_keys {
                        backups.insert(*edit_key, outcome.backup().clone());
                    }
                }
                (package, edit_keys, result)
            }));
        }

        while let Some(joined) = in_flight.next().await {
            let (package, edit_keys, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    // The task's edits stay unmapped and are counted below
                    tracing::error!(error = %e, "Backup task panicked");
                    continue;
                }
            };
            match result {
                Ok(BackupOutcome::Created(_)) => report.backups_created += 1,
                Ok(BackupOutcome::Reused(_)) => report.backups_reused += 1,
                Err(e) => {
                    tracing::error!(
                        package_id = %package.id(),
                        version = %package.version(),
                        edit_keys = ?edit_keys,
                        error = %e,
                        error_code = e.code(),
                        "Failed to ensure original backup, skipping edits"
                    );
                }
            }
        }

        let mapped = edits
            .iter()
            .filter(|edit| backups.contains_key(&edit.edit_key))
            .count() as u64;
        // Invalid identities, failed backups and panicked tasks all leave edits unmapped
        report.backup_failures = report.eligible - mapped;

        backups
    }

    /// Phase 2: apply edits one at a time, in fetch order.
    async fn apply_edits(
        &self,
        edits: &[EditRequest],
        backups: &DashMap<i64, BackupRef>,
        report: &mut RunReport,
    ) {
        for edit in edits {
            let Some(backup) = backups.get(&edit.edit_key).map(|entry| entry.value().clone())
            else {
                continue;
            };

            match self.applier.apply(edit, &backup).await {
                Ok(()) => report.applied += 1,
                Err(e) => {
                    report.apply_failures += 1;
                    tracing::error!(
                        edit_key = edit.edit_key,
                        package_id = %edit.package_id,
                        version = %edit.version,
                        error = %e,
                        error_code = e.code(),
                        "Failed to apply edit"
                    );
                }
            }
        }
    }
}
