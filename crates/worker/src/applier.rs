//! Per-edit application: rewrite the manifest and republish the archive.

use crate::backup::BackupRef;
use crate::error::{PipelineError, PipelineResult};
use bytes::Bytes;
use pkgedit_core::archive::rewrite_manifest;
use pkgedit_core::{EditRequest, FieldMutation};
use pkgedit_metadata::MetadataStore;
use pkgedit_storage::ObjectStore;
use std::sync::Arc;
use tracing::instrument;

/// Applies one edit request on top of its package's original backup.
///
/// The steps run strictly in order and the first failure aborts the rest:
/// record the attempt, read the backup, rewrite the manifest, overwrite the
/// live archive, record completion. The attempt is recorded before anything
/// is read, so a crash at any later point leaves the request eligible with
/// its attempt counted.
///
/// The rewrite replays every completed edit for the package together with
/// this one, in `edit_key` order. The live archive therefore depends only on
/// which edits have completed, never on how they were split across runs.
#[derive(Clone)]
pub struct EditApplier {
    storage: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
}

impl EditApplier {
    pub fn new(storage: Arc<dyn ObjectStore>, metadata: Arc<dyn MetadataStore>) -> Self {
        Self { storage, metadata }
    }

    #[instrument(
        skip(self, edit, backup),
        fields(edit_key = edit.edit_key, package_id = %edit.package_id, version = %edit.version)
    )]
    pub async fn apply(&self, edit: &EditRequest, backup: &BackupRef) -> PipelineResult<()> {
        let package = edit.package()?;
        if package != backup.package {
            return Err(PipelineError::Internal(format!(
                "edit {} targets {package} but backup is for {}",
                edit.edit_key, backup.package
            )));
        }

        self.metadata.mark_attempted(edit.edit_key).await?;

        let original = self.storage.get(&backup.backup_key).await?;

        let completed = self
            .metadata
            .fetch_completed_edits(&edit.package_id, &edit.version)
            .await?;
        let replayed = completed.len();
        let mutations = replay_order(completed, edit);
        let rewritten = rewrite_manifest(&original, &mutations)?;

        self.storage
            .put(&backup.live_key, Bytes::from(rewritten))
            .await?;

        self.metadata.mark_completed(edit.edit_key).await?;

        tracing::info!(
            mutations = mutations.len(),
            replayed,
            live_key = %backup.live_key,
            "Edit applied"
        );
        Ok(())
    }
}

/// Mutations of `completed` plus `edit`, flattened in `edit_key` order.
fn replay_order(mut completed: Vec<EditRequest>, edit: &EditRequest) -> Vec<FieldMutation> {
    completed.retain(|done| done.edit_key != edit.edit_key);
    completed.push(edit.clone());
    completed.sort_by_key(|e| e.edit_key);
    completed.iter().flat_map(EditRequest::mutations).collect()
}
