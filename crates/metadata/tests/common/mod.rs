use pkgedit_core::EditRequest;
use pkgedit_metadata::{EditRepo, MetadataStore, PackageRepo, SqliteStore};
use std::sync::Arc;
use tempfile::TempDir;

/// SQLite metadata store in a temp directory that lives as long as the wrapper.
pub struct TestMetadata {
    pub store: Arc<SqliteStore>,
    pub dir: TempDir,
}

impl TestMetadata {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(dir.path().join("metadata.db"), None)
            .await
            .unwrap();
        Self {
            store: Arc::new(store),
            dir,
        }
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.store.clone()
    }

    /// Register the package if needed and enqueue an edit, returning its key.
    #[allow(dead_code)]
    pub async fn seed_edit(&self, package_id: &str, version: &str, edit: EditRequest) -> i64 {
        let package = match self.store.get_package(package_id, version).await.unwrap() {
            Some(package) => package,
            None => self.store.create_package(package_id, version).await.unwrap(),
        };
        self.store
            .create_edit(package.package_key, &edit)
            .await
            .unwrap()
    }
}

/// An edit that only sets a new title.
#[allow(dead_code)]
pub fn title_edit(title: &str) -> EditRequest {
    EditRequest {
        edit_name: Some(format!("set title to {title}")),
        title: Some(title.to_string()),
        ..Default::default()
    }
}
