use bytes::Bytes;
use pkgedit_core::archive::ArchiveBuilder;
use pkgedit_core::config::PipelineConfig;
use pkgedit_core::{EditRequest, PackageIdentity};
use pkgedit_metadata::{EditRepo, MetadataStore, PackageRepo, SqliteStore};
use pkgedit_storage::{FilesystemBackend, ObjectStore};
use pkgedit_worker::PipelineCoordinator;
use std::sync::Arc;
use tempfile::TempDir;

/// Build a small `.nupkg` whose manifest carries the given title.
pub fn package_archive(id: &str, version: &str, title: &str) -> Vec<u8> {
    let nuspec = format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://schemas.microsoft.com/packaging/2013/05/nuspec.xsd">
  <metadata>
    <id>{id}</id>
    <version>{version}</version>
    <title>{title}</title>
    <authors>Contoso</authors>
    <description>A package used by pipeline tests.</description>
  </metadata>
</package>
"#
    );
    ArchiveBuilder::new()
        .stored("_rels/.rels", b"<Relationships />".to_vec())
        .deflated(format!("{id}.nuspec"), nuspec.into_bytes())
        .deflated(format!("lib/net8.0/{id}.dll"), vec![0x4d; 4096])
        .streamed("[Content_Types].xml", b"<Types />".to_vec())
        .build()
        .unwrap()
}

/// Pipeline settings tuned for tests: fast polling, no wait limit.
#[allow(dead_code)]
pub fn test_pipeline_config() -> PipelineConfig {
    PipelineConfig {
        backup_concurrency: 4,
        copy_poll_interval_ms: 5,
        copy_max_wait_secs: None,
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

/// Filesystem storage and SQLite metadata sharing one temp directory.
#[allow(dead_code)]
pub struct TestEnv {
    pub storage: Arc<FilesystemBackend>,
    pub metadata: Arc<SqliteStore>,
    pub dir: TempDir,
}

#[allow(dead_code)]
impl TestEnv {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let storage = FilesystemBackend::new(dir.path().join("store")).await.unwrap();
        let metadata = SqliteStore::new(dir.path().join("metadata.db"), None)
            .await
            .unwrap();
        Self {
            storage: Arc::new(storage),
            metadata: Arc::new(metadata),
            dir,
        }
    }

    pub fn storage(&self) -> Arc<dyn ObjectStore> {
        self.storage.clone()
    }

    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.metadata.clone()
    }

    /// Coordinator over the plain filesystem backend.
    pub fn coordinator(&self) -> PipelineCoordinator {
        PipelineCoordinator::new(self.storage(), self.metadata(), &test_pipeline_config())
    }

    /// Publish a live archive for the package and return its bytes.
    pub async fn publish(&self, id: &str, version: &str, title: &str) -> Bytes {
        let archive = Bytes::from(package_archive(id, version, title));
        let package = PackageIdentity::new(id, version).unwrap();
        self.storage
            .put(&package.live_archive_key(), archive.clone())
            .await
            .unwrap();
        archive
    }

    /// Register the package if needed and enqueue an edit, returning its key.
    pub async fn seed_edit(&self, id: &str, version: &str, edit: EditRequest) -> i64 {
        let package = match self.metadata.get_package(id, version).await.unwrap() {
            Some(package) => package,
            None => self.metadata.create_package(id, version).await.unwrap(),
        };
        self.metadata
            .create_edit(package.package_key, &edit)
            .await
            .unwrap()
    }

    pub async fn edit(&self, edit_key: i64) -> EditRequest {
        self.metadata.get_edit(edit_key).await.unwrap().unwrap()
    }

    pub async fn live(&self, id: &str, version: &str) -> Bytes {
        let package = PackageIdentity::new(id, version).unwrap();
        self.storage.get(&package.live_archive_key()).await.unwrap()
    }

    pub async fn backup(&self, id: &str, version: &str) -> Bytes {
        let package = PackageIdentity::new(id, version).unwrap();
        self.storage.get(&package.backup_archive_key()).await.unwrap()
    }
}
