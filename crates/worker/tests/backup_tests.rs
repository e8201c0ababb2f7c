mod common;

use common::{ScriptedStore, TestEnv};
use pkgedit_core::PackageIdentity;
use pkgedit_storage::{CopyStatus, ObjectStore, StorageError};
use pkgedit_worker::{BackupManager, BackupOutcome, PipelineError};
use std::sync::Arc;
use std::time::Duration;

const POLL: Duration = Duration::from_millis(5);

fn foo() -> PackageIdentity {
    PackageIdentity::new("Foo", "1.0.0").unwrap()
}

#[tokio::test]
async fn test_ensure_backup_is_idempotent() {
    let env = TestEnv::new().await;
    let original = env.publish("Foo", "1.0.0", "Old").await;
    let store = Arc::new(ScriptedStore::new(env.storage()));
    let manager = BackupManager::new(store.clone(), POLL, None);

    let first = manager.ensure_backup(&foo()).await.unwrap();
    let second = manager.ensure_backup(&foo()).await.unwrap();

    assert!(first.was_created());
    assert!(matches!(second, BackupOutcome::Reused(_)));
    assert_eq!(first.backup(), second.backup());
    assert_eq!(store.start_copies(), 1);
    assert_eq!(env.backup("foo", "1.0.0").await, original);
}

#[tokio::test]
async fn test_existing_backup_is_never_overwritten() {
    let env = TestEnv::new().await;
    let original = env.publish("Foo", "1.0.0", "Old").await;
    let manager = BackupManager::new(env.storage(), POLL, None);

    manager.ensure_backup(&foo()).await.unwrap();
    let republished = env.publish("Foo", "1.0.0", "Changed").await;
    assert_ne!(original, republished);

    let outcome = manager.ensure_backup(&foo()).await.unwrap();
    assert!(!outcome.was_created());
    assert_eq!(env.backup("foo", "1.0.0").await, original);
}

#[tokio::test]
async fn test_pending_copy_is_polled_until_success() {
    let env = TestEnv::new().await;
    let original = env.publish("Foo", "1.0.0", "Old").await;
    let store = Arc::new(
        ScriptedStore::new(env.storage()).with_script([
            CopyStatus::Pending,
            CopyStatus::Pending,
            CopyStatus::Success,
        ]),
    );
    let manager = BackupManager::new(store.clone(), POLL, None);

    let outcome = manager.ensure_backup(&foo()).await.unwrap();

    assert!(outcome.was_created());
    assert_eq!(store.start_copies(), 1);
    assert_eq!(store.status_polls(), 3);
    assert_eq!(env.backup("foo", "1.0.0").await, original);
}

#[tokio::test]
async fn test_failed_copy_reports_storage_status() {
    let env = TestEnv::new().await;
    env.publish("Foo", "1.0.0", "Old").await;
    let store = Arc::new(ScriptedStore::new(env.storage()).with_script([
        CopyStatus::Pending,
        CopyStatus::Failed("source modified during copy".to_string()),
    ]));
    let manager = BackupManager::new(store.clone(), POLL, None);

    match manager.ensure_backup(&foo()).await {
        Err(PipelineError::BackupFailed { key, status }) => {
            assert_eq!(key, "packages/foo.1.0.0.nupkg.original");
            assert_eq!(
                status,
                CopyStatus::Failed("source modified during copy".to_string())
            );
        }
        other => panic!("expected BackupFailed, got {other:?}"),
    }
    assert!(!store.exists(&foo().backup_archive_key()).await.unwrap());
}

#[tokio::test]
async fn test_aborted_copy_is_a_failure() {
    let env = TestEnv::new().await;
    env.publish("Foo", "1.0.0", "Old").await;
    let store = Arc::new(
        ScriptedStore::new(env.storage())
            .with_script([CopyStatus::Aborted("cancelled".to_string())]),
    );
    let manager = BackupManager::new(store, POLL, None);

    assert!(matches!(
        manager.ensure_backup(&foo()).await,
        Err(PipelineError::BackupFailed {
            status: CopyStatus::Aborted(_),
            ..
        })
    ));
}

#[tokio::test]
async fn test_pending_copy_times_out() {
    let env = TestEnv::new().await;
    env.publish("Foo", "1.0.0", "Old").await;
    // An empty script keeps the copy pending forever
    let store = Arc::new(ScriptedStore::new(env.storage()).with_script(Vec::<CopyStatus>::new()));
    let max_wait = Duration::from_millis(40);
    let manager = BackupManager::new(store.clone(), POLL, Some(max_wait));

    match manager.ensure_backup(&foo()).await {
        Err(PipelineError::BackupTimeout { key, waited }) => {
            assert_eq!(key, "packages/foo.1.0.0.nupkg.original");
            assert!(waited >= max_wait);
        }
        other => panic!("expected BackupTimeout, got {other:?}"),
    }
    assert!(store.status_polls() >= 1);
}

#[tokio::test]
async fn test_missing_live_archive_is_a_storage_error() {
    let env = TestEnv::new().await;
    let manager = BackupManager::new(env.storage(), POLL, None);

    assert!(matches!(
        manager.ensure_backup(&foo()).await,
        Err(PipelineError::Storage(StorageError::NotFound(_)))
    ));
}
