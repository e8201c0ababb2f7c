mod common;

use common::{TestMetadata, title_edit};
use pkgedit_core::{EditRequest, MAX_ATTEMPTS};
use pkgedit_metadata::{EditRepo, MetadataError, PackageRepo};

#[tokio::test]
async fn test_fetch_eligible_joins_package_identity() {
    let metadata = TestMetadata::new().await;
    let edit_key = metadata
        .seed_edit("Newtonsoft.Json", "13.0.1", title_edit("New"))
        .await;

    let edits = metadata.store.fetch_eligible_edits().await.unwrap();
    assert_eq!(edits.len(), 1);
    let edit = &edits[0];
    assert_eq!(edit.edit_key, edit_key);
    assert_eq!(edit.package_id, "Newtonsoft.Json");
    assert_eq!(edit.version, "13.0.1");
    assert_eq!(edit.title.as_deref(), Some("New"));
    assert_eq!(edit.description, None);
    assert_eq!(edit.tried_count, 0);
    assert!(!edit.is_completed);
}

#[tokio::test]
async fn test_fetch_excludes_completed_and_exhausted() {
    let metadata = TestMetadata::new().await;
    let eligible = metadata.seed_edit("foo", "1.0.0", title_edit("a")).await;
    metadata
        .seed_edit(
            "foo",
            "1.0.0",
            EditRequest {
                tried_count: MAX_ATTEMPTS,
                ..title_edit("exhausted")
            },
        )
        .await;
    metadata
        .seed_edit(
            "foo",
            "1.0.0",
            EditRequest {
                is_completed: true,
                ..title_edit("done")
            },
        )
        .await;
    let almost = metadata
        .seed_edit(
            "bar",
            "2.0.0",
            EditRequest {
                tried_count: MAX_ATTEMPTS - 1,
                ..title_edit("last chance")
            },
        )
        .await;

    let keys: Vec<i64> = metadata
        .store
        .fetch_eligible_edits()
        .await
        .unwrap()
        .iter()
        .map(|e| e.edit_key)
        .collect();
    assert_eq!(keys, vec![eligible, almost]);
    assert_eq!(metadata.store.count_abandoned_edits().await.unwrap(), 1);
}

#[tokio::test]
async fn test_state_transitions_touch_one_row() {
    let metadata = TestMetadata::new().await;
    let first = metadata.seed_edit("foo", "1.0.0", title_edit("a")).await;
    let second = metadata.seed_edit("foo", "1.0.0", title_edit("b")).await;

    metadata.store.mark_attempted(first).await.unwrap();
    metadata.store.mark_completed(first).await.unwrap();

    let first_row = metadata.store.get_edit(first).await.unwrap().unwrap();
    assert_eq!(first_row.tried_count, 1);
    assert!(first_row.is_completed);

    let second_row = metadata.store.get_edit(second).await.unwrap().unwrap();
    assert_eq!(second_row.tried_count, 0);
    assert!(!second_row.is_completed);
}

#[tokio::test]
async fn test_transitions_on_missing_row_are_concurrent_modification() {
    let metadata = TestMetadata::new().await;

    assert!(matches!(
        metadata.store.mark_attempted(999).await,
        Err(MetadataError::ConcurrentModification {
            edit_key: 999,
            rows_affected: 0
        })
    ));
    assert!(matches!(
        metadata.store.mark_completed(999).await,
        Err(MetadataError::ConcurrentModification { .. })
    ));
}

#[tokio::test]
async fn test_attempts_never_exceed_limit() {
    let metadata = TestMetadata::new().await;
    let edit_key = metadata.seed_edit("foo", "1.0.0", title_edit("a")).await;

    for _ in 0..MAX_ATTEMPTS {
        metadata.store.mark_attempted(edit_key).await.unwrap();
    }
    assert!(matches!(
        metadata.store.mark_attempted(edit_key).await,
        Err(MetadataError::ConcurrentModification { .. })
    ));

    let edit = metadata.store.get_edit(edit_key).await.unwrap().unwrap();
    assert_eq!(edit.tried_count, MAX_ATTEMPTS);
    assert!(metadata.store.fetch_eligible_edits().await.unwrap().is_empty());
    assert_eq!(metadata.store.count_abandoned_edits().await.unwrap(), 1);
}

#[tokio::test]
async fn test_completion_is_recorded_once() {
    let metadata = TestMetadata::new().await;
    let edit_key = metadata.seed_edit("foo", "1.0.0", title_edit("a")).await;

    metadata.store.mark_completed(edit_key).await.unwrap();
    assert!(matches!(
        metadata.store.mark_completed(edit_key).await,
        Err(MetadataError::ConcurrentModification { .. })
    ));
}

#[tokio::test]
async fn test_package_identity_is_case_insensitive() {
    let metadata = TestMetadata::new().await;
    let created = metadata
        .store
        .create_package("Foo.Bar", "1.0.0-Beta")
        .await
        .unwrap();

    let found = metadata
        .store
        .get_package("foo.bar", "1.0.0-beta")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.package_key, created.package_key);

    assert!(matches!(
        metadata.store.create_package("FOO.BAR", "1.0.0-BETA").await,
        Err(MetadataError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn test_create_edit_requires_package() {
    let metadata = TestMetadata::new().await;
    assert!(matches!(
        metadata.store.create_edit(42, &title_edit("orphan")).await,
        Err(MetadataError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_store_survives_reopen() {
    let metadata = TestMetadata::new().await;
    let edit_key = metadata.seed_edit("foo", "1.0.0", title_edit("a")).await;
    metadata.store.mark_attempted(edit_key).await.unwrap();

    let path = metadata.dir.path().join("metadata.db");
    let reopened = pkgedit_metadata::SqliteStore::new(&path, None).await.unwrap();
    let edit = reopened.get_edit(edit_key).await.unwrap().unwrap();
    assert_eq!(edit.tried_count, 1);
    assert!(!edit.is_completed);
    // Reopening re-runs migrations without disturbing rows
    assert_eq!(metadata.store().fetch_eligible_edits().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_fetch_completed_edits_for_one_package() {
    let metadata = TestMetadata::new().await;
    let second = metadata.seed_edit("Foo", "1.0.0", title_edit("b")).await;
    let pending = metadata.seed_edit("foo", "1.0.0", title_edit("c")).await;
    let other = metadata.seed_edit("foo", "2.0.0", title_edit("x")).await;
    let first = metadata
        .seed_edit(
            "foo",
            "1.0.0",
            EditRequest {
                is_completed: true,
                ..title_edit("a")
            },
        )
        .await;
    metadata.store.mark_completed(second).await.unwrap();
    metadata.store.mark_completed(other).await.unwrap();

    let keys: Vec<i64> = metadata
        .store
        .fetch_completed_edits("FOO", "1.0.0")
        .await
        .unwrap()
        .iter()
        .map(|e| e.edit_key)
        .collect();
    assert_eq!(keys, vec![second, first]);
    assert!(!keys.contains(&pending));
}
