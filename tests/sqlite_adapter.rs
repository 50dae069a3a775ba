use chrono::Utc;
use std::sync::Arc;

use paddock_sync::adapter::{PersistenceAdapter, SqliteAdapter};
use paddock_sync::geometry::Polygon;
use paddock_sync::model::{ChangeKind, ChangeRecord, EntityKind, PaddockPatch, PaddockStatus, SectionDraft};
use paddock_sync::sync::{self, SyncPipeline};
use paddock_sync::{GeometryStore, InitialData};

async fn setup_adapter(dir: &tempfile::TempDir) -> SqliteAdapter {
    let url = format!("sqlite://{}", dir.path().join("remote.db").display());
    SqliteAdapter::connect(&url).await.unwrap()
}

fn square(min_lng: f64, side: f64) -> Polygon {
    Polygon::rectangle(min_lng, -43.5, min_lng + side, -43.5 + side)
}

fn change(
    seq: u64,
    id: &str,
    entity_type: EntityKind,
    change_type: ChangeKind,
    geometry: Option<Polygon>,
    parent_id: Option<&str>,
) -> ChangeRecord {
    ChangeRecord {
        seq,
        id: id.into(),
        entity_type,
        change_type,
        geometry,
        parent_id: parent_id.map(Into::into),
        metadata: None,
        timestamp: Utc::now(),
        synced: false,
    }
}

#[tokio::test]
async fn batch_applies_in_log_order() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = setup_adapter(&dir).await;
    let first = square(172.6, 0.004);
    let second = square(172.7, 0.002);

    let batch = vec![
        change(1, "p", EntityKind::Paddock, ChangeKind::Add, Some(first), None),
        change(2, "p", EntityKind::Paddock, ChangeKind::Delete, None, None),
        change(3, "p", EntityKind::Paddock, ChangeKind::Add, Some(second.clone()), None),
    ];
    adapter.apply_changes("farm-a", &batch).await.unwrap();

    let stored = adapter.paddocks("farm-a").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].geometry, second);
    assert_eq!(adapter.applied_count("farm-a").await.unwrap(), 3);
}

#[tokio::test]
async fn failed_batch_leaves_remote_state_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = setup_adapter(&dir).await;

    let batch = vec![
        change(1, "p", EntityKind::Paddock, ChangeKind::Add, Some(square(172.6, 0.004)), None),
        // A section without its parent id cannot be stored.
        change(2, "s", EntityKind::Section, ChangeKind::Add, Some(square(172.601, 0.001)), None),
    ];
    assert!(adapter.apply_changes("farm-a", &batch).await.is_err());

    assert!(adapter.paddocks("farm-a").await.unwrap().is_empty());
    assert!(adapter.sections("farm-a").await.unwrap().is_empty());
    assert_eq!(adapter.applied_count("farm-a").await.unwrap(), 0);

    // The valid prefix goes through once the batch is fixed.
    adapter.apply_changes("farm-a", &batch[..1]).await.unwrap();
    assert_eq!(adapter.paddocks("farm-a").await.unwrap().len(), 1);
}

#[tokio::test]
async fn replayed_batch_leaves_the_same_state() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = setup_adapter(&dir).await;

    let mut store = GeometryStore::new(Some(InitialData::default()));
    let meta = PaddockPatch {
        name: Some("Back Block".into()),
        ..Default::default()
    };
    let pid = store.add_paddock(square(172.6, 0.004), Some(meta));
    let sid = store
        .add_section(&pid, square(172.601, 0.001), SectionDraft::default())
        .unwrap();
    let batch = store.pending_changes();

    adapter.apply_changes("farm-a", &batch).await.unwrap();
    let paddocks = adapter.paddocks("farm-a").await.unwrap();
    let sections = adapter.sections("farm-a").await.unwrap();

    adapter.apply_changes("farm-a", &batch).await.unwrap();
    assert_eq!(adapter.paddocks("farm-a").await.unwrap(), paddocks);
    assert_eq!(adapter.sections("farm-a").await.unwrap(), sections);
    assert_eq!(adapter.applied_count("farm-a").await.unwrap(), 2);

    assert_eq!(paddocks.len(), 1);
    assert_eq!(paddocks[0].id, pid);
    assert_eq!(paddocks[0].name.as_deref(), Some("Back Block"));
    assert_eq!(paddocks[0].geometry, square(172.6, 0.004));
    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0].id, sid);
    assert_eq!(sections[0].paddock_id, pid);
}

#[tokio::test]
async fn pipeline_flush_tracks_store_edits() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = Arc::new(setup_adapter(&dir).await);
    let store = sync::shared(GeometryStore::new(Some(InitialData::default())));
    let pipeline = SyncPipeline::new(adapter.clone(), "farm-a");

    let pid = {
        let mut guard = sync::lock(&store);
        let pid = guard.add_paddock(square(172.6, 0.004), None);
        guard
            .add_section(&pid, square(172.601, 0.001), SectionDraft::default())
            .unwrap();
        pid
    };
    pipeline.flush(&store).await.unwrap();
    assert_eq!(adapter.sections("farm-a").await.unwrap().len(), 1);

    let moved = square(172.61, 0.004);
    sync::lock(&store).update_paddock(&pid, moved.clone()).unwrap();
    pipeline.flush(&store).await.unwrap();
    let stored = adapter.paddocks("farm-a").await.unwrap();
    assert_eq!(stored[0].geometry, moved);
    let local_section = sync::lock(&store).sections()[0].geometry.clone();
    assert_eq!(adapter.sections("farm-a").await.unwrap()[0].geometry, local_section);

    sync::lock(&store).delete_paddock(&pid).unwrap();
    pipeline.flush(&store).await.unwrap();
    assert!(adapter.paddocks("farm-a").await.unwrap().is_empty());
    assert!(adapter.sections("farm-a").await.unwrap().is_empty());
}

#[tokio::test]
async fn resync_seeds_an_empty_backend() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = Arc::new(setup_adapter(&dir).await);
    // The sample farm is loaded without any change records.
    let store = sync::shared(GeometryStore::new(None));
    let pipeline = SyncPipeline::new(adapter.clone(), "demo");

    let queued = sync::lock(&store).enqueue_resync();
    let expected = sync::lock(&store).paddocks().len();
    assert_eq!(queued, expected);

    pipeline.flush(&store).await.unwrap();
    assert_eq!(adapter.paddocks("demo").await.unwrap().len(), expected);

    // A second resync upserts over the same rows.
    sync::lock(&store).enqueue_resync();
    pipeline.flush(&store).await.unwrap();
    assert_eq!(adapter.paddocks("demo").await.unwrap().len(), expected);
}

#[tokio::test]
async fn metadata_updates_existing_rows_only() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = setup_adapter(&dir).await;
    let mut store = GeometryStore::new(Some(InitialData::default()));
    let pid = store.add_paddock(square(172.6, 0.004), None);
    adapter
        .apply_changes("farm-a", &store.pending_changes())
        .await
        .unwrap();

    let patch = PaddockPatch {
        status: Some(PaddockStatus::Grazed),
        ..Default::default()
    };
    adapter.update_metadata("farm-a", &pid, &patch).await.unwrap();
    let stored = adapter.paddocks("farm-a").await.unwrap();
    assert_eq!(stored[0].status.as_deref(), Some("grazed"));
    assert_eq!(stored[0].name.as_deref(), Some("New Paddock"));

    assert!(adapter.update_metadata("farm-a", "p-missing", &patch).await.is_err());
    // Rows are scoped per farm.
    assert!(adapter.update_metadata("farm-b", &pid, &patch).await.is_err());
    assert!(adapter.paddocks("farm-b").await.unwrap().is_empty());
}
