use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;

use paddock_sync::adapter::PersistenceAdapter;
use paddock_sync::geometry::Polygon;
use paddock_sync::model::{ChangeRecord, PaddockPatch, SectionDraft};
use paddock_sync::sync::{self, SharedStore, SyncPipeline};
use paddock_sync::{GeometryStore, InitialData, SyncError};

#[derive(Clone, Default)]
struct RecordingAdapter {
    batches: Arc<Mutex<Vec<Vec<u64>>>>,
    metadata: Arc<Mutex<Vec<(String, PaddockPatch)>>>,
    failing: Arc<AtomicBool>,
    delay: Option<Duration>,
}

impl RecordingAdapter {
    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    fn fail(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }

    async fn batches(&self) -> Vec<Vec<u64>> {
        self.batches.lock().await.clone()
    }
}

#[async_trait]
impl PersistenceAdapter for RecordingAdapter {
    async fn apply_changes(&self, _farm_id: &str, changes: &[ChangeRecord]) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("backend unavailable"));
        }
        self.batches
            .lock()
            .await
            .push(changes.iter().map(|r| r.seq).collect());
        Ok(())
    }

    async fn update_metadata(&self, _farm_id: &str, paddock_id: &str, fields: &PaddockPatch) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("backend unavailable"));
        }
        self.metadata
            .lock()
            .await
            .push((paddock_id.to_string(), fields.clone()));
        Ok(())
    }
}

fn square(min_lng: f64, side: f64) -> Polygon {
    Polygon::rectangle(min_lng, 0.0, min_lng + side, side)
}

fn store_with_paddock() -> (SharedStore, String) {
    let mut store = GeometryStore::new(Some(InitialData::default()));
    let pid = store.add_paddock(square(0.0, 0.01), None);
    (sync::shared(store), pid)
}

#[tokio::test]
async fn successful_flush_marks_exactly_the_sent_records() {
    let (store, pid) = store_with_paddock();
    sync::lock(&store)
        .add_section(&pid, square(0.001, 0.002), SectionDraft::default())
        .unwrap();
    let adapter = RecordingAdapter::default();
    let pipeline = SyncPipeline::new(Arc::new(adapter.clone()), "farm-a");

    let report = pipeline.flush(&store).await.unwrap();
    assert_eq!(report.sent, 2);
    assert_eq!(report.pending, 0);
    assert_eq!(adapter.batches().await, vec![vec![1, 2]]);
    assert!(!sync::lock(&store).has_unsynced_changes());

    // Nothing left to send.
    let report = pipeline.flush(&store).await.unwrap();
    assert_eq!(report.sent, 0);
    assert_eq!(adapter.batches().await.len(), 1);
}

#[tokio::test]
async fn failed_flush_is_retried_with_the_same_records() {
    let (store, _) = store_with_paddock();
    let adapter = RecordingAdapter::default();
    let pipeline = SyncPipeline::new(Arc::new(adapter.clone()), "farm-a");

    adapter.fail(true);
    let err = pipeline.flush(&store).await.unwrap_err();
    assert!(matches!(err, SyncError::Adapter(_)));
    assert_eq!(sync::lock(&store).pending_changes().len(), 1);

    adapter.fail(false);
    let report = pipeline.flush(&store).await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(adapter.batches().await, vec![vec![1]]);
}

#[tokio::test]
async fn overlapping_flushes_never_send_a_record_twice() {
    let (store, pid) = store_with_paddock();
    let adapter = RecordingAdapter::slow(Duration::from_millis(60));
    let pipeline = SyncPipeline::new(Arc::new(adapter.clone()), "farm-a");

    let first = pipeline.flush(&store);
    let second = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        sync::lock(&store)
            .add_section(&pid, square(0.001, 0.002), SectionDraft::default())
            .unwrap();
        pipeline.flush(&store).await
    };
    let (first, second) = tokio::join!(first, second);

    let first = first.unwrap();
    assert_eq!(first.sent, 1);
    // The section was recorded while the first batch was in flight.
    assert_eq!(first.pending, 1);
    assert_eq!(second.unwrap().sent, 1);

    let batches = adapter.batches().await;
    assert_eq!(batches, vec![vec![1], vec![2]]);
    let mut seen = HashSet::new();
    assert!(batches.iter().flatten().all(|seq| seen.insert(*seq)));
    assert!(!sync::lock(&store).has_unsynced_changes());
}

#[tokio::test]
async fn timed_out_flush_keeps_records_pending() {
    let (store, _) = store_with_paddock();
    let adapter = RecordingAdapter::slow(Duration::from_millis(300));
    let pipeline =
        SyncPipeline::new(Arc::new(adapter.clone()), "farm-a").with_timeout(Duration::from_millis(20));

    let err = pipeline.flush(&store).await.unwrap_err();
    assert!(matches!(err, SyncError::Timeout(d) if d == Duration::from_millis(20)));
    assert_eq!(sync::lock(&store).pending_changes().len(), 1);
    assert!(adapter.batches().await.is_empty());
}

#[tokio::test]
async fn reset_while_in_flight_does_not_mark_new_records() {
    let (store, _) = store_with_paddock();
    let adapter = RecordingAdapter::slow(Duration::from_millis(40));
    let pipeline = SyncPipeline::new(Arc::new(adapter.clone()), "farm-a");

    let flush = pipeline.flush(&store);
    let edit = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut guard = sync::lock(&store);
        guard.reset_to_initial();
        guard.add_paddock(square(1.0, 0.01), None);
    };
    let (report, ()) = tokio::join!(flush, edit);

    assert_eq!(report.unwrap().sent, 0);
    let pending = sync::lock(&store).pending_changes();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].seq, 2);
}

#[tokio::test]
async fn metadata_push_bypasses_the_change_log() {
    let (store, pid) = store_with_paddock();
    let adapter = RecordingAdapter::default();
    let pipeline = SyncPipeline::new(Arc::new(adapter.clone()), "farm-a");

    let patch = PaddockPatch {
        rest_days: Some(21),
        ..Default::default()
    };
    sync::lock(&store).update_paddock_metadata(&pid, &patch).unwrap();
    pipeline.push_metadata(&pid, &patch).await.unwrap();

    assert_eq!(sync::lock(&store).change_log().len(), 1);
    let pushed = adapter.metadata.lock().await.clone();
    assert_eq!(pushed, vec![(pid.clone(), patch)]);
}
