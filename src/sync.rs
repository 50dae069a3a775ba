//! Flushing the change log to a persistence backend.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, instrument, warn};

use crate::adapter::PersistenceAdapter;
use crate::error::SyncError;
use crate::model::PaddockPatch;
use crate::store::GeometryStore;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Single-writer handle to a store shared between threads and the pipeline.
pub type SharedStore = Arc<Mutex<GeometryStore>>;

pub fn shared(store: GeometryStore) -> SharedStore {
    Arc::new(Mutex::new(store))
}

/// Lock the store, recovering the guard if a previous holder panicked.
pub fn lock(store: &SharedStore) -> MutexGuard<'_, GeometryStore> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushReport {
    /// Records confirmed by the backend in this flush.
    pub sent: usize,
    /// Records still pending afterwards (e.g. appended while in flight).
    pub pending: usize,
}

/// Sends pending change records as one batch per flush.
///
/// Flushes are serialized through a FIFO gate: a second caller waits for the
/// first to finish and then sends only what is still pending, so the backend
/// never sees the same record twice from overlapping flushes.
pub struct SyncPipeline {
    adapter: Arc<dyn PersistenceAdapter>,
    farm_id: String,
    timeout: Duration,
    gate: AsyncMutex<()>,
}

impl SyncPipeline {
    pub fn new(adapter: Arc<dyn PersistenceAdapter>, farm_id: impl Into<String>) -> Self {
        Self {
            adapter,
            farm_id: farm_id.into(),
            timeout: DEFAULT_TIMEOUT,
            gate: AsyncMutex::new(()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn farm_id(&self) -> &str {
        &self.farm_id
    }

    /// Send every unsynced record. On success exactly the sent records are
    /// marked synced; on failure or timeout nothing is, and the error is
    /// returned for the caller to retry later.
    #[instrument(skip_all, fields(farm_id = %self.farm_id))]
    pub async fn flush(&self, store: &SharedStore) -> Result<FlushReport, SyncError> {
        let _turn = self.gate.lock().await;

        let batch = lock(store).pending_changes();
        if batch.is_empty() {
            return Ok(FlushReport::default());
        }
        let seqs: Vec<u64> = batch.iter().map(|r| r.seq).collect();
        let (first, last) = (seqs[0], seqs[seqs.len() - 1]);

        let sent = tokio::time::timeout(self.timeout, self.adapter.apply_changes(&self.farm_id, &batch)).await;
        match sent {
            Ok(Ok(())) => {
                let mut guard = lock(store);
                let marked = guard.mark_synced(&seqs);
                let pending = guard.pending_changes().len();
                info!(sent = marked, first, last, pending, "change batch flushed");
                Ok(FlushReport {
                    sent: marked,
                    pending,
                })
            }
            Ok(Err(err)) => {
                warn!(?err, count = seqs.len(), first, last, "change batch rejected; kept pending");
                Err(SyncError::Adapter(err))
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, count = seqs.len(), first, last, "change batch timed out; kept pending");
                Err(SyncError::Timeout(self.timeout))
            }
        }
    }

    /// Forward a metadata patch. Independent of the change log.
    #[instrument(skip_all, fields(farm_id = %self.farm_id, paddock_id = %paddock_id))]
    pub async fn push_metadata(&self, paddock_id: &str, fields: &PaddockPatch) -> Result<(), SyncError> {
        let res = tokio::time::timeout(
            self.timeout,
            self.adapter.update_metadata(&self.farm_id, paddock_id, fields),
        )
        .await;
        match res {
            Ok(Ok(())) => {
                info!("metadata pushed");
                Ok(())
            }
            Ok(Err(err)) => {
                warn!(?err, "metadata push failed");
                Err(SyncError::Adapter(err))
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "metadata push timed out");
                Err(SyncError::Timeout(self.timeout))
            }
        }
    }
}
