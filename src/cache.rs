//! Local durability mirror of the store's collections.
//!
//! The cache is never a source of truth while a store is live: it is written
//! after every mutation and only read when a store is constructed. Anything
//! unreadable (missing, unparsable, other version) counts as "no cache".

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::model::{Paddock, Section};

pub const SNAPSHOT_VERSION: u32 = 1;
pub const SNAPSHOT_KEY: &str = "paddock-sync.geometry.v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub paddocks: Vec<Paddock>,
    pub sections: Vec<Section>,
}

impl Snapshot {
    pub fn new(paddocks: Vec<Paddock>, sections: Vec<Section>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            paddocks,
            sections,
        }
    }
}

/// Storage for the single versioned snapshot blob.
pub trait SnapshotCache: Send {
    fn read(&self) -> Option<String>;
    fn write(&mut self, blob: &str) -> io::Result<()>;
    fn clear(&mut self);
}

/// Decode the cached snapshot; any failure is logged and reported as absent.
pub fn load_snapshot(cache: &dyn SnapshotCache) -> Option<Snapshot> {
    let raw = cache.read()?;
    let value: Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(err) => {
            debug!(%err, "cached snapshot is not valid JSON; ignoring");
            return None;
        }
    };
    let version = value.get("version").and_then(Value::as_u64);
    if version != Some(u64::from(SNAPSHOT_VERSION)) {
        debug!(?version, expected = SNAPSHOT_VERSION, "cached snapshot version mismatch; ignoring");
        return None;
    }
    match serde_json::from_value::<Snapshot>(value) {
        Ok(snapshot) => Some(snapshot),
        Err(err) => {
            debug!(%err, "cached snapshot has unexpected shape; ignoring");
            None
        }
    }
}

/// Mirror a snapshot into the cache. Failures are logged, never returned.
pub fn save_snapshot(cache: &mut dyn SnapshotCache, snapshot: &Snapshot) {
    let blob = match serde_json::to_string(snapshot) {
        Ok(blob) => blob,
        Err(err) => {
            warn!(%err, "failed to encode geometry snapshot");
            return;
        }
    };
    if let Err(err) = cache.write(&blob) {
        warn!(%err, "failed to write geometry snapshot");
    }
}

/// Snapshot stored as `<dir>/<SNAPSHOT_KEY>.json`.
#[derive(Debug, Clone)]
pub struct FileCache {
    path: PathBuf,
}

impl FileCache {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{SNAPSHOT_KEY}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotCache for FileCache {
    fn read(&self) -> Option<String> {
        fs::read_to_string(&self.path).ok()
    }

    fn write(&mut self, blob: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        // Write-then-rename: readers never observe a partial blob.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, blob)?;
        fs::rename(&tmp, &self.path)
    }

    fn clear(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(%err, path = %self.path.display(), "failed to clear snapshot"),
        }
    }
}

/// In-process cache. Clones share the same slot, so a test can keep a handle
/// and inspect what the store wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    slot: Arc<Mutex<Option<String>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob(blob: impl Into<String>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(blob.into()))),
        }
    }
}

impl SnapshotCache for MemoryCache {
    fn read(&self) -> Option<String> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn write(&mut self, blob: &str) -> io::Result<()> {
        *self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(blob.to_string());
        Ok(())
    }

    fn clear(&mut self) {
        *self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }
}
