//! Persistence backends the sync pipeline flushes to.

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{ChangeRecord, PaddockPatch};

pub mod http;
pub mod sqlite;

pub use http::HttpAdapter;
pub use sqlite::SqliteAdapter;

/// Remote store for geometry changes and paddock metadata.
///
/// `apply_changes` receives records in log order and must apply them in that
/// order. It has to be idempotent per `(id, change_type)`: replaying a batch
/// that was already applied leaves the remote state as it was. A failed call
/// must leave the remote state untouched.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn apply_changes(&self, farm_id: &str, changes: &[ChangeRecord]) -> Result<()>;

    async fn update_metadata(
        &self,
        farm_id: &str,
        paddock_id: &str,
        fields: &PaddockPatch,
    ) -> Result<()>;
}
