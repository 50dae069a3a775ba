use std::time::Duration;

use thiserror::Error;

use crate::geometry::GeometryError;
use crate::model::EntityKind;

/// Failures of store mutations that target entities or carry geometry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("{} {id} not found", kind.as_str())]
    NotFound { kind: EntityKind, id: String },
    #[error("section refers to unknown paddock {0}")]
    MissingParent(String),
    #[error("malformed geometry: {0}")]
    MalformedGeometry(#[from] GeometryError),
}

impl StoreError {
    pub(crate) fn paddock(id: &str) -> Self {
        StoreError::NotFound {
            kind: EntityKind::Paddock,
            id: id.to_string(),
        }
    }

    pub(crate) fn section(id: &str) -> Self {
        StoreError::NotFound {
            kind: EntityKind::Section,
            id: id.to_string(),
        }
    }
}

/// A flush or metadata push that did not reach the persistence backend.
/// Pending records stay pending; retrying is always safe.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("persistence adapter failed: {0:#}")]
    Adapter(anyhow::Error),
    #[error("persistence adapter timed out after {0:?}")]
    Timeout(Duration),
}
