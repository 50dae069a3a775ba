//! Spatial state and sync engine for paddock grazing plans.
//!
//! [`store::GeometryStore`] owns one farm's paddocks and daily sections and
//! keeps sections consistent with paddock edits; [`sync::SyncPipeline`]
//! replays the store's change log against a [`adapter::PersistenceAdapter`].

pub mod adapter;
pub mod cache;
pub mod config;
pub mod error;
pub mod generator;
pub mod geometry;
pub mod model;
pub mod sample;
pub mod store;
pub mod sync;

pub use error::{StoreError, SyncError};
pub use geometry::{Polygon, Position};
pub use store::{EditKind, GeometryStore, InitialData};
pub use sync::{SharedStore, SyncPipeline};
