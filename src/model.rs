use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::geometry::{Polygon, Position};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaddockStatus {
    Ready,
    AlmostReady,
    Recovering,
    Grazed,
}

impl PaddockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaddockStatus::Ready => "ready",
            PaddockStatus::AlmostReady => "almost_ready",
            PaddockStatus::Recovering => "recovering",
            PaddockStatus::Grazed => "grazed",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "ready" => Some(PaddockStatus::Ready),
            "almost_ready" => Some(PaddockStatus::AlmostReady),
            "recovering" => Some(PaddockStatus::Recovering),
            "grazed" => Some(PaddockStatus::Grazed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Paddock,
    Section,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Paddock => "paddock",
            EntityKind::Section => "section",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Add,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Add => "add",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

/// A fenced grazing area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paddock {
    pub id: String,
    pub geometry: Polygon,
    pub name: String,
    pub status: PaddockStatus,
    /// Vegetation index (NDVI), 0.0..=1.0.
    pub ndvi: f64,
    pub rest_days: u32,
    /// Hectares, one decimal.
    pub area: f64,
    pub water_access: String,
    pub last_grazed: String,
}

/// Partial paddock metadata. Used both as overrides when a paddock is drawn
/// and as a non-geometric patch afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaddockPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PaddockStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ndvi: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub water_access: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_grazed: Option<String>,
}

impl PaddockPatch {
    pub fn is_empty(&self) -> bool {
        *self == PaddockPatch::default()
    }

    pub fn apply_to(&self, paddock: &mut Paddock) {
        if let Some(name) = &self.name {
            paddock.name = name.clone();
        }
        if let Some(status) = self.status {
            paddock.status = status;
        }
        if let Some(ndvi) = self.ndvi {
            paddock.ndvi = ndvi;
        }
        if let Some(rest_days) = self.rest_days {
            paddock.rest_days = rest_days;
        }
        if let Some(area) = self.area {
            paddock.area = area;
        }
        if let Some(water_access) = &self.water_access {
            paddock.water_access = water_access.clone();
        }
        if let Some(last_grazed) = &self.last_grazed {
            paddock.last_grazed = last_grazed.clone();
        }
    }

    /// Full metadata snapshot of a paddock, sent along with its `add` record.
    pub fn snapshot_of(paddock: &Paddock) -> Self {
        PaddockPatch {
            name: Some(paddock.name.clone()),
            status: Some(paddock.status),
            ndvi: Some(paddock.ndvi),
            rest_days: Some(paddock.rest_days),
            area: Some(paddock.area),
            water_access: Some(paddock.water_access.clone()),
            last_grazed: Some(paddock.last_grazed.clone()),
        }
    }
}

/// One day's grazing allocation inside a paddock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub paddock_id: String,
    pub geometry: Polygon,
    pub date: NaiveDate,
    /// Hectares; derived from the geometry unless overridden.
    pub target_area: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_index: Option<u32>,
    #[serde(default)]
    pub justification: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_ndvi: Option<f64>,
}

/// Optional section fields supplied when a section is added.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionDraft {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub target_area: Option<f64>,
    #[serde(default)]
    pub day_index: Option<u32>,
    #[serde(default)]
    pub justification: Option<Vec<String>>,
    #[serde(default)]
    pub confidence: Option<u8>,
    #[serde(default)]
    pub avg_ndvi: Option<f64>,
}

/// A section placement proposed by the recommendation pipeline. Only its
/// geometric well-formedness is checked before it becomes a section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub paddock_id: String,
    pub geometry: Polygon,
    pub target_area: f64,
    #[serde(default)]
    pub centroid: Option<Position>,
    #[serde(default)]
    pub avg_ndvi: Option<f64>,
    #[serde(default)]
    pub justification: Vec<String>,
    pub confidence: u8,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

/// One logged mutation awaiting (or confirmed by) the persistence backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// Monotonic position in the log; never reused within a store.
    pub seq: u64,
    /// Id of the affected paddock or section.
    pub id: String,
    pub entity_type: EntityKind,
    pub change_type: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Polygon>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PaddockPatch>,
    pub timestamp: DateTime<Utc>,
    pub synced: bool,
}
