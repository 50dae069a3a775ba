//! Authoritative in-memory geometry state for one farm.
//!
//! Every mutation applies synchronously, appends to the change log and
//! mirrors the collections to the snapshot cache. A paddock geometry edit
//! keeps its sections consistent: a rigid move drags them along unchanged,
//! anything else re-clips them against the new outline.

use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::{load_snapshot, save_snapshot, MemoryCache, Snapshot, SnapshotCache};
use crate::error::StoreError;
use crate::geometry::{
    area_hectares, area_square_meters, clip, detect_translation, translate, Polygon, Translation,
};
use crate::model::{
    ChangeKind, ChangeRecord, EntityKind, Paddock, PaddockPatch, PaddockStatus, Proposal, Section,
    SectionDraft,
};
use crate::sample::sample_paddocks;

const DEFAULT_PADDOCK_NAME: &str = "New Paddock";
const DEFAULT_NDVI: f64 = 0.35;
const DEFAULT_WATER_ACCESS: &str = "None";
const DEFAULT_SECTION_NOTE: &str = "User-defined section";
/// Relative area loss below which a re-clipped section is left untouched.
const UNCHANGED_AREA_TOLERANCE: f64 = 1e-5;

/// Collections a store starts from and returns to on reset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitialData {
    pub paddocks: Vec<Paddock>,
    #[serde(default)]
    pub sections: Vec<Section>,
}

impl InitialData {
    pub fn sample() -> Self {
        Self {
            paddocks: sample_paddocks(),
            sections: Vec::new(),
        }
    }
}

/// How a paddock geometry edit should treat the paddock's sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditKind {
    /// Move when the new outline is a rigid translation, otherwise reshape.
    #[default]
    Auto,
    /// The caller dragged the paddock; sections follow without clipping.
    Move,
    /// Sections are re-clipped against the new outline.
    Reshape,
}

/// What a paddock geometry edit did to the paddock's sections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaddockEdit {
    /// Offset applied to every section when the edit was a move.
    pub translation: Option<Translation>,
    pub updated_sections: Vec<String>,
    pub removed_sections: Vec<String>,
}

pub struct GeometryStore {
    paddocks: Vec<Paddock>,
    sections: Vec<Section>,
    log: Vec<ChangeRecord>,
    next_seq: u64,
    initial: InitialData,
    cache: Box<dyn SnapshotCache>,
}

impl std::fmt::Debug for GeometryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeometryStore")
            .field("paddocks", &self.paddocks.len())
            .field("sections", &self.sections.len())
            .field("log", &self.log.len())
            .field("next_seq", &self.next_seq)
            .finish()
    }
}

fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

/// The new outline still holds the whole section. Clipping a section that
/// shares an edge with its paddock perturbs the boundary, so the clipped
/// ring can differ from the original by far less than a millimetre.
fn still_covered(section: &Polygon, clipped: &Polygon) -> bool {
    clipped == section
        || area_square_meters(clipped) >= area_square_meters(section) * (1.0 - UNCHANGED_AREA_TOLERANCE)
}

fn today_label() -> String {
    Utc::now().format("%b %-d").to_string()
}

impl GeometryStore {
    /// Store backed by a throwaway in-memory cache. `None` starts from the
    /// built-in sample farm.
    pub fn new(initial: Option<InitialData>) -> Self {
        Self::open(initial, Box::new(MemoryCache::new()))
    }

    /// A valid cached snapshot wins over `initial`, which wins over the
    /// sample farm. `initial` (or the sample farm) is what reset returns to.
    pub fn open(initial: Option<InitialData>, cache: Box<dyn SnapshotCache>) -> Self {
        let initial = initial.unwrap_or_else(InitialData::sample);
        let (paddocks, sections) = match load_snapshot(cache.as_ref()) {
            Some(snapshot) => {
                info!(
                    paddocks = snapshot.paddocks.len(),
                    sections = snapshot.sections.len(),
                    "restored geometry from cache"
                );
                (snapshot.paddocks, snapshot.sections)
            }
            None => (initial.paddocks.clone(), initial.sections.clone()),
        };
        Self {
            paddocks,
            sections,
            log: Vec::new(),
            next_seq: 1,
            initial,
            cache,
        }
    }

    pub fn paddocks(&self) -> &[Paddock] {
        &self.paddocks
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn paddock(&self, id: &str) -> Option<&Paddock> {
        self.paddocks.iter().find(|p| p.id == id)
    }

    pub fn section(&self, id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == id)
    }

    pub fn sections_for<'a>(&'a self, paddock_id: &'a str) -> impl Iterator<Item = &'a Section> + 'a {
        self.sections.iter().filter(move |s| s.paddock_id == paddock_id)
    }

    pub fn change_log(&self) -> &[ChangeRecord] {
        &self.log
    }

    /// Unsynced records in log order.
    pub fn pending_changes(&self) -> Vec<ChangeRecord> {
        self.log.iter().filter(|r| !r.synced).cloned().collect()
    }

    pub fn has_unsynced_changes(&self) -> bool {
        self.log.iter().any(|r| !r.synced)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.paddocks.clone(), self.sections.clone())
    }

    /// Flag the records with the given sequence numbers as applied remotely.
    /// Unknown numbers (e.g. from before a reset) are ignored.
    pub fn mark_synced(&mut self, seqs: &[u64]) -> usize {
        let wanted: HashSet<u64> = seqs.iter().copied().collect();
        let mut marked = 0;
        for record in self.log.iter_mut() {
            if !record.synced && wanted.contains(&record.seq) {
                record.synced = true;
                marked += 1;
            }
        }
        marked
    }

    fn record(
        &mut self,
        entity_type: EntityKind,
        change_type: ChangeKind,
        id: &str,
        geometry: Option<Polygon>,
        parent_id: Option<String>,
        metadata: Option<PaddockPatch>,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        debug!(
            seq,
            entity = entity_type.as_str(),
            change = change_type.as_str(),
            id,
            "change recorded"
        );
        self.log.push(ChangeRecord {
            seq,
            id: id.to_string(),
            entity_type,
            change_type,
            geometry,
            parent_id,
            metadata,
            timestamp: Utc::now(),
            synced: false,
        });
    }

    fn persist(&mut self) {
        let snapshot = self.snapshot();
        save_snapshot(self.cache.as_mut(), &snapshot);
    }

    fn paddock_index(&self, id: &str) -> Result<usize, StoreError> {
        self.paddocks
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| StoreError::paddock(id))
    }

    fn section_index(&self, id: &str) -> Result<usize, StoreError> {
        self.sections
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| StoreError::section(id))
    }

    /// Add a drawn paddock. Area is computed unless `metadata` overrides it.
    pub fn add_paddock(&mut self, geometry: Polygon, metadata: Option<PaddockPatch>) -> String {
        let id = new_id("p");
        let mut paddock = Paddock {
            id: id.clone(),
            area: area_hectares(&geometry),
            geometry,
            name: DEFAULT_PADDOCK_NAME.to_string(),
            status: PaddockStatus::Recovering,
            ndvi: DEFAULT_NDVI,
            rest_days: 0,
            water_access: DEFAULT_WATER_ACCESS.to_string(),
            last_grazed: today_label(),
        };
        if let Some(patch) = metadata {
            patch.apply_to(&mut paddock);
        }
        let geometry = paddock.geometry.clone();
        let snapshot = PaddockPatch::snapshot_of(&paddock);
        self.paddocks.push(paddock);
        self.record(
            EntityKind::Paddock,
            ChangeKind::Add,
            &id,
            Some(geometry),
            None,
            Some(snapshot),
        );
        self.persist();
        id
    }

    pub fn update_paddock(&mut self, id: &str, geometry: Polygon) -> Result<PaddockEdit, StoreError> {
        self.update_paddock_with(id, geometry, EditKind::Auto)
    }

    /// Replace a paddock outline and bring its sections along.
    ///
    /// The paddock's `update` record is appended first, then one record per
    /// affected section in collection order: `update` for moved or re-clipped
    /// sections, `delete` for sections the new outline no longer covers.
    pub fn update_paddock_with(
        &mut self,
        id: &str,
        geometry: Polygon,
        kind: EditKind,
    ) -> Result<PaddockEdit, StoreError> {
        let idx = self.paddock_index(id)?;
        let previous = self.paddocks[idx].geometry.clone();

        let translation = match kind {
            EditKind::Reshape => None,
            EditKind::Auto => detect_translation(&previous, &geometry),
            EditKind::Move => Some(
                detect_translation(&previous, &geometry)
                    .or_else(|| match (previous.centroid(), geometry.centroid()) {
                        (Some(from), Some(to)) => Some(Translation::between(from, to)),
                        _ => None,
                    })
                    .unwrap_or(Translation::new(0.0, 0.0)),
            ),
        };

        {
            let paddock = &mut self.paddocks[idx];
            paddock.area = area_hectares(&geometry);
            paddock.geometry = geometry.clone();
        }
        self.record(
            EntityKind::Paddock,
            ChangeKind::Update,
            id,
            Some(geometry.clone()),
            None,
            None,
        );

        let mut edit = PaddockEdit {
            translation,
            ..Default::default()
        };
        // `None` marks a section the new outline no longer covers.
        let mut touched: Vec<(String, Option<Polygon>)> = Vec::new();
        let mut kept = Vec::with_capacity(self.sections.len());
        for mut section in std::mem::take(&mut self.sections) {
            if section.paddock_id != id {
                kept.push(section);
                continue;
            }
            match translation {
                Some(t) if t.d_lng == 0.0 && t.d_lat == 0.0 => kept.push(section),
                Some(t) => {
                    section.geometry = translate(&section.geometry, t.d_lng, t.d_lat);
                    touched.push((section.id.clone(), Some(section.geometry.clone())));
                    kept.push(section);
                }
                None => match clip(&section.geometry, &geometry) {
                    Some(clipped) if still_covered(&section.geometry, &clipped) => kept.push(section),
                    Some(clipped) => {
                        section.target_area = area_hectares(&clipped);
                        section.geometry = clipped;
                        touched.push((section.id.clone(), Some(section.geometry.clone())));
                        kept.push(section);
                    }
                    None => touched.push((section.id, None)),
                },
            }
        }
        self.sections = kept;

        for (section_id, section_geometry) in touched {
            let change = if section_geometry.is_some() {
                edit.updated_sections.push(section_id.clone());
                ChangeKind::Update
            } else {
                edit.removed_sections.push(section_id.clone());
                ChangeKind::Delete
            };
            self.record(
                EntityKind::Section,
                change,
                &section_id,
                section_geometry,
                Some(id.to_string()),
                None,
            );
        }

        info!(
            paddock = id,
            moved = edit.translation.is_some(),
            updated = edit.updated_sections.len(),
            removed = edit.removed_sections.len(),
            "paddock geometry updated"
        );
        self.persist();
        Ok(edit)
    }

    /// Patch display metadata. No change record: metadata syncs separately.
    pub fn update_paddock_metadata(&mut self, id: &str, patch: &PaddockPatch) -> Result<(), StoreError> {
        let idx = self.paddock_index(id)?;
        patch.apply_to(&mut self.paddocks[idx]);
        self.persist();
        Ok(())
    }

    /// Remove a paddock and its sections. One `delete` record is appended per
    /// section, then one for the paddock. Returns the removed section ids.
    pub fn delete_paddock(&mut self, id: &str) -> Result<Vec<String>, StoreError> {
        let idx = self.paddock_index(id)?;
        self.paddocks.remove(idx);

        let (owned, kept): (Vec<Section>, Vec<Section>) = std::mem::take(&mut self.sections)
            .into_iter()
            .partition(|s| s.paddock_id == id);
        self.sections = kept;

        let removed: Vec<String> = owned.into_iter().map(|s| s.id).collect();
        for section_id in &removed {
            self.record(
                EntityKind::Section,
                ChangeKind::Delete,
                section_id,
                None,
                Some(id.to_string()),
                None,
            );
        }
        self.record(EntityKind::Paddock, ChangeKind::Delete, id, None, None, None);
        info!(paddock = id, sections = removed.len(), "paddock deleted");
        self.persist();
        Ok(removed)
    }

    /// Add a section to an existing paddock.
    pub fn add_section(
        &mut self,
        paddock_id: &str,
        geometry: Polygon,
        draft: SectionDraft,
    ) -> Result<String, StoreError> {
        if self.paddock(paddock_id).is_none() {
            return Err(StoreError::MissingParent(paddock_id.to_string()));
        }
        let id = new_id("s");
        let section = Section {
            id: id.clone(),
            paddock_id: paddock_id.to_string(),
            date: draft.date.unwrap_or_else(|| Utc::now().date_naive()),
            target_area: draft
                .target_area
                .unwrap_or_else(|| area_hectares(&geometry)),
            day_index: draft.day_index,
            justification: draft
                .justification
                .unwrap_or_else(|| vec![DEFAULT_SECTION_NOTE.to_string()]),
            confidence: draft.confidence,
            avg_ndvi: draft.avg_ndvi,
            geometry: geometry.clone(),
        };
        self.sections.push(section);
        self.record(
            EntityKind::Section,
            ChangeKind::Add,
            &id,
            Some(geometry),
            Some(paddock_id.to_string()),
            None,
        );
        self.persist();
        Ok(id)
    }

    /// Replace a section outline; its target area is recomputed.
    pub fn update_section(&mut self, id: &str, geometry: Polygon) -> Result<(), StoreError> {
        let idx = self.section_index(id)?;
        let section = &mut self.sections[idx];
        section.target_area = area_hectares(&geometry);
        section.geometry = geometry.clone();
        let parent = section.paddock_id.clone();
        self.record(
            EntityKind::Section,
            ChangeKind::Update,
            id,
            Some(geometry),
            Some(parent),
            None,
        );
        self.persist();
        Ok(())
    }

    pub fn delete_section(&mut self, id: &str) -> Result<(), StoreError> {
        let idx = self.section_index(id)?;
        let section = self.sections.remove(idx);
        self.record(
            EntityKind::Section,
            ChangeKind::Delete,
            id,
            None,
            Some(section.paddock_id),
            None,
        );
        self.persist();
        Ok(())
    }

    /// Store a recommendation as an ordinary section. Only the geometry's
    /// well-formedness is checked.
    pub fn apply_proposal(&mut self, proposal: Proposal) -> Result<String, StoreError> {
        proposal.geometry.validate()?;
        let draft = SectionDraft {
            date: proposal.date,
            target_area: Some(proposal.target_area),
            day_index: None,
            justification: Some(proposal.justification),
            confidence: Some(proposal.confidence),
            avg_ndvi: proposal.avg_ndvi,
        };
        self.add_section(&proposal.paddock_id, proposal.geometry, draft)
    }

    /// Queue `add` records for every paddock and section currently held, so
    /// a backend that missed earlier batches (or was never seeded) converges
    /// on the local state. Adapters apply adds as upserts.
    pub fn enqueue_resync(&mut self) -> usize {
        let paddocks: Vec<(String, Polygon, PaddockPatch)> = self
            .paddocks
            .iter()
            .map(|p| (p.id.clone(), p.geometry.clone(), PaddockPatch::snapshot_of(p)))
            .collect();
        let sections: Vec<(String, Polygon, String)> = self
            .sections
            .iter()
            .map(|s| (s.id.clone(), s.geometry.clone(), s.paddock_id.clone()))
            .collect();
        let count = paddocks.len() + sections.len();
        for (id, geometry, metadata) in paddocks {
            self.record(
                EntityKind::Paddock,
                ChangeKind::Add,
                &id,
                Some(geometry),
                None,
                Some(metadata),
            );
        }
        for (id, geometry, parent) in sections {
            self.record(
                EntityKind::Section,
                ChangeKind::Add,
                &id,
                Some(geometry),
                Some(parent),
                None,
            );
        }
        count
    }

    /// Replace what [`GeometryStore::reset_to_initial`] returns to.
    pub fn set_initial(&mut self, initial: InitialData) {
        self.initial = initial;
    }

    /// Discard local edits and the change log, and clear the cache. Sequence
    /// numbers keep counting so in-flight flushes cannot mark new records.
    pub fn reset_to_initial(&mut self) {
        self.paddocks = self.initial.paddocks.clone();
        self.sections = self.initial.sections.clone();
        self.log.clear();
        self.cache.clear();
        info!(paddocks = self.paddocks.len(), "geometry reset to initial data");
    }
}
