use paddock_sync::cache::FileCache;
use paddock_sync::generator::{generate_section, SectionRequest};
use paddock_sync::geometry::area::area_square_meters;
use paddock_sync::geometry::transform::translate;
use paddock_sync::geometry::Polygon;
use paddock_sync::model::{ChangeKind, EntityKind, PaddockPatch, SectionDraft};
use paddock_sync::{GeometryStore, InitialData};

// Roughly 10 ha at the equator.
const SIDE: f64 = 0.00284;

fn empty_store() -> GeometryStore {
    GeometryStore::new(Some(InitialData::default()))
}

fn ten_hectares() -> Polygon {
    Polygon::rectangle(0.0, 0.0, SIDE, SIDE)
}

fn centroid(store: &GeometryStore, section_id: &str) -> [f64; 2] {
    store
        .section(section_id)
        .and_then(|s| s.geometry.centroid())
        .unwrap()
}

#[test]
fn sections_follow_a_moved_paddock_and_shrink_with_a_reshape() {
    let mut store = empty_store();
    let pid = store.add_paddock(ten_hectares(), None);

    // A band across the full width of the paddock.
    let band = Polygon::rectangle(0.0, 0.0010, SIDE, 0.0015);
    let s1 = store
        .add_section(&pid, band, SectionDraft::default())
        .unwrap();
    let before = centroid(&store, &s1);
    let area_before = area_square_meters(&store.section(&s1).unwrap().geometry);

    let moved = translate(&store.paddock(&pid).unwrap().geometry, 0.001, -0.0005);
    let edit = store.update_paddock(&pid, moved.clone()).unwrap();
    assert!(edit.translation.is_some());
    assert_eq!(edit.updated_sections, vec![s1.clone()]);

    let after = centroid(&store, &s1);
    assert!((after[0] - before[0] - 0.001).abs() < 1e-9);
    assert!((after[1] - before[1] + 0.0005).abs() < 1e-9);
    let area_moved = area_square_meters(&store.section(&s1).unwrap().geometry);
    assert!((area_moved - area_before).abs() < 1_000.0, "area drifted by more than 0.1 ha");

    // Halve the width: the new outline is not a translation, so sections are clipped.
    let b = moved.bounds().unwrap();
    let halved = Polygon::rectangle(b.min_lng, b.min_lat, b.min_lng + SIDE / 2.0, b.max_lat);
    let edit = store.update_paddock(&pid, halved).unwrap();
    assert!(edit.translation.is_none());
    match store.section(&s1) {
        Some(section) => {
            let area = area_square_meters(&section.geometry);
            assert!(area <= area_before * 0.5 + 1.0, "{area} > half of {area_before}");
        }
        None => assert_eq!(edit.removed_sections, vec![s1.clone()]),
    }

    let log: Vec<_> = store
        .change_log()
        .iter()
        .map(|r| (r.entity_type, r.change_type))
        .collect();
    assert_eq!(
        log,
        vec![
            (EntityKind::Paddock, ChangeKind::Add),
            (EntityKind::Section, ChangeKind::Add),
            (EntityKind::Paddock, ChangeKind::Update),
            (EntityKind::Section, ChangeKind::Update),
            (EntityKind::Paddock, ChangeKind::Update),
            (EntityKind::Section, ChangeKind::Update),
        ]
    );
}

#[test]
fn reshape_that_leaves_a_section_outside_deletes_it() {
    let mut store = empty_store();
    let pid = store.add_paddock(ten_hectares(), None);
    let east = Polygon::rectangle(SIDE * 0.75, 0.0, SIDE, SIDE);
    let sid = store.add_section(&pid, east, SectionDraft::default()).unwrap();

    let west_half = Polygon::rectangle(0.0, 0.0, SIDE / 2.0, SIDE);
    let edit = store.update_paddock(&pid, west_half).unwrap();

    assert_eq!(edit.removed_sections, vec![sid.clone()]);
    assert!(store.section(&sid).is_none());
    let last = store.change_log().last().unwrap();
    assert_eq!((last.entity_type, last.change_type), (EntityKind::Section, ChangeKind::Delete));
    assert_eq!(last.id, sid);
}

#[test]
fn generated_section_is_stored_inside_its_paddock() {
    let mut store = empty_store();
    let pid = store.add_paddock(ten_hectares(), None);
    let paddock = store.paddock(&pid).unwrap().clone();

    let (geometry, draft) = generate_section(&SectionRequest::new(&paddock, 0, 7)).into_draft();
    let sid = store.add_section(&pid, geometry, draft).unwrap();

    let section = store.section(&sid).unwrap();
    assert_eq!(section.day_index, Some(0));
    let outer = paddock.geometry.bounds().unwrap();
    let inner = section.geometry.bounds().unwrap();
    assert!(inner.min_lng >= outer.min_lng - 1e-12 && inner.max_lng <= outer.max_lng + 1e-12);
    assert!(inner.min_lat >= outer.min_lat - 1e-12 && inner.max_lat <= outer.max_lat + 1e-12);
}

#[test]
fn edits_survive_a_restart_through_the_file_cache() {
    let dir = tempfile::tempdir().unwrap();
    let pid = {
        let mut store = GeometryStore::open(
            Some(InitialData::default()),
            Box::new(FileCache::in_dir(dir.path())),
        );
        let meta = PaddockPatch {
            name: Some("Creek Flat".into()),
            ..Default::default()
        };
        store.add_paddock(ten_hectares(), Some(meta))
    };

    let store = GeometryStore::open(
        Some(InitialData::default()),
        Box::new(FileCache::in_dir(dir.path())),
    );
    let paddock = store.paddock(&pid).unwrap();
    assert_eq!(paddock.name, "Creek Flat");
    assert_eq!(paddock.geometry, ten_hectares());
    // The change log is not part of the snapshot.
    assert!(store.change_log().is_empty());
}

#[test]
fn reset_discards_edits_and_cached_state() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = GeometryStore::open(None, Box::new(FileCache::in_dir(dir.path())));
    let sample_count = store.paddocks().len();
    let pid = store.add_paddock(ten_hectares(), None);
    assert_eq!(store.paddocks().len(), sample_count + 1);

    store.reset_to_initial();
    assert_eq!(store.paddocks().len(), sample_count);
    assert!(store.paddock(&pid).is_none());
    assert!(!store.has_unsynced_changes());

    let reopened = GeometryStore::open(None, Box::new(FileCache::in_dir(dir.path())));
    assert_eq!(reopened.paddocks().len(), sample_count);
}
