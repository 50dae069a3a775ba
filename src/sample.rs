//! Built-in demonstration farm used when no cached or supplied state exists.

use once_cell::sync::Lazy;

use crate::geometry::{area_hectares, Polygon};
use crate::model::{Paddock, PaddockStatus};

const BASE_LNG: f64 = 172.6362;
const BASE_LAT: f64 = -43.5321;
const DEGREES_PER_SIZE_UNIT: f64 = 0.005;

struct Template {
    id: &'static str,
    name: &'static str,
    status: PaddockStatus,
    ndvi: f64,
    rest_days: u32,
    water_access: &'static str,
    last_grazed: &'static str,
    offset_lng: f64,
    offset_lat: f64,
    size: f64,
}

const TEMPLATES: [Template; 8] = [
    Template {
        id: "p1",
        name: "South Valley",
        status: PaddockStatus::Recovering,
        ndvi: 0.31,
        rest_days: 14,
        water_access: "Trough (north)",
        last_grazed: "Jan 2",
        offset_lng: 0.0,
        offset_lat: 0.0,
        size: 1.2,
    },
    Template {
        id: "p2",
        name: "North Flat",
        status: PaddockStatus::AlmostReady,
        ndvi: 0.48,
        rest_days: 19,
        water_access: "Stream (west)",
        last_grazed: "Dec 28",
        offset_lng: -0.008,
        offset_lat: 0.006,
        size: 1.1,
    },
    Template {
        id: "p3",
        name: "Top Block",
        status: PaddockStatus::Recovering,
        ndvi: 0.39,
        rest_days: 16,
        water_access: "Trough (center)",
        last_grazed: "Dec 31",
        offset_lng: 0.006,
        offset_lat: 0.008,
        size: 0.9,
    },
    Template {
        id: "p4",
        name: "East Ridge",
        status: PaddockStatus::Ready,
        ndvi: 0.52,
        rest_days: 24,
        water_access: "Creek (east)",
        last_grazed: "Dec 23",
        offset_lng: 0.012,
        offset_lat: 0.004,
        size: 1.0,
    },
    Template {
        id: "p5",
        name: "Creek Bend",
        status: PaddockStatus::Grazed,
        ndvi: 0.22,
        rest_days: 3,
        water_access: "Creek (south)",
        last_grazed: "Jan 13",
        offset_lng: -0.006,
        offset_lat: -0.008,
        size: 1.0,
    },
    Template {
        id: "p6",
        name: "West Slope",
        status: PaddockStatus::Recovering,
        ndvi: 0.35,
        rest_days: 12,
        water_access: "Trough (west)",
        last_grazed: "Jan 4",
        offset_lng: 0.004,
        offset_lat: -0.008,
        size: 1.1,
    },
    Template {
        id: "p7",
        name: "Creek Side",
        status: PaddockStatus::AlmostReady,
        ndvi: 0.44,
        rest_days: 28,
        water_access: "Creek (east)",
        last_grazed: "Dec 19",
        offset_lng: 0.018,
        offset_lat: -0.004,
        size: 1.3,
    },
    Template {
        id: "p8",
        name: "Lower Paddock",
        status: PaddockStatus::Grazed,
        ndvi: 0.19,
        rest_days: 5,
        water_access: "Trough (south)",
        last_grazed: "Jan 11",
        offset_lng: 0.020,
        offset_lat: -0.012,
        size: 1.4,
    },
];

static SAMPLE_PADDOCKS: Lazy<Vec<Paddock>> = Lazy::new(|| TEMPLATES.iter().map(build).collect());

/// Square paddock anchored at its north-west corner.
fn square(offset_lng: f64, offset_lat: f64, size: f64) -> Polygon {
    let lng = BASE_LNG + offset_lng;
    let lat = BASE_LAT + offset_lat;
    let side = size * DEGREES_PER_SIZE_UNIT;
    Polygon::rectangle(lng, lat - side, lng + side, lat)
}

fn build(t: &Template) -> Paddock {
    let geometry = square(t.offset_lng, t.offset_lat, t.size);
    Paddock {
        id: t.id.to_string(),
        area: area_hectares(&geometry),
        geometry,
        name: t.name.to_string(),
        status: t.status,
        ndvi: t.ndvi,
        rest_days: t.rest_days,
        water_access: t.water_access.to_string(),
        last_grazed: t.last_grazed.to_string(),
    }
}

/// The eight sample paddocks near Canterbury, NZ. The farm has no sections.
pub fn sample_paddocks() -> Vec<Paddock> {
    SAMPLE_PADDOCKS.clone()
}
