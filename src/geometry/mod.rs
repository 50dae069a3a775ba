//! Polygon geometry for paddocks and sections.
//!
//! Coordinates are `[longitude, latitude]` pairs in degrees. A [`Polygon`] is
//! validated once at construction (at least one ring, every ring closed and
//! holding a triangle or more); the algorithms in [`area`], [`clip`] and
//! [`transform`] assume that shape and degrade quietly on anything else.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub mod area;
pub mod clip;
pub mod transform;

pub use area::{area_hectares, area_square_meters};
pub use clip::clip;
pub use transform::{
    detect_translation, detect_translation_with_tolerance, translate, Translation,
    TRANSLATION_TOLERANCE,
};

/// A `[longitude, latitude]` pair in degrees.
pub type Position = [f64; 2];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    #[error("polygon has no rings")]
    NoRings,
    #[error("ring {ring} has {len} positions; a closed ring needs at least 4")]
    TooFewPositions { ring: usize, len: usize },
    #[error("ring {0} is not closed (first position differs from last)")]
    UnclosedRing(usize),
    #[error("outer ring has non-finite coordinates or fewer than 3 distinct positions")]
    Degenerate,
}

/// A simple polygon: one outer ring followed by optional holes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Feature", into = "Feature")]
pub struct Polygon {
    rings: Vec<Vec<Position>>,
}

impl Polygon {
    pub fn new(rings: Vec<Vec<Position>>) -> Result<Self, GeometryError> {
        if rings.is_empty() {
            return Err(GeometryError::NoRings);
        }
        for (idx, ring) in rings.iter().enumerate() {
            if ring.len() < 4 {
                return Err(GeometryError::TooFewPositions {
                    ring: idx,
                    len: ring.len(),
                });
            }
            if !same_position(&ring[0], &ring[ring.len() - 1]) {
                return Err(GeometryError::UnclosedRing(idx));
            }
        }
        Ok(Self { rings })
    }

    /// Build a single-ring polygon, appending the closing position if missing.
    pub fn from_open_ring(mut ring: Vec<Position>) -> Result<Self, GeometryError> {
        if let (Some(first), Some(last)) = (ring.first().copied(), ring.last().copied()) {
            if first != last {
                ring.push(first);
            }
        }
        Self::new(vec![ring])
    }

    /// Axis-aligned rectangle, wound counter-clockwise from the south-west corner.
    pub fn rectangle(min_lng: f64, min_lat: f64, max_lng: f64, max_lat: f64) -> Self {
        Self {
            rings: vec![vec![
                [min_lng, min_lat],
                [max_lng, min_lat],
                [max_lng, max_lat],
                [min_lng, max_lat],
                [min_lng, min_lat],
            ]],
        }
    }

    /// Internal constructor for rings produced by the algorithms in this module.
    /// Returns `None` when fewer than three distinct positions remain.
    pub(crate) fn from_vertices(mut ring: Vec<Position>) -> Option<Self> {
        ring.dedup();
        if ring.len() > 1 && ring.first() == ring.last() {
            ring.pop();
        }
        if ring.len() < 3 {
            return None;
        }
        let first = ring[0];
        ring.push(first);
        Some(Self { rings: vec![ring] })
    }

    pub fn rings(&self) -> &[Vec<Position>] {
        &self.rings
    }

    pub fn outer(&self) -> &[Position] {
        &self.rings[0]
    }

    pub fn into_rings(self) -> Vec<Vec<Position>> {
        self.rings
    }

    /// Apply `f` to every position of every ring.
    pub fn map_positions(&self, mut f: impl FnMut(Position) -> Position) -> Self {
        Self {
            rings: self
                .rings
                .iter()
                .map(|ring| ring.iter().map(|p| f(*p)).collect())
                .collect(),
        }
    }

    pub fn bounds(&self) -> Option<Bounds> {
        Bounds::of(self.outer())
    }

    /// Area-weighted centroid of the outer ring in degree space. Falls back to
    /// the vertex mean when the ring encloses no area.
    pub fn centroid(&self) -> Option<Position> {
        let ring = self.outer();
        if !is_finite_ring(ring) {
            return None;
        }
        let origin = ring[0];
        let (mut a, mut cx, mut cy) = (0.0, 0.0, 0.0);
        for pair in ring.windows(2) {
            let (x0, y0) = (pair[0][0] - origin[0], pair[0][1] - origin[1]);
            let (x1, y1) = (pair[1][0] - origin[0], pair[1][1] - origin[1]);
            let cross = x0 * y1 - x1 * y0;
            a += cross;
            cx += (x0 + x1) * cross;
            cy += (y0 + y1) * cross;
        }
        if a.abs() > f64::EPSILON * 1e-6 {
            return Some([origin[0] + cx / (3.0 * a), origin[1] + cy / (3.0 * a)]);
        }
        let open = &ring[..ring.len() - 1];
        let n = open.len() as f64;
        let (sx, sy) = open
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p[0], sy + p[1]));
        Some([sx / n, sy / n])
    }

    /// True when the outer ring has finite coordinates and at least three
    /// distinct positions.
    pub fn is_well_formed(&self) -> bool {
        let ring = self.outer();
        if !is_finite_ring(ring) {
            return false;
        }
        let mut distinct: Vec<Position> = Vec::with_capacity(ring.len());
        for p in &ring[..ring.len() - 1] {
            if !distinct.contains(p) {
                distinct.push(*p);
            }
        }
        distinct.len() >= 3
    }

    /// [`Polygon::is_well_formed`] as a `Result`, for callers that reject.
    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.is_well_formed() {
            Ok(())
        } else {
            Err(GeometryError::Degenerate)
        }
    }
}

// Bitwise fallback keeps a NaN closing vertex from reading as an open ring.
fn same_position(a: &Position, b: &Position) -> bool {
    a == b || (a[0].to_bits() == b[0].to_bits() && a[1].to_bits() == b[1].to_bits())
}

pub(crate) fn is_finite_ring(ring: &[Position]) -> bool {
    !ring.is_empty() && ring.iter().all(|p| p[0].is_finite() && p[1].is_finite())
}

/// Axis-aligned bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_lng: f64,
    pub min_lat: f64,
    pub max_lng: f64,
    pub max_lat: f64,
}

impl Bounds {
    pub fn of(ring: &[Position]) -> Option<Self> {
        if !is_finite_ring(ring) {
            return None;
        }
        let mut b = Bounds {
            min_lng: f64::INFINITY,
            min_lat: f64::INFINITY,
            max_lng: f64::NEG_INFINITY,
            max_lat: f64::NEG_INFINITY,
        };
        for [lng, lat] in ring {
            b.min_lng = b.min_lng.min(*lng);
            b.max_lng = b.max_lng.max(*lng);
            b.min_lat = b.min_lat.min(*lat);
            b.max_lat = b.max_lat.max(*lat);
        }
        Some(b)
    }

    pub fn width(&self) -> f64 {
        self.max_lng - self.min_lng
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min_lng: self.min_lng.min(other.min_lng),
            min_lat: self.min_lat.min(other.min_lat),
            max_lng: self.max_lng.max(other.max_lng),
            max_lat: self.max_lat.max(other.max_lat),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureTag {
    Feature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometryTag {
    Polygon,
}

/// Single-feature GeoJSON wire shape used for every stored geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub tag: FeatureTag,
    #[serde(default)]
    pub properties: Map<String, Value>,
    pub geometry: PolygonGeometry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonGeometry {
    #[serde(rename = "type")]
    pub tag: GeometryTag,
    pub coordinates: Vec<Vec<Position>>,
}

impl From<Polygon> for Feature {
    fn from(polygon: Polygon) -> Self {
        Feature {
            tag: FeatureTag::Feature,
            properties: Map::new(),
            geometry: PolygonGeometry {
                tag: GeometryTag::Polygon,
                coordinates: polygon.rings,
            },
        }
    }
}

impl TryFrom<Feature> for Polygon {
    type Error = GeometryError;

    fn try_from(feature: Feature) -> Result<Self, Self::Error> {
        Polygon::new(feature.geometry.coordinates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_unclosed_and_short_rings() {
        let err = Polygon::new(vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]])
            .unwrap_err();
        assert_eq!(err, GeometryError::UnclosedRing(0));

        let err = Polygon::new(vec![vec![[0.0, 0.0], [1.0, 0.0], [0.0, 0.0]]]).unwrap_err();
        assert!(matches!(err, GeometryError::TooFewPositions { ring: 0, len: 3 }));

        assert_eq!(Polygon::new(vec![]).unwrap_err(), GeometryError::NoRings);
    }

    #[test]
    fn from_open_ring_closes() {
        let p = Polygon::from_open_ring(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]).unwrap();
        assert_eq!(p.outer().len(), 4);
        assert_eq!(p.outer()[0], p.outer()[3]);
    }

    #[test]
    fn feature_wire_format_roundtrip_validates() {
        let p = Polygon::rectangle(172.0, -43.0, 172.01, -42.99);
        let value = serde_json::to_value(&p).unwrap();
        assert_eq!(value["type"], "Feature");
        assert_eq!(value["geometry"]["type"], "Polygon");
        assert_eq!(value["geometry"]["coordinates"][0][0], json!([172.0, -43.0]));

        let back: Polygon = serde_json::from_value(value).unwrap();
        assert_eq!(back, p);

        let open = json!({
            "type": "Feature",
            "properties": {},
            "geometry": { "type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]] }
        });
        assert!(serde_json::from_value::<Polygon>(open).is_err());

        let wrong_kind = json!({
            "type": "Feature",
            "geometry": { "type": "Point", "coordinates": [[[0.0, 0.0]]] }
        });
        assert!(serde_json::from_value::<Polygon>(wrong_kind).is_err());
    }

    #[test]
    fn centroid_of_rectangle() {
        let p = Polygon::rectangle(10.0, 20.0, 12.0, 24.0);
        let c = p.centroid().unwrap();
        assert!((c[0] - 11.0).abs() < 1e-9);
        assert!((c[1] - 22.0).abs() < 1e-9);
    }

    #[test]
    fn well_formed_checks_distinct_and_finite() {
        let p = Polygon::new(vec![vec![[0.0, 0.0], [0.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]).unwrap();
        assert!(!p.is_well_formed());
        let p = Polygon::new(vec![vec![[0.0, 0.0], [f64::NAN, 0.0], [1.0, 1.0], [0.0, 0.0]]])
            .unwrap();
        assert!(!p.is_well_formed());
        assert!(Polygon::rectangle(0.0, 0.0, 1.0, 1.0).is_well_formed());
    }
}
