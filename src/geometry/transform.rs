//! Rigid translation detection and application.

use serde::{Deserialize, Serialize};

use super::{Polygon, Position};

/// Per-vertex tolerance, in degrees, for treating an edit as a pure move.
pub const TRANSLATION_TOLERANCE: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Translation {
    pub d_lng: f64,
    pub d_lat: f64,
}

impl Translation {
    pub fn new(d_lng: f64, d_lat: f64) -> Self {
        Self { d_lng, d_lat }
    }

    /// Offset between two positions, `to - from`.
    pub fn between(from: Position, to: Position) -> Self {
        Self::new(to[0] - from[0], to[1] - from[1])
    }

    pub fn is_finite(&self) -> bool {
        self.d_lng.is_finite() && self.d_lat.is_finite()
    }
}

/// Detect whether `next` is `previous` shifted by one uniform offset.
pub fn detect_translation(previous: &Polygon, next: &Polygon) -> Option<Translation> {
    detect_translation_with_tolerance(previous, next, TRANSLATION_TOLERANCE)
}

/// The offset is taken from the first vertex pair; every other pair must
/// share it within `tolerance`. Any change in ring or vertex count, resize,
/// rotation or vertex edit yields `None`.
pub fn detect_translation_with_tolerance(
    previous: &Polygon,
    next: &Polygon,
    tolerance: f64,
) -> Option<Translation> {
    if previous.rings().len() != next.rings().len() {
        return None;
    }
    let delta = Translation::between(*previous.outer().first()?, *next.outer().first()?);
    if !delta.is_finite() {
        return None;
    }
    for (prev_ring, next_ring) in previous.rings().iter().zip(next.rings()) {
        if prev_ring.len() != next_ring.len() {
            return None;
        }
        for (p, n) in prev_ring.iter().zip(next_ring) {
            let off_lng = (p[0] + delta.d_lng - n[0]).abs();
            let off_lat = (p[1] + delta.d_lat - n[1]).abs();
            // Negated comparison so NaN offsets fail as well.
            if !(off_lng <= tolerance && off_lat <= tolerance) {
                return None;
            }
        }
    }
    Some(delta)
}

/// Shift every vertex of every ring by the same offset.
pub fn translate(polygon: &Polygon, d_lng: f64, d_lat: f64) -> Polygon {
    polygon.map_positions(|[lng, lat]| [lng + d_lng, lat + d_lat])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paddock() -> Polygon {
        Polygon::from_open_ring(vec![
            [172.6362, -43.5321],
            [172.6422, -43.5321],
            [172.6430, -43.5381],
            [172.6362, -43.5390],
        ])
        .unwrap()
    }

    #[test]
    fn detects_applied_translation() {
        let p = paddock();
        let moved = translate(&p, 0.001, -0.0005);
        let t = detect_translation(&p, &moved).unwrap();
        assert!((t.d_lng - 0.001).abs() < 1e-12);
        assert!((t.d_lat + 0.0005).abs() < 1e-12);
    }

    #[test]
    fn zero_translation_is_detected() {
        let p = paddock();
        assert_eq!(detect_translation(&p, &p), Some(Translation::new(0.0, 0.0)));
    }

    #[test]
    fn perturbed_vertex_is_not_a_move() {
        let p = paddock();
        let moved = translate(&p, 0.001, -0.0005);
        let mut rings = moved.into_rings();
        rings[0][2][0] += 1e-6;
        let reshaped = Polygon::new(rings).unwrap();
        assert!(detect_translation(&p, &reshaped).is_none());
    }

    #[test]
    fn within_tolerance_jitter_is_still_a_move() {
        let p = paddock();
        let mut rings = translate(&p, 0.002, 0.0).into_rings();
        rings[0][1][1] += 5e-9;
        let jittered = Polygon::new(rings).unwrap();
        assert!(detect_translation(&p, &jittered).is_some());
    }

    #[test]
    fn vertex_count_change_is_not_a_move() {
        let p = paddock();
        let mut ring = translate(&p, 0.001, 0.001).into_rings().remove(0);
        ring.insert(1, [172.6400, -43.5311]);
        let grown = Polygon::new(vec![ring]).unwrap();
        assert!(detect_translation(&p, &grown).is_none());
    }

    #[test]
    fn resize_is_not_a_move() {
        let a = Polygon::rectangle(0.0, 0.0, 0.01, 0.01);
        let b = Polygon::rectangle(0.0, 0.0, 0.02, 0.01);
        assert!(detect_translation(&a, &b).is_none());
    }

    #[test]
    fn translate_moves_holes_too() {
        let outer = Polygon::rectangle(0.0, 0.0, 1.0, 1.0).into_rings().remove(0);
        let hole = Polygon::rectangle(0.2, 0.2, 0.4, 0.4).into_rings().remove(0);
        let p = Polygon::new(vec![outer, hole]).unwrap();
        let moved = translate(&p, 1.0, 2.0);
        let corner = moved.rings()[1][0];
        assert!((corner[0] - 1.2).abs() < 1e-12 && (corner[1] - 2.2).abs() < 1e-12);
        assert_eq!(detect_translation(&p, &moved), Some(Translation::new(1.0, 2.0)));
    }
}
