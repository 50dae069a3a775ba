//! Latitude-corrected planar area estimate.

use super::{is_finite_ring, Polygon, Position};

/// Meters spanned by one degree of latitude (and of longitude at the equator).
pub const METERS_PER_DEGREE: f64 = 111_320.0;
const SQUARE_METERS_PER_HECTARE: f64 = 10_000.0;

/// Area in hectares rounded to one decimal. Malformed rings yield `0.0`.
pub fn area_hectares(polygon: &Polygon) -> f64 {
    round_hectares(area_square_meters(polygon) / SQUARE_METERS_PER_HECTARE)
}

/// Unrounded area in square meters: outer ring minus holes, each scaled by
/// the cosine of its first vertex's latitude.
pub fn area_square_meters(polygon: &Polygon) -> f64 {
    let mut rings = polygon.rings().iter();
    let Some(outer) = rings.next() else {
        return 0.0;
    };
    let mut total = ring_square_meters(outer);
    for hole in rings {
        total -= ring_square_meters(hole);
    }
    if total.is_finite() {
        total.max(0.0)
    } else {
        0.0
    }
}

/// Absolute area of a single ring, closed or open, in square meters.
pub(crate) fn ring_square_meters(ring: &[Position]) -> f64 {
    if ring.len() < 3 || !is_finite_ring(ring) {
        return 0.0;
    }
    let degrees = shoelace(ring).abs();
    let scale = ring[0][1].to_radians().cos().abs();
    let m2 = degrees * METERS_PER_DEGREE * METERS_PER_DEGREE * scale;
    if m2.is_finite() {
        m2
    } else {
        0.0
    }
}

/// Signed shoelace sum over the ring relative to its first vertex. Wraps
/// around, so a closing duplicate vertex contributes nothing.
pub(crate) fn shoelace(ring: &[Position]) -> f64 {
    let origin = ring[0];
    let n = ring.len();
    let mut sum = 0.0;
    for i in 0..n {
        let a = ring[i];
        let b = ring[(i + 1) % n];
        let (x0, y0) = (a[0] - origin[0], a[1] - origin[1]);
        let (x1, y1) = (b[0] - origin[0], b[1] - origin[1]);
        sum += x0 * y1 - x1 * y0;
    }
    sum / 2.0
}

fn round_hectares(hectares: f64) -> f64 {
    if !hectares.is_finite() {
        return 0.0;
    }
    (hectares * 10.0).round() / 10.0
}
