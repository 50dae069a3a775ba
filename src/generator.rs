//! Procedural placement of daily grazing sections.
//!
//! Sections are laid out in a local metric frame built from the paddock's
//! bounding box. Each day owns a band along the dominant axis; bands advance
//! with `day_index / (total_days - 1)` and never overlap. On paddocks that do
//! not fill their bounding box the band is placed by covered paddock area
//! rather than by length. Even days fill their band with a slightly irregular
//! strip, odd days with a block rotated 30–60° and clipped to the band; either
//! shape is then grown until its area is close to the day's target.
//! All randomness comes from a `ChaCha8Rng` seeded per request, so identical
//! requests give identical output on every platform.

use chrono::{Duration, NaiveDate};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;
use xxhash_rust::xxh32::xxh32;

use crate::geometry::area::METERS_PER_DEGREE;
use crate::geometry::{area_hectares, area_square_meters, clip, Polygon, Position};
use crate::model::{Paddock, SectionDraft};

pub const DEFAULT_DAILY_CONSUMPTION_HA: f64 = 3.5;
pub const BASE_CONFIDENCE: u8 = 87;
pub const MIN_CONFIDENCE: u8 = 45;

/// Share of the band's cross extent a strip aims to cover before clamping.
const NOMINAL_CROSS_FRACTION: f64 = 0.875;
const SQUARE_METERS_PER_HECTARE: f64 = 10_000.0;
/// A placed shape below this share of its target is grown.
const AREA_FLOOR: f64 = 0.92;
const GROWTH_STEPS: usize = 8;
const BISECTION_STEPS: usize = 16;
const BAND_SEARCH_STEPS: usize = 48;

/// Inputs for one day's section.
#[derive(Debug, Clone, Copy)]
pub struct SectionRequest<'a> {
    pub paddock: &'a Paddock,
    /// Zero-based day within the stay.
    pub day_index: u32,
    pub total_days: u32,
    /// Hectares; defaults to the paddock area split evenly over the stay.
    pub target_area: Option<f64>,
    pub seed: Option<u64>,
}

impl<'a> SectionRequest<'a> {
    pub fn new(paddock: &'a Paddock, day_index: u32, total_days: u32) -> Self {
        Self {
            paddock,
            day_index,
            total_days,
            target_area: None,
            seed: None,
        }
    }

    pub fn with_target_area(mut self, hectares: f64) -> Self {
        self.target_area = Some(hectares);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedSection {
    pub id: String,
    pub paddock_id: String,
    pub geometry: Polygon,
    /// Hectares, computed from the emitted geometry.
    pub area: f64,
    pub day_index: u32,
    pub date: Option<NaiveDate>,
    pub justification: Vec<String>,
    pub confidence: u8,
}

impl GeneratedSection {
    /// Split into the geometry and the optional fields the store accepts.
    pub fn into_draft(self) -> (Polygon, SectionDraft) {
        let draft = SectionDraft {
            date: self.date,
            target_area: Some(self.area),
            day_index: Some(self.day_index),
            justification: Some(self.justification),
            confidence: Some(self.confidence),
            avg_ndvi: None,
        };
        (self.geometry, draft)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionAlternative {
    pub id: String,
    pub paddock_id: String,
    pub geometry: Polygon,
    pub area: f64,
    pub confidence: u8,
    pub reasoning: String,
}

/// Seed used when a request carries none: stable per paddock id and day.
pub fn default_seed(paddock_id: &str, day_index: u32) -> u64 {
    u64::from(xxh32(paddock_id.as_bytes(), 0)) * 1000 + u64::from(day_index)
}

/// Days a herd needs to graze a paddock, never fewer than two.
pub fn paddock_days(area_ha: f64, daily_consumption_ha: f64) -> u32 {
    if !(daily_consumption_ha > 0.0) || !area_ha.is_finite() || area_ha <= 0.0 {
        return 2;
    }
    let days = (area_ha / daily_consumption_ha).ceil();
    if days >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        (days as u32).max(2)
    }
}

/// Local metric frame over a paddock's bounding box. `u` runs along the
/// dominant axis (north to south, or west to east), `v` across it.
#[derive(Debug, Clone, Copy)]
struct Frame {
    min_lng: f64,
    min_lat: f64,
    m_per_lng: f64,
    m_per_lat: f64,
    width_m: f64,
    height_m: f64,
    north_south: bool,
}

impl Frame {
    fn of(polygon: &Polygon) -> Option<Self> {
        let bounds = polygon.bounds()?;
        let m_per_lat = METERS_PER_DEGREE;
        let m_per_lng = METERS_PER_DEGREE * polygon.outer()[0][1].to_radians().cos().abs();
        let width_m = bounds.width() * m_per_lng;
        let height_m = bounds.height() * m_per_lat;
        let usable = |x: f64| x.is_finite() && x > 0.0;
        if !usable(width_m) || !usable(height_m) || !usable(m_per_lng) {
            return None;
        }
        Some(Self {
            min_lng: bounds.min_lng,
            min_lat: bounds.min_lat,
            m_per_lng,
            m_per_lat,
            width_m,
            height_m,
            north_south: height_m >= width_m,
        })
    }

    fn along(&self) -> f64 {
        if self.north_south {
            self.height_m
        } else {
            self.width_m
        }
    }

    fn across(&self) -> f64 {
        if self.north_south {
            self.width_m
        } else {
            self.height_m
        }
    }

    fn position(&self, u: f64, v: f64) -> Position {
        let (x, y) = if self.north_south {
            (v, self.height_m - u)
        } else {
            (u, v)
        };
        [self.min_lng + x / self.m_per_lng, self.min_lat + y / self.m_per_lat]
    }

    fn polygon(&self, uv: &[(f64, f64)]) -> Option<Polygon> {
        Polygon::from_vertices(uv.iter().map(|&(u, v)| self.position(u, v)).collect())
    }

    fn rect(&self, u0: f64, u1: f64, v0: f64, v1: f64) -> Option<Polygon> {
        self.polygon(&[(u0, v0), (u1, v0), (u1, v1), (u0, v1)])
    }
}

/// The band a day occupies along the dominant axis.
#[derive(Debug, Clone, Copy)]
struct Band {
    start: f64,
    thickness: f64,
}

impl Band {
    fn for_day(frame: &Frame, day_index: u32, total_days: u32, target_m2: f64) -> Self {
        let progress = progress(day_index, total_days);
        let slot = frame.along() / f64::from(total_days);
        let thickness = (target_m2 / (frame.across() * NOMINAL_CROSS_FRACTION)).min(slot);
        Band {
            start: progress * (frame.along() - thickness),
            thickness,
        }
    }

    /// Band holding `target_m2` of paddock area (at most an even share),
    /// positioned by the paddock area lying before it.
    fn by_area(frame: &Frame, paddock: &Polygon, day_index: u32, total_days: u32, target_m2: f64) -> Self {
        let total = area_square_meters(paddock);
        let share = target_m2.min(total / f64::from(total_days));
        if !(share > 0.0) {
            return Self::for_day(frame, day_index, total_days, target_m2);
        }
        let covered = |u: f64| {
            frame
                .rect(0.0, u, 0.0, frame.across())
                .and_then(|head| clip(&head, paddock))
                .map_or(0.0, |piece| area_square_meters(&piece))
        };
        let before = progress(day_index, total_days) * (total - share);
        let start = if before > 0.0 {
            first_reaching(&covered, before, frame.along())
        } else {
            0.0
        };
        let end = first_reaching(&covered, before + share, frame.along());
        Band {
            start,
            thickness: (end - start).max(0.0),
        }
    }

    fn end(&self) -> f64 {
        self.start + self.thickness
    }
}

/// Smallest `u` in `[0, limit]` where the non-decreasing `f` reaches `wanted`.
fn first_reaching(f: &impl Fn(f64) -> f64, wanted: f64, limit: f64) -> f64 {
    let (mut lo, mut hi) = (0.0, limit);
    for _ in 0..BAND_SEARCH_STEPS {
        let mid = (lo + hi) / 2.0;
        if f(mid) >= wanted {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    hi
}

fn progress(day_index: u32, total_days: u32) -> f64 {
    if total_days <= 1 {
        return 0.0;
    }
    (f64::from(day_index) / f64::from(total_days - 1)).min(1.0)
}

fn paddock_hectares(paddock: &Paddock) -> f64 {
    if paddock.area.is_finite() && paddock.area > 0.0 {
        paddock.area
    } else {
        area_hectares(&paddock.geometry)
    }
}

fn target_hectares(paddock: &Paddock, target: Option<f64>, total_days: u32) -> f64 {
    match target {
        Some(ha) if ha.is_finite() && ha > 0.0 => ha,
        _ => paddock_hectares(paddock) / f64::from(total_days),
    }
}

/// Seeded jitter for a strip, drawn once so the strip can be resized.
#[derive(Debug, Clone, Copy)]
struct StripJitter {
    cross: f64,
    shift: f64,
    inset: f64,
}

impl StripJitter {
    fn draw(rng: &mut ChaCha8Rng) -> Self {
        Self {
            cross: 0.95 + 0.05 * rng.gen::<f64>(),
            shift: rng.gen::<f64>() - 0.5,
            inset: 0.05 * rng.gen::<f64>(),
        }
    }
}

/// Strip filling most of the band, with inward jitter on its long edges.
fn strip(frame: &Frame, band: Band, area_m2: f64, jitter: &StripJitter) -> Option<Polygon> {
    let across = frame.across();
    let fill = area_m2 / (across * band.thickness);
    let len = across * (fill * jitter.cross).min(1.0);
    let slack = across - len;
    let v0 = (slack / 2.0 + jitter.shift * across * 0.1).clamp(0.0, slack);
    let irr = band.thickness * jitter.inset;

    let (u0, u1) = (band.start, band.end());
    frame.polygon(&[
        (u0, v0),
        (u0 + irr, v0 + len * 0.3),
        (u0 + irr * 0.4, v0 + len * 0.7),
        (u0, v0 + len),
        (u1, v0 + len),
        (u1 - irr, v0 + len * 0.6),
        (u1 - irr * 0.5, v0 + len * 0.3),
        (u1, v0),
    ])
}

#[derive(Debug, Clone, Copy)]
struct Tilt {
    degrees: f64,
    center_v: f64,
}

impl Tilt {
    fn draw(frame: &Frame, rng: &mut ChaCha8Rng) -> Self {
        let degrees = rng.gen_range(30.0..=60.0_f64);
        let across = frame.across();
        Self {
            degrees,
            center_v: across / 2.0 + (rng.gen::<f64>() - 0.5) * across * 0.1,
        }
    }
}

/// Rectangle rotated off the dominant axis, sized so its crossing of the band
/// covers `area_m2`, then clipped to the band.
fn diagonal_block(frame: &Frame, band: Band, area_m2: f64, tilt: &Tilt) -> Option<Polygon> {
    let across = frame.across();
    let center_v = tilt.center_v;
    let (sin, cos) = tilt.degrees.to_radians().sin_cos();
    let t = band.thickness;
    let width = area_m2 * cos / t;
    let half_len = t / cos + width * sin / cos;
    let center_u = band.start + t / 2.0;
    let corners: Vec<(f64, f64)> = [
        (-half_len, -width / 2.0),
        (half_len, -width / 2.0),
        (half_len, width / 2.0),
        (-half_len, width / 2.0),
    ]
    .iter()
    .map(|&(a, b)| (center_u + a * cos - b * sin, center_v + a * sin + b * cos))
    .collect();

    let block = frame.polygon(&corners)?;
    let limits = frame.rect(band.start, band.end(), 0.0, across)?;
    clip(&block, &limits)
}

/// Build with `area_m2 = target_m2` first; if the result falls short of
/// [`AREA_FLOOR`], scale the requested area up until it no longer does, then
/// bisect back toward the target. Returns the largest attempt when the floor
/// is out of reach.
fn calibrated(target_m2: f64, build: impl Fn(f64) -> Option<Polygon>) -> Option<Polygon> {
    let floor = target_m2 * AREA_FLOOR;
    let first = build(target_m2)?;
    if !(floor > 0.0) || area_square_meters(&first) >= floor {
        return Some(first);
    }

    let (mut lo, mut hi) = (1.0, 1.0);
    let mut best = first;
    let mut upper = None;
    for _ in 0..GROWTH_STEPS {
        hi *= 2.0;
        let Some(candidate) = build(target_m2 * hi) else {
            break;
        };
        if area_square_meters(&candidate) >= floor {
            upper = Some(candidate);
            break;
        }
        if area_square_meters(&candidate) > area_square_meters(&best) {
            best = candidate;
        }
        lo = hi;
    }
    let Some(mut upper) = upper else {
        debug!(best = area_square_meters(&best), target_m2, "section cannot reach its target area");
        return Some(best);
    };

    for _ in 0..BISECTION_STEPS {
        if area_square_meters(&upper) <= target_m2 {
            break;
        }
        let mid = (lo + hi) / 2.0;
        match build(target_m2 * mid) {
            Some(candidate) if area_square_meters(&candidate) >= floor => {
                hi = mid;
                upper = candidate;
            }
            _ => lo = mid,
        }
    }
    Some(upper)
}

/// True when the paddock covers its whole bounding box.
fn fills_frame(frame: &Frame, paddock: &Polygon) -> bool {
    area_square_meters(paddock) >= frame.width_m * frame.height_m * (1.0 - 1e-6)
}

/// Clip to the paddock outline unless the paddock fills its bounding box.
fn fit_to_paddock(frame: &Frame, paddock: &Polygon, section: Polygon) -> Polygon {
    if fills_frame(frame, paddock) {
        return section;
    }
    match clip(&section, paddock) {
        Some(fitted) => fitted,
        None => {
            debug!("generated section misses an irregular paddock; keeping unclipped");
            section
        }
    }
}

fn justification(
    paddock: &Paddock,
    day_index: u32,
    total_days: u32,
    area_ha: f64,
    angle: Option<f64>,
) -> Vec<String> {
    let mut lines = Vec::with_capacity(4);
    if day_index == 0 {
        lines.push(format!(
            "Starting rotation in {}; highest vegetation zone selected",
            paddock.name
        ));
        lines.push(format!(
            "Target area of {area_ha:.1} ha matches herd daily consumption"
        ));
    } else if day_index + 1 >= total_days {
        lines.push(format!("Final section of {} rotation", paddock.name));
        lines.push("Completing coverage of remaining ungrazed area".to_string());
    } else {
        lines.push(format!(
            "Day {} of {} in {}",
            day_index + 1,
            total_days,
            paddock.name
        ));
        lines.push("Positioned so previous sections can begin recovery".to_string());
    }
    if let Some(angle) = angle {
        lines.push(format!("Block angled at {angle:.0}° to follow the grazing front"));
    }
    let water = paddock.water_access.trim();
    if !water.is_empty() && !water.eq_ignore_ascii_case("none") {
        lines.push(format!(
            "Section maintains access to {}",
            water.to_lowercase()
        ));
    }
    lines
}

/// Generate one day's section. Identical requests produce identical output.
pub fn generate_section(req: &SectionRequest<'_>) -> GeneratedSection {
    let paddock = req.paddock;
    let total_days = req.total_days.max(1);
    let seed = req
        .seed
        .unwrap_or_else(|| default_seed(&paddock.id, req.day_index));
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let target_m2 = target_hectares(paddock, req.target_area, total_days) * SQUARE_METERS_PER_HECTARE;
    let placed = Frame::of(&paddock.geometry).map(|frame| {
        let outline = &paddock.geometry;
        let band = if fills_frame(&frame, outline) {
            Band::for_day(&frame, req.day_index, total_days, target_m2)
        } else {
            Band::by_area(&frame, outline, req.day_index, total_days, target_m2)
        };
        let fit = |shape: Option<Polygon>| shape.map(|s| fit_to_paddock(&frame, outline, s));
        if req.day_index % 2 == 0 {
            let jitter = StripJitter::draw(&mut rng);
            let shape = calibrated(target_m2, |area| fit(strip(&frame, band, area, &jitter)));
            (shape, None)
        } else {
            let tilt = Tilt::draw(&frame, &mut rng);
            match calibrated(target_m2, |area| fit(diagonal_block(&frame, band, area, &tilt))) {
                Some(block) => (Some(block), Some(tilt.degrees)),
                None => {
                    debug!(day = req.day_index, "diagonal block collapsed; using full band");
                    (fit(frame.rect(band.start, band.end(), 0.0, frame.across())), None)
                }
            }
        }
    });

    let (geometry, angle) = match placed {
        Some((Some(geometry), angle)) => (geometry, angle),
        _ => {
            debug!(paddock = %paddock.id, "degenerate paddock bounds; section covers the paddock");
            (paddock.geometry.clone(), None)
        }
    };

    let area = area_hectares(&geometry);
    GeneratedSection {
        id: format!("section-{}-day{}", paddock.id, req.day_index + 1),
        paddock_id: paddock.id.clone(),
        justification: justification(paddock, req.day_index, total_days, area, angle),
        geometry,
        area,
        day_index: req.day_index,
        date: None,
        confidence: BASE_CONFIDENCE,
    }
}

/// One section per day with consecutive dates from `start`.
pub fn generate_stay(paddock: &Paddock, total_days: u32, start: NaiveDate) -> Vec<GeneratedSection> {
    (0..total_days)
        .map(|day| {
            let req = SectionRequest::new(paddock, day, total_days);
            let mut section = generate_section(&req);
            section.date = Some(start + Duration::days(i64::from(day)));
            section
        })
        .collect()
}

/// Ranked alternatives for one day, each strictly less confident than the
/// primary section. Strategies cycle: offset strip, concentrated block,
/// diagonal block; every further round costs more confidence.
pub fn generate_alternatives(
    paddock: &Paddock,
    day_index: u32,
    total_days: u32,
    count: usize,
) -> Vec<SectionAlternative> {
    let total_days = total_days.max(1);
    let base_seed = default_seed(&paddock.id, day_index);
    let target_m2 = target_hectares(paddock, None, total_days) * SQUARE_METERS_PER_HECTARE;
    let frame = Frame::of(&paddock.geometry);

    (0..count)
        .map(|i| {
            let mut rng = ChaCha8Rng::seed_from_u64(base_seed.wrapping_add((i as u64 + 1) * 100));
            let round = (i / 3) as u32;
            let (shape, reasoning, deduction) = match i % 3 {
                0 => (
                    frame.and_then(|f| offset_strip(&f, day_index, total_days, target_m2, &mut rng)),
                    "Offset strip, closer to water access",
                    12 + rng.gen_range(0..8),
                ),
                1 => (
                    frame.and_then(|f| {
                        concentrated_block(&f, day_index, total_days, target_m2 * 0.85, &mut rng)
                    }),
                    "Smaller section, higher grass density zone",
                    18 + rng.gen_range(0..10),
                ),
                _ => (
                    frame.and_then(|f| {
                        let band = Band::for_day(&f, day_index, total_days, target_m2);
                        let tilt = Tilt::draw(&f, &mut rng);
                        diagonal_block(&f, band, target_m2, &tilt)
                    }),
                    "Diagonal block following the grazing front",
                    24 + rng.gen_range(0..12),
                ),
            };
            let deduction = deduction + round * 6;
            let geometry = match (frame, shape) {
                (Some(f), Some(shape)) => fit_to_paddock(&f, &paddock.geometry, shape),
                _ => paddock.geometry.clone(),
            };
            let confidence = u32::from(BASE_CONFIDENCE)
                .saturating_sub(deduction)
                .max(u32::from(MIN_CONFIDENCE)) as u8;
            SectionAlternative {
                id: format!("alt-{}-day{}-opt{}", paddock.id, day_index + 1, i + 1),
                paddock_id: paddock.id.clone(),
                area: area_hectares(&geometry),
                geometry,
                confidence,
                reasoning: reasoning.to_string(),
            }
        })
        .collect()
}

fn offset_strip(
    frame: &Frame,
    day_index: u32,
    total_days: u32,
    target_m2: f64,
    rng: &mut ChaCha8Rng,
) -> Option<Polygon> {
    let len = frame.across() * 0.7;
    let thickness = (target_m2 / len).min(frame.along());
    let start = progress(day_index, total_days) * (frame.along() - thickness);
    let v0 = frame.across() * 0.3 * rng.gen::<f64>();
    frame.rect(start, start + thickness, v0, v0 + len)
}

fn concentrated_block(
    frame: &Frame,
    day_index: u32,
    total_days: u32,
    area_m2: f64,
    rng: &mut ChaCha8Rng,
) -> Option<Polygon> {
    let len = frame.across() * 0.5;
    let thickness = (area_m2 / len).min(frame.along());
    let start = progress(day_index, total_days) * (frame.along() - thickness);
    let v0 = (frame.across() - len) * rng.gen::<f64>();
    frame.rect(start, start + thickness, v0, v0 + len)
}
