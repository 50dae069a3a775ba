//! Polygon intersection.
//!
//! General simple-polygon intersection using the Greiner–Hormann traversal.
//! Degenerate configurations (a vertex lying on the other polygon's edge,
//! collinear overlapping edges) are escaped by nudging the boundary a
//! sub-millimetre distance and retrying. When the intersection falls apart
//! into several pieces the largest one is kept and ties go to the piece found
//! first, so a day's allocation collapses onto its dominant remainder.

use tracing::debug;

use super::area::ring_square_meters;
use super::{is_finite_ring, Bounds, Polygon, Position};

/// Relative parameter tolerance for classifying an edge crossing as touching
/// an endpoint.
const PARAM_EPSILON: f64 = 1e-10;
/// Nudge size relative to the combined extent of both polygons.
const PERTURBATION_SCALE: f64 = 1e-7;
const MAX_ATTEMPTS: usize = 6;

/// Intersect `subject` with `boundary`.
///
/// Returns `None` for an empty intersection or malformed input; only outer
/// rings take part.
pub fn clip(subject: &Polygon, boundary: &Polygon) -> Option<Polygon> {
    let Some(subj) = open_ring(subject.outer()) else {
        debug!("clip: subject ring is malformed");
        return None;
    };
    let Some(clip_ring) = open_ring(boundary.outer()) else {
        debug!("clip: boundary ring is malformed");
        return None;
    };

    let pieces = intersect_rings(&subj, &clip_ring);
    if pieces.len() > 1 {
        debug!(pieces = pieces.len(), "clip: intersection split; keeping largest piece");
    }
    largest_piece(pieces)
}

fn largest_piece(pieces: Vec<Vec<Position>>) -> Option<Polygon> {
    let mut best: Option<(f64, Vec<Position>)> = None;
    for piece in pieces {
        let area = ring_square_meters(&piece);
        if area <= 0.0 {
            continue;
        }
        match &best {
            Some((best_area, _)) if area <= *best_area => {}
            _ => best = Some((area, piece)),
        }
    }
    best.and_then(|(_, ring)| Polygon::from_vertices(ring))
}

/// Strip the closing vertex and consecutive duplicates; `None` when fewer
/// than three finite positions remain.
fn open_ring(ring: &[Position]) -> Option<Vec<Position>> {
    if !is_finite_ring(ring) {
        return None;
    }
    let mut out: Vec<Position> = ring.to_vec();
    out.dedup();
    if out.len() > 1 && out.first() == out.last() {
        out.pop();
    }
    (out.len() >= 3).then_some(out)
}

fn intersect_rings(subject: &[Position], boundary: &[Position]) -> Vec<Vec<Position>> {
    let extent = match (Bounds::of(subject), Bounds::of(boundary)) {
        (Some(a), Some(b)) => {
            let u = a.union(&b);
            u.width().max(u.height())
        }
        _ => return Vec::new(),
    };
    let eps = extent.max(1e-9) * PERTURBATION_SCALE;

    for attempt in 0..MAX_ATTEMPTS {
        let shifted: Vec<Position>;
        let clip_ring = if attempt == 0 {
            boundary
        } else {
            let angle = attempt as f64 * 1.1;
            let (dx, dy) = (
                eps * attempt as f64 * angle.cos(),
                eps * attempt as f64 * angle.sin(),
            );
            shifted = boundary.iter().map(|p| [p[0] + dx, p[1] + dy]).collect();
            &shifted
        };
        match greiner_hormann(subject, clip_ring) {
            Some(pieces) => return pieces,
            None => debug!(attempt, "clip: degenerate configuration; perturbing boundary"),
        }
    }
    debug!("clip: could not escape degenerate configuration");
    Vec::new()
}

#[derive(Debug, Clone)]
struct Node {
    pos: Position,
    next: usize,
    prev: usize,
    /// Index into the shared crossing table for intersection nodes.
    crossing: Option<usize>,
    entry: bool,
}

struct Crossing {
    subject_node: usize,
    clip_node: usize,
}

/// Proper crossing between subject edge `i` and clip edge `j`.
struct Hit {
    subject_edge: usize,
    subject_alpha: f64,
    clip_edge: usize,
    clip_alpha: f64,
    pos: Position,
}

enum EdgeRelation {
    Disjoint,
    Cross(f64, f64),
    Degenerate,
}

fn sub(a: Position, b: Position) -> Position {
    [a[0] - b[0], a[1] - b[1]]
}

fn cross(a: Position, b: Position) -> f64 {
    a[0] * b[1] - a[1] * b[0]
}

fn dot(a: Position, b: Position) -> f64 {
    a[0] * b[0] + a[1] * b[1]
}

fn edge_relation(s0: Position, s1: Position, c0: Position, c1: Position) -> EdgeRelation {
    let r = sub(s1, s0);
    let s = sub(c1, c0);
    let denom = cross(r, s);
    let qp = sub(c0, s0);
    let scale = (dot(r, r) * dot(s, s)).sqrt();

    if denom.abs() <= 1e-14 * scale {
        // Parallel: only a collinear overlap matters.
        let offset = cross(qp, r).abs();
        if offset > 1e-14 * scale.max(dot(r, r)) {
            return EdgeRelation::Disjoint;
        }
        let rr = dot(r, r);
        let t0 = dot(qp, r) / rr;
        let t1 = t0 + dot(s, r) / rr;
        let (lo, hi) = if t0 < t1 { (t0, t1) } else { (t1, t0) };
        if hi < -PARAM_EPSILON || lo > 1.0 + PARAM_EPSILON {
            return EdgeRelation::Disjoint;
        }
        return EdgeRelation::Degenerate;
    }

    let t = cross(qp, s) / denom;
    let u = cross(qp, r) / denom;
    let in_range = |v: f64| (-PARAM_EPSILON..=1.0 + PARAM_EPSILON).contains(&v);
    if !in_range(t) || !in_range(u) {
        return EdgeRelation::Disjoint;
    }
    let near_end = |v: f64| v.abs() <= PARAM_EPSILON || (v - 1.0).abs() <= PARAM_EPSILON;
    if near_end(t) || near_end(u) {
        return EdgeRelation::Degenerate;
    }
    EdgeRelation::Cross(t, u)
}

/// Ray-casting point-in-ring test for an open ring.
fn point_in_ring(p: Position, ring: &[Position]) -> bool {
    let n = ring.len();
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = (ring[i][0], ring[i][1]);
        let (xj, yj) = (ring[j][0], ring[j][1]);
        if (yi > p[1]) != (yj > p[1]) && p[0] < (xj - xi) * (p[1] - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Link original vertices and inserted crossings into a cyclic list.
fn build_nodes(ring: &[Position], hits_per_edge: Vec<Vec<(f64, usize, Position)>>) -> Vec<Node> {
    let mut nodes: Vec<Node> = Vec::new();
    let mut order: Vec<usize> = Vec::new();
    for (i, mut hits) in hits_per_edge.into_iter().enumerate() {
        order.push(nodes.len());
        nodes.push(Node {
            pos: ring[i],
            next: 0,
            prev: 0,
            crossing: None,
            entry: false,
        });
        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        for (_, crossing, pos) in hits {
            order.push(nodes.len());
            nodes.push(Node {
                pos,
                next: 0,
                prev: 0,
                crossing: Some(crossing),
                entry: false,
            });
        }
    }
    let len = order.len();
    for k in 0..len {
        let node = order[k];
        nodes[node].next = order[(k + 1) % len];
        nodes[node].prev = order[(k + len - 1) % len];
    }
    nodes
}

/// Flag each crossing as entering or leaving `other`, walking from node 0.
fn mark_entries(nodes: &mut [Node], other: &[Position]) {
    let mut inside = point_in_ring(nodes[0].pos, other);
    let mut current = nodes[0].next;
    while current != 0 {
        if nodes[current].crossing.is_some() {
            nodes[current].entry = !inside;
            inside = !inside;
        }
        current = nodes[current].next;
    }
}

/// Returns `None` when the configuration is degenerate.
fn greiner_hormann(subject: &[Position], boundary: &[Position]) -> Option<Vec<Vec<Position>>> {
    let (n, m) = (subject.len(), boundary.len());
    let mut hits = Vec::new();
    for i in 0..n {
        let (s0, s1) = (subject[i], subject[(i + 1) % n]);
        for j in 0..m {
            let (c0, c1) = (boundary[j], boundary[(j + 1) % m]);
            match edge_relation(s0, s1, c0, c1) {
                EdgeRelation::Disjoint => {}
                EdgeRelation::Degenerate => return None,
                EdgeRelation::Cross(t, u) => hits.push(Hit {
                    subject_edge: i,
                    subject_alpha: t,
                    clip_edge: j,
                    clip_alpha: u,
                    pos: [s0[0] + t * (s1[0] - s0[0]), s0[1] + t * (s1[1] - s0[1])],
                }),
            }
        }
    }

    if hits.is_empty() {
        if point_in_ring(subject[0], boundary) {
            return Some(vec![subject.to_vec()]);
        }
        if point_in_ring(boundary[0], subject) {
            return Some(vec![boundary.to_vec()]);
        }
        return Some(Vec::new());
    }

    let mut subject_edges = vec![Vec::new(); n];
    let mut clip_edges = vec![Vec::new(); m];
    for (k, hit) in hits.iter().enumerate() {
        subject_edges[hit.subject_edge].push((hit.subject_alpha, k, hit.pos));
        clip_edges[hit.clip_edge].push((hit.clip_alpha, k, hit.pos));
    }
    let mut subj_nodes = build_nodes(subject, subject_edges);
    let mut clip_nodes = build_nodes(boundary, clip_edges);

    let mut crossings: Vec<Crossing> = (0..hits.len())
        .map(|_| Crossing {
            subject_node: 0,
            clip_node: 0,
        })
        .collect();
    for (idx, node) in subj_nodes.iter().enumerate() {
        if let Some(k) = node.crossing {
            crossings[k].subject_node = idx;
        }
    }
    for (idx, node) in clip_nodes.iter().enumerate() {
        if let Some(k) = node.crossing {
            crossings[k].clip_node = idx;
        }
    }

    mark_entries(&mut subj_nodes, boundary);
    mark_entries(&mut clip_nodes, subject);

    let mut visited = vec![false; hits.len()];
    let mut pieces = Vec::new();
    let step_limit = 2 * (subj_nodes.len() + clip_nodes.len());

    // Walk crossings in subject order so piece discovery order is stable.
    let mut subject_order = Vec::with_capacity(subj_nodes.len());
    let mut cursor = 0;
    loop {
        subject_order.push(cursor);
        cursor = subj_nodes[cursor].next;
        if cursor == 0 {
            break;
        }
    }

    for &start_node in &subject_order {
        let Some(start) = subj_nodes[start_node].crossing else {
            continue;
        };
        if visited[start] {
            continue;
        }
        let mut ring = vec![subj_nodes[start_node].pos];
        let mut on_subject = true;
        let mut current = start_node;
        let mut steps = 0;
        visited[start] = true;
        loop {
            let nodes = if on_subject { &subj_nodes } else { &clip_nodes };
            let forward = nodes[current].entry;
            loop {
                current = if forward {
                    nodes[current].next
                } else {
                    nodes[current].prev
                };
                ring.push(nodes[current].pos);
                steps += 1;
                if steps > step_limit {
                    return None;
                }
                if nodes[current].crossing.is_some() {
                    break;
                }
            }
            let k = nodes[current].crossing?;
            visited[k] = true;
            if k == start {
                break;
            }
            on_subject = !on_subject;
            current = if on_subject {
                crossings[k].subject_node
            } else {
                crossings[k].clip_node
            };
        }
        if ring.len() >= 4 {
            pieces.push(ring);
        }
    }
    Some(pieces)
}
