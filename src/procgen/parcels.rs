//! Lot subdivision of street-facing strips.
//!
//! A strip is cut by rays perpendicular to its frontage, then undersized
//! pieces are merged into the neighbour they share the longest edge with.

use bevy::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};

use super::lot_geometry::{
    collinear_overlap_length, find_shared_edge, lot_centroid, point_in_polygon, polygon_area,
    polygon_bounds, slice_polygon, union_polygons, MIN_PIECE_AREA,
};
use super::street_graph::StreetEdgeId;
use super::strips::{Strip, StripId};

/// Upper bound on merge passes per strip.
pub const MAX_MERGE_PASSES: usize = 10;

/// How far inside the frontage the inward probe sits.
const PROBE_DISTANCE: f32 = 0.5;

/// Rules for subdivision.
#[derive(Clone, Debug, PartialEq)]
pub struct LotRules {
    pub min_lot_frontage: f32,
    /// Lots wider than this along the frontage trigger a higher lot count.
    pub max_lot_frontage: f32,
    pub min_lot_area: f32,
    /// Deepest a lot may reach behind its frontage. Strip land beyond this
    /// depth is left unsubdivided. Zero or less disables the cap.
    pub max_lot_depth: f32,
    pub target_lot_width: f32,
    /// Ray origin jitter as a fraction of the lot width.
    pub jitter: f32,
    /// Seed to keep subdivision deterministic between rebuilds.
    pub seed: u64,
}

impl Default for LotRules {
    fn default() -> Self {
        Self {
            min_lot_frontage: 10.0,
            max_lot_frontage: 50.0,
            min_lot_area: 200.0,
            max_lot_depth: 40.0,
            target_lot_width: 25.0,
            jitter: 0.1,
            seed: 42,
        }
    }
}

/// Identity of a lot: its strip plus a per-strip index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LotId {
    pub strip: StripId,
    pub index: u16,
}

/// A buildable lot.
#[derive(Clone, Debug, PartialEq)]
pub struct GeneratedLot {
    pub id: LotId,
    pub polygon: Vec<Vec2>,
    /// Street the lot faces, inherited from its strip.
    pub street_edge_id: StreetEdgeId,
    pub street_width: f32,
    pub frontage_length: f32,
    pub area: f32,
}

/// Number of lots along a frontage of the given length.
pub fn lot_count(frontage_length: f32, rules: &LotRules) -> usize {
    let mut count = (frontage_length / rules.target_lot_width).round().max(1.0) as usize;
    if rules.max_lot_frontage > 0.0 {
        count = count.max((frontage_length / rules.max_lot_frontage).ceil() as usize);
    }
    count
}

/// Subdivide a strip into lots.
pub fn subdivide_strip(strip: &Strip, rules: &LotRules) -> Vec<GeneratedLot> {
    let polygon = limit_depth(strip, rules.max_lot_depth);
    if polygon.len() < 3 || polygon_area(&polygon) < rules.min_lot_area {
        return vec![make_lot(strip, 0, polygon)];
    }

    let frontage_length = strip.frontage_length();
    let count = lot_count(frontage_length, rules);
    if count <= 1 || frontage_length / (count as f32) < rules.min_lot_frontage {
        return vec![make_lot(strip, 0, polygon)];
    }

    let pieces = cut_along_frontage(strip, &polygon, count, rules);
    let pieces = merge_invalid_lots(pieces, strip, rules);

    let along = strip.frontage[1] - strip.frontage[0];
    let mut pieces: Vec<_> = pieces
        .into_iter()
        .filter(|piece| piece.len() >= 3 && polygon_area(piece) >= MIN_PIECE_AREA)
        .collect();
    pieces.sort_by(|a, b| {
        let ta = (lot_centroid(a) - strip.frontage[0]).dot(along);
        let tb = (lot_centroid(b) - strip.frontage[0]).dot(along);
        ta.total_cmp(&tb)
    });

    pieces
        .into_iter()
        .enumerate()
        .map(|(index, polygon)| make_lot(strip, index, polygon))
        .collect()
}

fn make_lot(strip: &Strip, index: usize, polygon: Vec<Vec2>) -> GeneratedLot {
    GeneratedLot {
        id: LotId {
            strip: strip.id,
            index: index as u16,
        },
        street_edge_id: strip.street_edge_id,
        street_width: strip.street_width,
        frontage_length: lot_frontage(&polygon, strip),
        area: polygon_area(&polygon),
        polygon,
    }
}

/// Length of a polygon's boundary lying on the strip's frontage line.
pub fn lot_frontage(polygon: &[Vec2], strip: &Strip) -> f32 {
    collinear_overlap_length(polygon, strip.frontage[0], strip.frontage[1])
}

fn is_valid(polygon: &[Vec2], strip: &Strip, rules: &LotRules) -> bool {
    polygon_area(polygon) >= rules.min_lot_area
        && lot_frontage(polygon, strip) >= rules.min_lot_frontage
}

/// Perpendicular pointing from the frontage into the strip.
fn inward_direction(strip: &Strip) -> Vec2 {
    let [a, b] = strip.frontage;
    let normal = (b - a).normalize_or_zero().perp();
    let midpoint = (a + b) * 0.5;

    if point_in_polygon(midpoint + normal * PROBE_DISTANCE, &strip.polygon) {
        normal
    } else if point_in_polygon(midpoint - normal * PROBE_DISTANCE, &strip.polygon) {
        -normal
    } else if (lot_centroid(&strip.polygon) - midpoint).dot(normal) >= 0.0 {
        normal
    } else {
        -normal
    }
}

fn strip_seed(id: StripId, seed: u64) -> u64 {
    let key = ((id.block.0 as u64) << 16) | id.index as u64;
    seed ^ key.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Cut the strip along a line parallel to its frontage, `depth` inside it,
/// and keep the street-side piece. Strips no deeper than `depth`, or whose
/// depth line does not cross them cleanly, come back whole.
fn limit_depth(strip: &Strip, depth: f32) -> Vec<Vec2> {
    if depth <= 0.0 {
        return strip.polygon.clone();
    }

    let [a, b] = strip.frontage;
    let inward = inward_direction(strip);
    let pieces = slice_polygon(&strip.polygon, a + inward * depth, b + inward * depth);
    if pieces.len() != 2 {
        return strip.polygon.clone();
    }

    let probe = (a + b) * 0.5 + inward * PROBE_DISTANCE.min(depth * 0.5);
    match pieces.into_iter().find(|piece| point_in_polygon(probe, piece)) {
        Some(front) => front,
        None => {
            debug!("Depth cut of strip {:?} lost the frontage side", strip.id);
            strip.polygon.clone()
        }
    }
}

/// Apply `count - 1` splitting rays across `polygon`, each cutting only the
/// piece it starts in. Rays span the whole polygon, which is already limited
/// to the lot depth.
fn cut_along_frontage(
    strip: &Strip,
    polygon: &[Vec2],
    count: usize,
    rules: &LotRules,
) -> Vec<Vec<Vec2>> {
    let [a, b] = strip.frontage;
    let inward = inward_direction(strip);
    let (min, max) = polygon_bounds(polygon);
    let reach = min.distance(max) + 1.0;
    let lot_fraction = 1.0 / count as f32;
    let mut rng = StdRng::seed_from_u64(strip_seed(strip.id, rules.seed));

    let mut pieces = vec![polygon.to_vec()];
    for i in 1..count {
        let jitter = if rules.jitter > 0.0 {
            rng.gen_range(-rules.jitter..=rules.jitter) * lot_fraction
        } else {
            0.0
        };
        let t = (i as f32 * lot_fraction + jitter).clamp(0.05, 0.95);
        let origin = a.lerp(b, t);
        let probe = origin + inward * PROBE_DISTANCE;

        let Some(target) = pieces.iter().position(|piece| point_in_polygon(probe, piece)) else {
            debug!("Splitting ray {} of strip {:?} starts outside every piece", i, strip.id);
            continue;
        };

        let cut = slice_polygon(&pieces[target], origin, origin + inward * reach);
        if cut.len() == 2 {
            pieces.splice(target..=target, cut);
        }
    }

    pieces
}

fn shared_length(first: &[Vec2], second: &[Vec2]) -> f32 {
    find_shared_edge(first, second).map_or(0.0, |(a, b)| a.distance(b))
}

fn adjacency(pieces: &[Vec<Vec2>]) -> Vec<Vec<(usize, f32)>> {
    let mut neighbours = vec![Vec::new(); pieces.len()];
    for i in 0..pieces.len() {
        for j in i + 1..pieces.len() {
            let length = shared_length(&pieces[i], &pieces[j]);
            if length > 0.0 {
                neighbours[i].push((j, length));
                neighbours[j].push((i, length));
            }
        }
    }
    neighbours
}

/// Merge each invalid piece into the neighbour it shares the longest edge
/// with, one merge per pass, until nothing invalid can be merged.
fn merge_invalid_lots(
    mut pieces: Vec<Vec<Vec2>>,
    strip: &Strip,
    rules: &LotRules,
) -> Vec<Vec<Vec2>> {
    for _ in 0..MAX_MERGE_PASSES {
        let neighbours = adjacency(&pieces);
        let mut merged = None;

        'search: for (i, piece) in pieces.iter().enumerate() {
            if is_valid(piece, strip, rules) {
                continue;
            }

            let mut candidates = neighbours[i].clone();
            candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
            for (j, _) in candidates {
                if let Some(union) = union_polygons(piece, &pieces[j]) {
                    merged = Some((i, j, union));
                    break 'search;
                }
            }
        }

        let Some((i, j, union)) = merged else {
            return pieces;
        };
        pieces[i] = union;
        pieces.remove(j);
    }

    if pieces.iter().any(|piece| !is_valid(piece, strip, rules)) {
        debug!(
            "Strip {:?} still has invalid lots after {} merge passes",
            strip.id, MAX_MERGE_PASSES
        );
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procgen::block_extractor::BlockId;

    fn strip(width: f32, depth: f32) -> Strip {
        let polygon = vec![
            Vec2::new(5.0, 5.0),
            Vec2::new(5.0 + width, 5.0),
            Vec2::new(5.0 + width, 5.0 + depth),
            Vec2::new(5.0, 5.0 + depth),
        ];
        Strip {
            id: StripId {
                block: BlockId(0),
                index: 1,
            },
            block_id: BlockId(0),
            area: polygon_area(&polygon),
            frontage: [polygon[0], polygon[1]],
            polygon,
            street_edge_id: StreetEdgeId(7),
            street_width: 10.0,
        }
    }

    #[test]
    fn default_rules_cut_four_valid_lots() {
        let strip = strip(90.0, 25.0);
        let rules = LotRules::default();

        let lots = subdivide_strip(&strip, &rules);

        assert_eq!(lots.len(), 4);
        let total: f32 = lots.iter().map(|lot| lot.area).sum();
        assert!((total - 2250.0).abs() < 1e-2);
        for lot in &lots {
            assert!(lot.area >= rules.min_lot_area);
            assert!(lot.frontage_length >= rules.min_lot_frontage);
            assert!((lot.frontage_length - 22.5).abs() <= 0.1 * 22.5 * 2.0 + 1e-3);
            assert_eq!(lot.street_edge_id, StreetEdgeId(7));
            assert_eq!(lot.street_width, 10.0);
        }
    }

    #[test]
    fn lots_are_ordered_along_the_frontage() {
        let lots = subdivide_strip(&strip(90.0, 25.0), &LotRules::default());

        let xs: Vec<f32> = lots.iter().map(|lot| lot_centroid(&lot.polygon).x).collect();
        assert!(xs.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(lots.iter().enumerate().all(|(i, lot)| lot.id.index == i as u16));
    }

    #[test]
    fn subdivision_is_deterministic() {
        let strip = strip(90.0, 25.0);
        let rules = LotRules::default();
        assert_eq!(subdivide_strip(&strip, &rules), subdivide_strip(&strip, &rules));
    }

    #[test]
    fn small_strips_stay_whole() {
        let rules = LotRules::default();

        let tiny = subdivide_strip(&strip(10.0, 10.0), &rules);
        assert_eq!(tiny.len(), 1);
        assert!((tiny[0].area - 100.0).abs() < 1e-3);

        let narrow = subdivide_strip(&strip(15.0, 40.0), &rules);
        assert_eq!(narrow.len(), 1);
    }

    #[test]
    fn undersized_lots_are_merged() {
        let strip = strip(90.0, 25.0);
        let rules = LotRules {
            min_lot_area: 600.0,
            ..LotRules::default()
        };

        let lots = subdivide_strip(&strip, &rules);

        assert!(!lots.is_empty() && lots.len() < 4);
        let total: f32 = lots.iter().map(|lot| lot.area).sum();
        assert!((total - 2250.0).abs() < 1e-2);
        assert!(lots.iter().all(|lot| lot.area >= 600.0));
    }

    #[test]
    fn lot_depth_is_capped() {
        let strip = strip(90.0, 25.0);
        let shallow = LotRules {
            max_lot_depth: 5.0,
            min_lot_area: 50.0,
            ..LotRules::default()
        };

        let lots = subdivide_strip(&strip, &shallow);

        assert_eq!(lots.len(), 4);
        let total: f32 = lots.iter().map(|lot| lot.area).sum();
        assert!((total - 450.0).abs() < 1e-2);
        for lot in &lots {
            assert!(lot.polygon.iter().all(|v| v.y <= 10.0 + 1e-3));
            assert!(lot.frontage_length >= shallow.min_lot_frontage);
        }

        let deep = subdivide_strip(&strip, &LotRules::default());
        let deepest = deep
            .iter()
            .flat_map(|lot| lot.polygon.iter())
            .fold(f32::MIN, |acc, v| acc.max(v.y));
        assert!((deepest - 30.0).abs() < 1e-3);
    }

    #[test]
    fn depth_cap_ignored_when_disabled() {
        let strip = strip(90.0, 25.0);
        let rules = LotRules {
            max_lot_depth: 0.0,
            ..LotRules::default()
        };
        assert_eq!(subdivide_strip(&strip, &rules), subdivide_strip(&strip, &LotRules::default()));
    }

    #[test]
    fn wide_lots_raise_the_count() {
        let rules = LotRules {
            target_lot_width: 100.0,
            ..LotRules::default()
        };
        assert_eq!(lot_count(200.0, &rules), 4);
        assert_eq!(lot_count(200.0, &LotRules::default()), 8);
        assert_eq!(lot_count(5.0, &LotRules::default()), 1);
    }

    #[test]
    fn frontage_on_the_far_side_is_found() {
        let mut strip = strip(90.0, 25.0);
        strip.frontage = [strip.polygon[2], strip.polygon[3]];

        let lots = subdivide_strip(&strip, &LotRules::default());

        assert_eq!(lots.len(), 4);
        assert!(lots.iter().all(|lot| lot.frontage_length > 10.0));
    }
}
