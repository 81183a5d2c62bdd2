//! Strip generation: split an inset block into two street-facing halves.
//!
//! The straight skeleton of the inset outline gives one "alpha strip" per
//! boundary edge. Its interior arcs form a tree whose longest path is the
//! block's spine. That spine usually forks into two opposite corners, so its
//! ends are moved to the midpoints of the two shortest non-adjacent edges
//! before the block is sliced along it.

use std::collections::{HashMap, HashSet, VecDeque};

use bevy::prelude::*;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;

use super::block_extractor::{BlockId, DetectedBlock};
use super::lot_geometry::{
    collinear_overlap_length, distance_to_boundary, distance_to_segment, lot_centroid,
    point_in_polygon, polygon_area, polygon_edges, ray_polygon_hit, slice_polygon,
    SHARED_EDGE_TOLERANCE,
};
use super::skeleton::StraightSkeleton;
use super::street_graph::StreetEdgeId;

/// Axes shorter than this are not worth slicing along.
pub const MIN_AXIS_LENGTH: f32 = 1.0;

/// Identity of a strip: its block plus a per-block index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StripId {
    pub block: BlockId,
    pub index: u16,
}

/// A street-facing part of a block.
#[derive(Clone, Debug, PartialEq)]
pub struct Strip {
    pub id: StripId,
    pub block_id: BlockId,
    pub polygon: Vec<Vec2>,
    /// Street this strip faces.
    pub street_edge_id: StreetEdgeId,
    /// Frontage segment on the inset block outline.
    pub frontage: [Vec2; 2],
    pub street_width: f32,
    pub area: f32,
}

impl Strip {
    pub fn frontage_length(&self) -> f32 {
        self.frontage[0].distance(self.frontage[1])
    }
}

type PointKey = (i64, i64);

fn point_key(point: Vec2) -> PointKey {
    (
        (point.x * 1000.0).round() as i64,
        (point.y * 1000.0).round() as i64,
    )
}

fn segment_key(a: Vec2, b: Vec2) -> (PointKey, PointKey) {
    let (ka, kb) = (point_key(a), point_key(b));
    if ka <= kb {
        (ka, kb)
    } else {
        (kb, ka)
    }
}

/// Interior skeleton edges: face edges that are not part of `boundary`,
/// each reported once.
pub fn skeleton_segments(skeleton: &StraightSkeleton, boundary: &[Vec2]) -> Vec<(Vec2, Vec2)> {
    let boundary_keys: HashSet<_> = polygon_edges(boundary)
        .map(|(a, b)| segment_key(a, b))
        .collect();

    let mut seen = HashSet::new();
    let mut segments = Vec::new();
    for face in &skeleton.faces {
        for (a, b) in polygon_edges(&face.polygon) {
            let key = segment_key(a, b);
            if key.0 == key.1 || boundary_keys.contains(&key) || !seen.insert(key) {
                continue;
            }
            segments.push((a, b));
        }
    }

    segments
}

fn segment_graph(segments: &[(Vec2, Vec2)]) -> UnGraph<Vec2, f32> {
    let mut graph = UnGraph::new_undirected();
    let mut index: HashMap<PointKey, NodeIndex> = HashMap::new();

    for &(a, b) in segments {
        let ia = *index.entry(point_key(a)).or_insert_with(|| graph.add_node(a));
        let ib = *index.entry(point_key(b)).or_insert_with(|| graph.add_node(b));
        graph.add_edge(ia, ib, a.distance(b));
    }

    graph
}

/// Farthest node from `start` by path length, with the parent of each node.
fn farthest_from(
    graph: &UnGraph<Vec2, f32>,
    start: NodeIndex,
) -> (NodeIndex, Vec<Option<NodeIndex>>) {
    let mut distance: Vec<Option<f32>> = vec![None; graph.node_count()];
    let mut parent = vec![None; graph.node_count()];
    let mut queue = VecDeque::from([start]);
    distance[start.index()] = Some(0.0);
    let mut farthest = (start, 0.0);

    while let Some(node) = queue.pop_front() {
        let here = distance[node.index()].unwrap_or(0.0);
        if here > farthest.1 {
            farthest = (node, here);
        }

        for edge in graph.edges(node) {
            let next = if edge.source() == node {
                edge.target()
            } else {
                edge.source()
            };
            if distance[next.index()].is_none() {
                distance[next.index()] = Some(here + *edge.weight());
                parent[next.index()] = Some(node);
                queue.push_back(next);
            }
        }
    }

    (farthest.0, parent)
}

/// Longest path through the skeleton segments, found by searching twice.
pub fn longest_path(segments: &[(Vec2, Vec2)]) -> Option<Vec<Vec2>> {
    let graph = segment_graph(segments);
    if graph.node_count() < 2 {
        return None;
    }

    let (a, _) = farthest_from(&graph, NodeIndex::new(0));
    let (b, parent) = farthest_from(&graph, a);
    if a == b {
        return None;
    }

    let mut path = vec![graph[b]];
    let mut node = b;
    for _ in 0..graph.node_count() {
        match parent[node.index()] {
            Some(previous) => {
                path.push(graph[previous]);
                node = previous;
            }
            None => break,
        }
    }
    if node != a {
        return None;
    }

    path.reverse();
    Some(path)
}

/// The shortest edge plus the shortest edge that shares no vertex with it.
pub fn shortest_opposing_edges(polygon: &[Vec2]) -> Option<(usize, usize)> {
    let n = polygon.len();
    if n < 4 {
        return None;
    }

    let mut order: Vec<usize> = (0..n).collect();
    let length = |i: usize| polygon[i].distance(polygon[(i + 1) % n]);
    order.sort_by(|&a, &b| length(a).total_cmp(&length(b)));

    let first = order[0];
    let adjacent = |j: usize| j == first || j == (first + 1) % n || first == (j + 1) % n;
    let second = order[1..].iter().copied().find(|&j| !adjacent(j))?;

    Some((first, second))
}

/// Replace the path's two ends with the midpoints of the two shortest
/// opposing edges, matching each end to its nearer midpoint.
///
/// Known limitation: a side split by a T-junction contributes two short
/// edges, which can pull the axis diagonally across the block and leave
/// strips of very unequal area.
pub fn terminal_modification(polygon: &[Vec2], path: &[Vec2]) -> Option<Vec<Vec2>> {
    let (first, second) = shortest_opposing_edges(polygon)?;
    let (&start, &end) = (path.first()?, path.last()?);
    if path.len() < 2 {
        return None;
    }

    let n = polygon.len();
    let midpoint = |i: usize| (polygon[i] + polygon[(i + 1) % n]) * 0.5;
    let (m1, m2) = (midpoint(first), midpoint(second));
    let (head, tail) = if start.distance(m1) + end.distance(m2) <= start.distance(m2) + end.distance(m1) {
        (m1, m2)
    } else {
        (m2, m1)
    };

    let mut axis = path.to_vec();
    axis[0] = head;
    let last = axis.len() - 1;
    axis[last] = tail;
    Some(axis)
}

/// Push both ends of the path outward along their terminal segments until
/// they reach the polygon boundary.
pub fn extend_to_boundary(polygon: &[Vec2], path: &[Vec2]) -> Vec<Vec2> {
    let mut axis = path.to_vec();
    let n = axis.len();
    if n < 2 {
        return axis;
    }

    let extend = |tip: Vec2, inner: Vec2| {
        let inside = point_in_polygon(tip, polygon) && distance_to_boundary(tip, polygon) > 0.01;
        if !inside {
            return tip;
        }
        ray_polygon_hit(tip, tip - inner, polygon).unwrap_or(tip)
    };

    axis[0] = extend(axis[0], axis[1]);
    axis[n - 1] = extend(axis[n - 1], axis[n - 2]);
    axis
}

/// Main axis of a polygon from its skeleton path: terminal modification
/// when the polygon has two opposing short edges, the extended path when not.
pub fn main_axis(polygon: &[Vec2], path: &[Vec2]) -> Vec<Vec2> {
    terminal_modification(polygon, path).unwrap_or_else(|| extend_to_boundary(polygon, path))
}

/// Slice the polygon in two along its main axis. The terminal-modified axis
/// is tried first, then the path extended to the boundary.
pub fn split_along_main_axis(polygon: &[Vec2], path: &[Vec2]) -> Option<Vec<Vec<Vec2>>> {
    let mut attempts = Vec::with_capacity(2);
    if let Some(axis) = terminal_modification(polygon, path) {
        attempts.push(axis);
    }
    attempts.push(extend_to_boundary(polygon, path));

    attempts.into_iter().find_map(|axis| {
        let (&start, &end) = (axis.first()?, axis.last()?);
        if start.distance(end) < MIN_AXIS_LENGTH {
            return None;
        }
        let pieces = slice_polygon(polygon, start, end);
        (pieces.len() == 2).then_some(pieces)
    })
}

/// Split an inset block into strips.
///
/// Returns two strips on success, one strip per skeleton face when no clean
/// split exists, and nothing when the skeleton cannot be built.
pub fn generate_strips(
    block: &DetectedBlock,
    offset: &[Vec2],
    edge_widths: &HashMap<StreetEdgeId, f32>,
    default_width: f32,
) -> Vec<Strip> {
    let skeleton = match StraightSkeleton::build(offset) {
        Ok(skeleton) => skeleton,
        Err(err) => {
            warn!("Skipping block {:?}: straight skeleton failed: {}", block.id, err);
            return Vec::new();
        }
    };

    let frontage = StripFrontage {
        block,
        offset,
        edge_widths,
        default_width,
    };
    let alpha = alpha_strips(&skeleton, &frontage);

    let pieces = longest_path(&skeleton_segments(&skeleton, offset))
        .and_then(|path| split_along_main_axis(offset, &path));
    if let Some(pieces) = pieces {
        return pieces
            .into_iter()
            .enumerate()
            .map(|(index, piece)| frontage.assign(index, piece, &alpha))
            .collect();
    }

    debug!(
        "Block {:?}: no clean main-axis split, keeping {} alpha strips",
        block.id,
        alpha.len()
    );
    alpha
}

/// Everything needed to give a piece of the inset block a street.
struct StripFrontage<'a> {
    block: &'a DetectedBlock,
    offset: &'a [Vec2],
    edge_widths: &'a HashMap<StreetEdgeId, f32>,
    default_width: f32,
}

impl StripFrontage<'_> {
    fn edge(&self, k: usize) -> (StreetEdgeId, [Vec2; 2], f32) {
        let n = self.offset.len();
        let street_edge_id = self
            .block
            .edge_ids
            .get(k)
            .copied()
            .unwrap_or(StreetEdgeId(u64::MAX));
        let width = self
            .edge_widths
            .get(&street_edge_id)
            .copied()
            .unwrap_or(self.default_width);
        (
            street_edge_id,
            [self.offset[k], self.offset[(k + 1) % n]],
            width,
        )
    }

    fn strip(&self, index: usize, polygon: Vec<Vec2>, k: usize) -> Strip {
        let (street_edge_id, frontage, street_width) = self.edge(k);
        Strip {
            id: StripId {
                block: self.block.id,
                index: index as u16,
            },
            block_id: self.block.id,
            area: polygon_area(&polygon),
            polygon,
            street_edge_id,
            frontage,
            street_width,
        }
    }

    /// Give a sliced piece the street of its nearest touching alpha strip,
    /// or of the inset edge it runs along the most.
    fn assign(&self, index: usize, piece: Vec<Vec2>, alpha: &[Strip]) -> Strip {
        let centroid = lot_centroid(&piece);

        let matched = alpha
            .iter()
            .filter(|strip| {
                collinear_overlap_length(&piece, strip.frontage[0], strip.frontage[1])
                    > SHARED_EDGE_TOLERANCE
            })
            .min_by(|a, b| {
                let da = lot_centroid(&a.polygon).distance(centroid);
                let db = lot_centroid(&b.polygon).distance(centroid);
                da.total_cmp(&db)
            });

        if let Some(strip) = matched {
            return Strip {
                id: StripId {
                    block: self.block.id,
                    index: index as u16,
                },
                area: polygon_area(&piece),
                polygon: piece,
                ..strip.clone()
            };
        }

        let k = self.best_boundary_edge(&piece, centroid);
        self.strip(index, piece, k)
    }

    fn best_boundary_edge(&self, piece: &[Vec2], centroid: Vec2) -> usize {
        let n = self.offset.len();
        let overlaps = (0..n).map(|k| {
            let (a, b) = (self.offset[k], self.offset[(k + 1) % n]);
            (k, collinear_overlap_length(piece, a, b))
        });

        match overlaps.max_by(|a, b| a.1.total_cmp(&b.1)) {
            Some((k, overlap)) if overlap > 0.0 => k,
            _ => (0..n)
                .min_by(|&a, &b| {
                    let da = distance_to_segment(centroid, self.offset[a], self.offset[(a + 1) % n]);
                    let db = distance_to_segment(centroid, self.offset[b], self.offset[(b + 1) % n]);
                    da.total_cmp(&db)
                })
                .unwrap_or(0),
        }
    }
}

/// One strip per skeleton face, each facing the street of its edge.
fn alpha_strips(skeleton: &StraightSkeleton, frontage: &StripFrontage) -> Vec<Strip> {
    skeleton
        .faces
        .iter()
        .filter(|face| face.polygon.len() >= 3)
        .enumerate()
        .map(|(index, face)| frontage.strip(index, face.polygon.clone(), face.edge))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procgen::lot_geometry::polygon_signed_area;
    use crate::procgen::street_graph::StreetNodeId;

    fn block(polygon: &[Vec2]) -> DetectedBlock {
        let n = polygon.len();
        DetectedBlock {
            id: BlockId(3),
            node_ids: (0..n as u64).map(StreetNodeId).collect(),
            edge_ids: (10..10 + n as u64).map(StreetEdgeId).collect(),
            signed_area: polygon_signed_area(polygon),
            polygon: polygon.to_vec(),
            is_exterior: false,
        }
    }

    fn inset_rectangle() -> Vec<Vec2> {
        vec![
            Vec2::new(5.0, 5.0),
            Vec2::new(95.0, 5.0),
            Vec2::new(95.0, 55.0),
            Vec2::new(5.0, 55.0),
        ]
    }

    #[test]
    fn rectangle_skeleton_has_five_interior_segments() {
        let offset = inset_rectangle();
        let skeleton = StraightSkeleton::build(&offset).unwrap();

        let segments = skeleton_segments(&skeleton, &offset);

        assert_eq!(segments.len(), 5);
        let total: f32 = segments.iter().map(|(a, b)| a.distance(*b)).sum();
        assert!((total - (40.0 + 4.0 * 25.0 * 2f32.sqrt())).abs() < 1e-2);
    }

    #[test]
    fn spine_runs_between_the_short_ends() {
        let offset = inset_rectangle();
        let skeleton = StraightSkeleton::build(&offset).unwrap();
        let path = longest_path(&skeleton_segments(&skeleton, &offset)).unwrap();

        // Corner to corner through both spine nodes.
        assert_eq!(path.len(), 4);

        let axis = main_axis(&offset, &path);
        let ends = [axis[0], axis[axis.len() - 1]];
        assert!(ends.iter().any(|p| p.distance(Vec2::new(5.0, 30.0)) < 1e-3));
        assert!(ends.iter().any(|p| p.distance(Vec2::new(95.0, 30.0)) < 1e-3));
    }

    #[test]
    fn rectangle_splits_into_two_facing_strips() {
        let offset = inset_rectangle();
        let strips = generate_strips(&block(&offset), &offset, &HashMap::new(), 10.0);

        assert_eq!(strips.len(), 2);
        for strip in &strips {
            assert!((strip.area - 2250.0).abs() < 1e-2);
            assert!((strip.frontage_length() - 90.0).abs() < 1e-3);
            assert_eq!(strip.street_width, 10.0);
            assert_eq!(strip.block_id, BlockId(3));
        }

        let mut streets: Vec<_> = strips.iter().map(|s| s.street_edge_id).collect();
        streets.sort();
        assert_eq!(streets, vec![StreetEdgeId(10), StreetEdgeId(12)]);
        assert_ne!(strips[0].id, strips[1].id);
    }

    #[test]
    fn triangle_keeps_its_alpha_strips() {
        let triangle = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(80.0, 0.0),
            Vec2::new(30.0, 50.0),
        ];

        let strips = generate_strips(&block(&triangle), &triangle, &HashMap::new(), 10.0);

        assert_eq!(strips.len(), 3);
        let total: f32 = strips.iter().map(|s| s.area).sum();
        assert!((total - polygon_area(&triangle)).abs() < 1e-1);
    }

    #[test]
    fn concave_block_is_fully_covered() {
        let l_shape = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(100.0, 0.0),
            Vec2::new(100.0, 40.0),
            Vec2::new(60.0, 40.0),
            Vec2::new(60.0, 100.0),
            Vec2::new(0.0, 100.0),
        ];
        let block = block(&l_shape);

        let strips = generate_strips(&block, &l_shape, &HashMap::new(), 10.0);

        assert!(strips.len() >= 2);
        let total: f32 = strips.iter().map(|s| s.area).sum();
        assert!((total - polygon_area(&l_shape)).abs() < 1.0);
        assert!(strips
            .iter()
            .all(|s| block.edge_ids.contains(&s.street_edge_id)));
    }

    #[test]
    fn self_intersecting_outline_yields_nothing() {
        let bowtie = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(20.0, 0.0),
            Vec2::new(0.0, 10.0),
            Vec2::new(10.0, 12.0),
        ];

        assert!(generate_strips(&block(&bowtie), &bowtie, &HashMap::new(), 10.0).is_empty());
    }

    #[test]
    fn interior_path_is_extended_to_the_boundary() {
        let rectangle = [
            Vec2::ZERO,
            Vec2::new(100.0, 0.0),
            Vec2::new(100.0, 50.0),
            Vec2::new(0.0, 50.0),
        ];

        let axis = extend_to_boundary(&rectangle, &[Vec2::new(30.0, 25.0), Vec2::new(70.0, 25.0)]);

        assert_eq!(axis.len(), 2);
        assert!(axis[0].distance(Vec2::new(0.0, 25.0)) < 1e-3);
        assert!(axis[1].distance(Vec2::new(100.0, 25.0)) < 1e-3);

        // Tips already on the boundary stay put.
        assert_eq!(extend_to_boundary(&rectangle, &axis), axis);
    }

    #[test]
    fn extended_path_splits_when_the_short_ends_do_not() {
        // The notch edges are the two shortest, and the line between their
        // midpoints leaves the polygon through the notch.
        let notched = [
            Vec2::ZERO,
            Vec2::new(45.0, 0.0),
            Vec2::new(45.0, 5.0),
            Vec2::new(55.0, 5.0),
            Vec2::new(55.0, 0.0),
            Vec2::new(100.0, 0.0),
            Vec2::new(100.0, 50.0),
            Vec2::new(0.0, 50.0),
        ];
        let path = [Vec2::new(25.0, 25.0), Vec2::new(75.0, 25.0)];

        let modified = terminal_modification(&notched, &path).unwrap();
        let start = modified[0];
        let end = modified[modified.len() - 1];
        assert_eq!(slice_polygon(&notched, start, end).len(), 1);

        let pieces = split_along_main_axis(&notched, &path).unwrap();

        assert_eq!(pieces.len(), 2);
        let mut areas: Vec<f32> = pieces.iter().map(|piece| polygon_area(piece)).collect();
        areas.sort_by(f32::total_cmp);
        assert!((areas[0] - 2450.0).abs() < 1e-2);
        assert!((areas[1] - 2500.0).abs() < 1e-2);
    }

    #[test]
    fn opposing_edges_need_four_sides() {
        let triangle = [Vec2::ZERO, Vec2::X, Vec2::Y];
        assert!(shortest_opposing_edges(&triangle).is_none());
        assert_eq!(shortest_opposing_edges(&inset_rectangle()), Some((1, 3)));
    }
}
