//! City block extraction from the street graph.
//!
//! Blocks are the faces of the planar street graph. Each face is traced by
//! walking half-edges and always taking the rightmost turn, which yields the
//! smallest face on each side of every street. Interior faces come out
//! counter-clockwise, the unbounded face of each component clockwise.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use bevy::prelude::*;
use petgraph::unionfind::UnionFind;
use smallvec::SmallVec;

use super::lot_geometry::polygon_signed_area;
use super::street_graph::{StreetEdgeId, StreetGraph, StreetNodeId};

/// Identity of a detected block within one generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);

/// A face of the street graph.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectedBlock {
    pub id: BlockId,
    /// Boundary walk, one entry per corner. Not closed.
    pub node_ids: Vec<StreetNodeId>,
    /// `edge_ids[i]` runs from `node_ids[i]` to `node_ids[i + 1]`.
    pub edge_ids: Vec<StreetEdgeId>,
    pub polygon: Vec<Vec2>,
    /// Positive means counter-clockwise.
    pub signed_area: f32,
    pub is_exterior: bool,
}

impl DetectedBlock {
    pub fn area(&self) -> f32 {
        self.signed_area.abs()
    }

    pub fn is_counter_clockwise(&self) -> bool {
        self.signed_area > 0.0
    }
}

#[derive(Clone, Copy, Debug)]
struct HalfEdge {
    to: StreetNodeId,
    edge: StreetEdgeId,
    angle: f32,
}

type Adjacency = BTreeMap<StreetNodeId, SmallVec<[HalfEdge; 4]>>;

/// Detect every face of the street graph, exterior faces included.
pub fn detect_blocks(graph: &StreetGraph) -> Vec<DetectedBlock> {
    if graph.node_count() == 0 || graph.edge_count() == 0 {
        return Vec::new();
    }

    let mut adjacency = build_adjacency(graph);
    prune_filaments(&mut adjacency);

    let step_limit = 2 * graph.node_count();
    let mut visited: HashSet<(StreetNodeId, StreetEdgeId)> = HashSet::new();
    let mut cycles = Vec::new();

    for (&from, outgoing) in &adjacency {
        for half_edge in outgoing {
            if visited.contains(&(from, half_edge.edge)) {
                continue;
            }
            match trace_face(&adjacency, from, *half_edge, step_limit, &mut visited) {
                Some(cycle) => cycles.push(cycle),
                None => debug!("Abandoned face trace starting at node {:?}", from),
            }
        }
    }

    let mut blocks = Vec::with_capacity(cycles.len());
    for (node_ids, edge_ids) in cycles {
        let distinct: BTreeSet<_> = node_ids.iter().collect();
        if distinct.len() < 3 {
            continue;
        }

        let polygon: Option<Vec<Vec2>> = node_ids.iter().map(|id| graph.position(*id)).collect();
        let Some(polygon) = polygon else {
            continue;
        };

        blocks.push(DetectedBlock {
            id: BlockId(blocks.len() as u32),
            signed_area: polygon_signed_area(&polygon),
            node_ids,
            edge_ids,
            polygon,
            is_exterior: false,
        });
    }

    flag_exterior_faces(graph, &mut blocks);
    blocks
}

/// Drop the exterior faces, keeping the blocks the rest of the pipeline uses.
pub fn interior_blocks(blocks: Vec<DetectedBlock>) -> Vec<DetectedBlock> {
    blocks.into_iter().filter(|block| !block.is_exterior).collect()
}

fn build_adjacency(graph: &StreetGraph) -> Adjacency {
    let mut adjacency = Adjacency::new();

    for edge in graph.edges() {
        let (Some(a), Some(b)) = (graph.position(edge.start), graph.position(edge.end)) else {
            continue;
        };
        let forward = b - a;
        adjacency.entry(edge.start).or_default().push(HalfEdge {
            to: edge.end,
            edge: edge.id,
            angle: forward.y.atan2(forward.x),
        });
        adjacency.entry(edge.end).or_default().push(HalfEdge {
            to: edge.start,
            edge: edge.id,
            angle: (-forward.y).atan2(-forward.x),
        });
    }

    // Counter-clockwise around each node.
    for outgoing in adjacency.values_mut() {
        outgoing.sort_by(|a, b| {
            a.angle
                .total_cmp(&b.angle)
                .then(a.to.cmp(&b.to))
                .then(a.edge.cmp(&b.edge))
        });
    }

    adjacency
}

/// Repeatedly strip dead ends so spurs do not break the face they poke into.
fn prune_filaments(adjacency: &mut Adjacency) {
    loop {
        let dead_ends: Vec<(StreetNodeId, HalfEdge)> = adjacency
            .iter()
            .filter(|(_, outgoing)| outgoing.len() == 1)
            .map(|(&node, outgoing)| (node, outgoing[0]))
            .collect();

        if dead_ends.is_empty() {
            break;
        }

        for (node, half_edge) in dead_ends {
            adjacency.remove(&node);
            if let Some(outgoing) = adjacency.get_mut(&half_edge.to) {
                outgoing.retain(|h| h.edge != half_edge.edge);
            }
        }
        adjacency.retain(|_, outgoing| !outgoing.is_empty());
    }
}

fn trace_face(
    adjacency: &Adjacency,
    start: StreetNodeId,
    first: HalfEdge,
    step_limit: usize,
    visited: &mut HashSet<(StreetNodeId, StreetEdgeId)>,
) -> Option<(Vec<StreetNodeId>, Vec<StreetEdgeId>)> {
    visited.insert((start, first.edge));

    let mut node_ids = vec![start];
    let mut edge_ids = vec![first.edge];
    let mut current = first;

    for _ in 0..step_limit {
        let at = current.to;
        let outgoing = adjacency.get(&at)?;
        if outgoing.len() < 2 {
            return None;
        }

        let back = outgoing.iter().position(|h| h.edge == current.edge)?;
        let next = outgoing[(back + 1) % outgoing.len()];

        if at == start && next.edge == first.edge {
            return Some((node_ids, edge_ids));
        }
        if !visited.insert((at, next.edge)) {
            return None;
        }

        node_ids.push(at);
        edge_ids.push(next.edge);
        current = next;
    }

    None
}

/// Flag the largest face of each connected component as its exterior.
///
/// This is an area heuristic and can misjudge components whose outline is
/// smaller than one of their own faces. Equal areas resolve to the
/// clockwise face, which is what the tracer produces for the outside.
fn flag_exterior_faces(graph: &StreetGraph, blocks: &mut [DetectedBlock]) {
    let index: BTreeMap<StreetNodeId, usize> = graph
        .nodes()
        .enumerate()
        .map(|(i, node)| (node.id, i))
        .collect();

    let mut components = UnionFind::<usize>::new(index.len());
    for edge in graph.edges() {
        if let (Some(&a), Some(&b)) = (index.get(&edge.start), index.get(&edge.end)) {
            components.union(a, b);
        }
    }

    let mut largest: BTreeMap<usize, usize> = BTreeMap::new();
    for (i, block) in blocks.iter().enumerate() {
        let Some(&node) = block.node_ids.first().and_then(|id| index.get(id)) else {
            continue;
        };
        let component = components.find(node);

        let replace = match largest.get(&component) {
            None => true,
            Some(&best) => {
                let best = &blocks[best];
                let difference = block.area() - best.area();
                difference > 1e-3
                    || (difference.abs() <= 1e-3 && block.signed_area < 0.0 && best.signed_area >= 0.0)
            }
        };
        if replace {
            largest.insert(component, i);
        }
    }

    for i in largest.into_values() {
        blocks[i].is_exterior = true;
    }
}
