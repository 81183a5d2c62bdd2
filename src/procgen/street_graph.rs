//! Street graph: the planar network of street nodes and street edges.
//!
//! This is the editable source data. Everything the pipeline derives from it
//! (blocks, strips, lots) is rebuilt wholesale whenever the graph changes.

use std::collections::{BTreeMap, HashMap};

use bevy::prelude::*;

/// Width used for edges created without an explicit width.
pub const DEFAULT_STREET_WIDTH: f32 = 10.0;

/// Identity of a street node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreetNodeId(pub u64);

/// Identity of a street edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreetEdgeId(pub u64);

/// A street intersection or endpoint.
///
/// `position.x` is world x and `position.y` is world z.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreetNode {
    pub id: StreetNodeId,
    pub position: Vec2,
}

/// An undirected street segment between two nodes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreetEdge {
    pub id: StreetEdgeId,
    pub start: StreetNodeId,
    pub end: StreetNodeId,
    /// Full street width, curb to curb.
    pub width: f32,
}

impl StreetEdge {
    /// The endpoint opposite to `node`, if `node` is an endpoint at all.
    pub fn other(&self, node: StreetNodeId) -> Option<StreetNodeId> {
        if node == self.start {
            Some(self.end)
        } else if node == self.end {
            Some(self.start)
        } else {
            None
        }
    }

    /// Whether this edge touches `node`.
    pub fn touches(&self, node: StreetNodeId) -> bool {
        self.start == node || self.end == node
    }
}

/// The street network resource.
#[derive(Resource, Clone, Debug)]
pub struct StreetGraph {
    nodes: BTreeMap<StreetNodeId, StreetNode>,
    edges: BTreeMap<StreetEdgeId, StreetEdge>,
    next_node_id: u64,
    next_edge_id: u64,
    default_width: f32,
}

impl Default for StreetGraph {
    fn default() -> Self {
        Self::with_default_width(DEFAULT_STREET_WIDTH)
    }
}

impl StreetGraph {
    /// Empty graph whose width-less edges get `default_width`.
    pub fn with_default_width(default_width: f32) -> Self {
        Self {
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
            next_node_id: 0,
            next_edge_id: 0,
            default_width,
        }
    }

    /// Build a rectilinear grid of `columns` x `rows` nodes.
    ///
    /// Produces `(columns - 1) * (rows - 1)` enclosed blocks.
    pub fn grid(columns: usize, rows: usize, spacing: Vec2, width: f32) -> Self {
        let mut graph = Self::default();
        let mut ids = Vec::with_capacity(columns * rows);

        for row in 0..rows {
            for column in 0..columns {
                let position = Vec2::new(column as f32 * spacing.x, row as f32 * spacing.y);
                ids.push(graph.add_node(position));
            }
        }

        for row in 0..rows {
            for column in 0..columns {
                let here = ids[row * columns + column];
                if column + 1 < columns {
                    graph.add_edge(here, ids[row * columns + column + 1], Some(width));
                }
                if row + 1 < rows {
                    graph.add_edge(here, ids[(row + 1) * columns + column], Some(width));
                }
            }
        }

        graph
    }

    pub fn default_width(&self) -> f32 {
        self.default_width
    }

    /// Add a node with a freshly allocated id.
    pub fn add_node(&mut self, position: Vec2) -> StreetNodeId {
        let id = StreetNodeId(self.next_node_id);
        self.next_node_id += 1;
        self.nodes.insert(id, StreetNode { id, position });
        id
    }

    /// Insert or overwrite a node with an externally assigned id.
    pub fn insert_node(&mut self, id: StreetNodeId, position: Vec2) {
        self.next_node_id = self.next_node_id.max(id.0 + 1);
        self.nodes.insert(id, StreetNode { id, position });
    }

    /// Move a node. Returns false if the node does not exist.
    pub fn move_node(&mut self, id: StreetNodeId, position: Vec2) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) => {
                node.position = position;
                true
            }
            None => false,
        }
    }

    /// Remove a node together with every edge that touches it.
    pub fn remove_node(&mut self, id: StreetNodeId) -> Option<StreetNode> {
        let removed = self.nodes.remove(&id)?;
        self.edges.retain(|_, edge| !edge.touches(id));
        Some(removed)
    }

    /// Connect two existing nodes. `None` width means the graph default.
    pub fn add_edge(
        &mut self,
        start: StreetNodeId,
        end: StreetNodeId,
        width: Option<f32>,
    ) -> Option<StreetEdgeId> {
        if start == end || !self.nodes.contains_key(&start) || !self.nodes.contains_key(&end) {
            return None;
        }

        let id = StreetEdgeId(self.next_edge_id);
        self.next_edge_id += 1;
        self.edges.insert(
            id,
            StreetEdge {
                id,
                start,
                end,
                width: width.unwrap_or(self.default_width),
            },
        );
        Some(id)
    }

    /// Change the width of an edge. Returns false if the edge does not exist.
    pub fn set_edge_width(&mut self, id: StreetEdgeId, width: f32) -> bool {
        match self.edges.get_mut(&id) {
            Some(edge) => {
                edge.width = width;
                true
            }
            None => false,
        }
    }

    pub fn remove_edge(&mut self, id: StreetEdgeId) -> Option<StreetEdge> {
        self.edges.remove(&id)
    }

    pub fn node(&self, id: StreetNodeId) -> Option<&StreetNode> {
        self.nodes.get(&id)
    }

    pub fn position(&self, id: StreetNodeId) -> Option<Vec2> {
        self.nodes.get(&id).map(|node| node.position)
    }

    pub fn edge(&self, id: StreetEdgeId) -> Option<&StreetEdge> {
        self.edges.get(&id)
    }

    /// All nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &StreetNode> {
        self.nodes.values()
    }

    /// All edges in id order.
    pub fn edges(&self) -> impl Iterator<Item = &StreetEdge> {
        self.edges.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Number of edges touching a node.
    pub fn node_degree(&self, id: StreetNodeId) -> usize {
        self.edges.values().filter(|edge| edge.touches(id)).count()
    }

    /// Find the edge between two nodes, in either direction.
    pub fn find_edge(&self, a: StreetNodeId, b: StreetNodeId) -> Option<StreetEdgeId> {
        self.edges
            .values()
            .find(|edge| edge.other(a) == Some(b))
            .map(|edge| edge.id)
    }

    /// Width of every edge keyed by id.
    pub fn edge_widths(&self) -> HashMap<StreetEdgeId, f32> {
        self.edges.values().map(|edge| (edge.id, edge.width)).collect()
    }

    /// Find the nearest node within a radius.
    pub fn find_nearest(&self, position: Vec2, max_distance: f32) -> Option<StreetNodeId> {
        let mut best: Option<(StreetNodeId, f32)> = None;

        for node in self.nodes.values() {
            let dist = position.distance(node.position);
            if dist <= max_distance && best.map_or(true, |(_, d)| dist < d) {
                best = Some((node.id, dist));
            }
        }

        best.map(|(id, _)| id)
    }

    /// Try to snap a position to an existing node, or create a new one.
    pub fn snap_or_create(&mut self, position: Vec2, snap_distance: f32) -> StreetNodeId {
        self.find_nearest(position, snap_distance)
            .unwrap_or_else(|| self.add_node(position))
    }
}
