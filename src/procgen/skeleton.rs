//! Straight skeleton of a simple polygon.
//!
//! Runs a wavefront simulation: every boundary edge moves inward at unit
//! speed, wavefront vertices slide along the bisectors of their two edges,
//! and the polygon collapses through edge events (an edge shrinks to
//! nothing) and split events (a reflex vertex runs into an opposite edge).
//! The traces of the wavefront vertices are the skeleton arcs.
//!
//! Each boundary edge owns exactly one face: the edge itself plus the chain
//! of arcs between its two endpoints.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use bevy::math::DVec2;
use bevy::prelude::*;
use thiserror::Error;

const EPSILON: f64 = 1e-9;
/// Slack for "is this point between the two bisectors" tests.
const WEDGE_TOLERANCE: f64 = 1e-6;

/// Reasons the skeleton of a polygon cannot be built.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SkeletonError {
    #[error("polygon needs at least 3 vertices, got {0}")]
    TooFewVertices(usize),
    #[error("polygon has no area")]
    ZeroArea,
    #[error("edge {0} has zero length")]
    ZeroLengthEdge(usize),
    #[error("edges {0} and {1} intersect")]
    SelfIntersecting(usize, usize),
    #[error("wavefront did not collapse within {0} events")]
    EventLimit(usize),
    #[error("face of edge {0} does not close")]
    OpenFace(usize),
}

/// A skeleton arc between two skeleton nodes, separating the faces of its
/// two wavefront edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SkeletonArc {
    from: usize,
    to: usize,
    left_edge: usize,
    right_edge: usize,
}

/// The region swept by one boundary edge.
#[derive(Clone, Debug)]
pub struct SkeletonFace {
    /// Index of the boundary edge (`polygon[edge]` to `polygon[edge + 1]`).
    pub edge: usize,
    /// Counter-clockwise outline starting with the boundary edge.
    pub polygon: Vec<Vec2>,
}

/// Result of [`StraightSkeleton::build`]: one face per input edge, sorted by
/// edge index. Edge indices always refer to the input polygon.
#[derive(Clone, Debug)]
pub struct StraightSkeleton {
    pub faces: Vec<SkeletonFace>,
}

impl StraightSkeleton {
    /// Build the skeleton of a simple polygon of either winding.
    pub fn build(polygon: &[Vec2]) -> Result<Self, SkeletonError> {
        let n = polygon.len();
        if n < 3 {
            return Err(SkeletonError::TooFewVertices(n));
        }

        let mut points: Vec<DVec2> = polygon.iter().map(|p| p.as_dvec2()).collect();
        let area = signed_area(&points);
        if area.abs() < EPSILON {
            return Err(SkeletonError::ZeroArea);
        }

        // Work counter-clockwise; a clockwise input is reversed and its edge
        // indices mapped back at the end.
        let reversed = area < 0.0;
        if reversed {
            points.reverse();
        }
        let to_input_edge = |edge: usize| {
            if reversed {
                (2 * n - 2 - edge) % n
            } else {
                edge
            }
        };

        validate(&points).map_err(|err| match err {
            SkeletonError::ZeroLengthEdge(e) => SkeletonError::ZeroLengthEdge(to_input_edge(e)),
            SkeletonError::SelfIntersecting(a, b) => {
                SkeletonError::SelfIntersecting(to_input_edge(a), to_input_edge(b))
            }
            other => other,
        })?;

        let mut wavefront = Wavefront::new(&points);
        wavefront.run()?;

        let mut faces = Vec::with_capacity(n);
        for edge in 0..n {
            let polygon = wavefront
                .face(edge)
                .ok_or(SkeletonError::OpenFace(to_input_edge(edge)))?;
            faces.push(SkeletonFace {
                edge: to_input_edge(edge),
                polygon,
            });
        }
        faces.sort_by_key(|face| face.edge);

        Ok(Self { faces })
    }

    /// The face swept by a given input edge.
    pub fn face(&self, edge: usize) -> Option<&SkeletonFace> {
        self.faces.iter().find(|face| face.edge == edge)
    }
}

fn signed_area(points: &[DVec2]) -> f64 {
    let n = points.len();
    (0..n)
        .map(|i| points[i].perp_dot(points[(i + 1) % n]))
        .sum::<f64>()
        / 2.0
}

fn validate(points: &[DVec2]) -> Result<(), SkeletonError> {
    let n = points.len();

    for i in 0..n {
        if points[i].distance(points[(i + 1) % n]) < 1e-6 {
            return Err(SkeletonError::ZeroLengthEdge(i));
        }
    }

    for i in 0..n {
        for j in i + 1..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            if adjacent {
                continue;
            }
            if segments_touch(points[i], points[(i + 1) % n], points[j], points[(j + 1) % n]) {
                return Err(SkeletonError::SelfIntersecting(i, j));
            }
        }
    }

    Ok(())
}

fn orientation(a: DVec2, b: DVec2, c: DVec2) -> f64 {
    (b - a).perp_dot(c - a)
}

fn segments_touch(a: DVec2, b: DVec2, c: DVec2, d: DVec2) -> bool {
    let o1 = orientation(a, b, c);
    let o2 = orientation(a, b, d);
    let o3 = orientation(c, d, a);
    let o4 = orientation(c, d, b);

    if o1 * o2 < 0.0 && o3 * o4 < 0.0 {
        return true;
    }

    let on_segment = |p: DVec2, q: DVec2, r: DVec2, o: f64| {
        o.abs() < EPSILON
            && r.x >= p.x.min(q.x) - EPSILON
            && r.x <= p.x.max(q.x) + EPSILON
            && r.y >= p.y.min(q.y) - EPSILON
            && r.y <= p.y.max(q.y) + EPSILON
    };

    on_segment(a, b, c, o1) || on_segment(a, b, d, o2) || on_segment(c, d, a, o3) || on_segment(c, d, b, o4)
}

/// Forward intersection of two rays.
fn ray_intersection(p: DVec2, d: DVec2, q: DVec2, e: DVec2) -> Option<DVec2> {
    let det = d.perp_dot(e);
    let offset = q - p;

    if det.abs() < EPSILON {
        // Parallel: only rays running head-on along the same line meet.
        if offset.perp_dot(d).abs() > 1e-7 || d.dot(e) >= 0.0 || offset.dot(d) < 0.0 {
            return None;
        }
        return Some((p + q) * 0.5);
    }

    let s = offset.perp_dot(e) / det;
    let u = offset.perp_dot(d) / det;
    if s < -1e-7 || u < -1e-7 {
        return None;
    }

    Some(p + d * s.max(0.0))
}

/// A boundary edge line, moving inward along `normal` at unit speed.
struct WaveEdge {
    start: DVec2,
    dir: DVec2,
    normal: DVec2,
}

impl WaveEdge {
    /// Time at which this edge's wavefront passes through `point`.
    fn distance(&self, point: DVec2) -> f64 {
        (point - self.start).dot(self.normal)
    }
}

struct WaveVertex {
    point: DVec2,
    time: f64,
    node: usize,
    edge_left: usize,
    edge_right: usize,
    dir: DVec2,
    /// True velocity, `None` when both edges are antiparallel and the vertex
    /// only slides along the collapsed spine.
    velocity: Option<DVec2>,
    reflex: bool,
    prev: usize,
    next: usize,
    valid: bool,
}

#[derive(Clone, Copy, Debug)]
enum EventKind {
    Edge { a: usize, b: usize },
    Split { vertex: usize, edge: usize },
}

#[derive(Clone, Copy, Debug)]
struct Event {
    time: f64,
    point: DVec2,
    kind: EventKind,
    seq: usize,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    // Reversed: BinaryHeap pops the earliest event first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Wavefront {
    edges: Vec<WaveEdge>,
    vertices: Vec<WaveVertex>,
    nodes: Vec<DVec2>,
    arcs: Vec<SkeletonArc>,
    queue: BinaryHeap<Event>,
    seq: usize,
    time: f64,
}

impl Wavefront {
    fn new(points: &[DVec2]) -> Self {
        let n = points.len();
        let edges = (0..n)
            .map(|i| {
                let dir = (points[(i + 1) % n] - points[i]).normalize();
                WaveEdge {
                    start: points[i],
                    dir,
                    normal: dir.perp(),
                }
            })
            .collect();

        let mut wavefront = Self {
            edges,
            vertices: Vec::with_capacity(n * 2),
            nodes: points.to_vec(),
            arcs: Vec::new(),
            queue: BinaryHeap::new(),
            seq: 0,
            time: 0.0,
        };

        for i in 0..n {
            let left = (i + n - 1) % n;
            let vertex = wavefront.make_vertex(points[i], 0.0, i, left, i, DVec2::ZERO);
            wavefront.vertices.push(vertex);
        }
        for i in 0..n {
            wavefront.vertices[i].prev = (i + n - 1) % n;
            wavefront.vertices[i].next = (i + 1) % n;
        }

        wavefront
    }

    fn make_vertex(
        &self,
        point: DVec2,
        time: f64,
        node: usize,
        edge_left: usize,
        edge_right: usize,
        hint: DVec2,
    ) -> WaveVertex {
        let left = &self.edges[edge_left];
        let right = &self.edges[edge_right];
        let det = left.normal.perp_dot(right.normal);

        let (dir, velocity) = if det.abs() > 1e-7 {
            let velocity = DVec2::new(
                (right.normal.y - left.normal.y) / det,
                (left.normal.x - right.normal.x) / det,
            );
            (velocity.normalize(), Some(velocity))
        } else if left.normal.dot(right.normal) > 0.0 {
            (left.normal, Some(left.normal))
        } else if hint.length_squared() > EPSILON {
            (hint.normalize(), None)
        } else {
            (right.dir, None)
        };

        WaveVertex {
            point,
            time,
            node,
            edge_left,
            edge_right,
            dir,
            velocity,
            reflex: left.dir.perp_dot(right.dir) < -EPSILON,
            prev: 0,
            next: 0,
            valid: true,
        }
    }

    fn push_event(&mut self, time: f64, point: DVec2, kind: EventKind) {
        if time < self.time - 1e-6 {
            return;
        }
        self.seq += 1;
        self.queue.push(Event {
            time: time.max(self.time),
            point,
            kind,
            seq: self.seq,
        });
    }

    /// Queue every event this vertex may take part in. Stale ones are
    /// filtered when popped.
    fn queue_events(&mut self, v: usize) {
        let (point, dir, prev, next, edge_left, edge_right, reflex) = {
            let vertex = &self.vertices[v];
            (
                vertex.point,
                vertex.dir,
                vertex.prev,
                vertex.next,
                vertex.edge_left,
                vertex.edge_right,
                vertex.reflex,
            )
        };

        let prev_vertex = &self.vertices[prev];
        if let Some(x) = ray_intersection(prev_vertex.point, prev_vertex.dir, point, dir) {
            let time = self.edges[edge_left].distance(x);
            self.push_event(time, x, EventKind::Edge { a: prev, b: v });
        }

        let next_vertex = &self.vertices[next];
        if let Some(x) = ray_intersection(point, dir, next_vertex.point, next_vertex.dir) {
            let time = self.edges[edge_right].distance(x);
            self.push_event(time, x, EventKind::Edge { a: v, b: next });
        }

        if reflex {
            for edge in 0..self.edges.len() {
                if edge == edge_left || edge == edge_right {
                    continue;
                }
                if let Some((time, x)) = self.split_candidate(v, edge) {
                    self.push_event(time, x, EventKind::Split { vertex: v, edge });
                }
            }
        }
    }

    /// When and where vertex `v` would hit the wavefront line of `edge`.
    fn split_candidate(&self, v: usize, edge: usize) -> Option<(f64, DVec2)> {
        let vertex = &self.vertices[v];
        let velocity = vertex.velocity?;
        let line = &self.edges[edge];

        let closing = velocity.dot(line.normal);
        let approach = 1.0 - closing;
        if approach <= EPSILON {
            return None;
        }

        let time = (line.distance(vertex.point) - closing * vertex.time) / approach;
        if time < vertex.time - 1e-7 {
            return None;
        }

        Some((time, vertex.point + velocity * (time - vertex.time)))
    }

    fn run(&mut self) -> Result<(), SkeletonError> {
        let n = self.edges.len();
        for v in 0..n {
            self.queue_events(v);
        }

        let limit = 4 * (n + 2) * (n + 2) + 64;
        let mut processed = 0;

        while let Some(event) = self.queue.pop() {
            processed += 1;
            if processed > limit {
                return Err(SkeletonError::EventLimit(limit));
            }

            match event.kind {
                EventKind::Edge { a, b } => self.handle_edge_event(event, a, b),
                EventKind::Split { vertex, edge } => self.handle_split_event(event, vertex, edge),
            }
        }

        Ok(())
    }

    fn add_node(&mut self, point: DVec2) -> usize {
        self.nodes.push(point);
        self.nodes.len() - 1
    }

    fn add_arc(&mut self, vertex: usize, node: usize) {
        let v = &self.vertices[vertex];
        if v.node == node {
            return;
        }
        self.arcs.push(SkeletonArc {
            from: v.node,
            to: node,
            left_edge: v.edge_left,
            right_edge: v.edge_right,
        });
    }

    fn lav_len(&self, start: usize) -> usize {
        let mut count = 1;
        let mut current = self.vertices[start].next;
        while current != start && count <= self.vertices.len() {
            count += 1;
            current = self.vertices[current].next;
        }
        count
    }

    fn handle_edge_event(&mut self, event: Event, a: usize, b: usize) {
        if !self.vertices[a].valid || !self.vertices[b].valid || self.vertices[a].next != b {
            return;
        }

        self.time = event.time;
        let node = self.add_node(event.point);

        // Last triangle of this wavefront: everything meets in one node.
        if self.vertices[a].prev == self.vertices[b].next {
            let c = self.vertices[a].prev;
            for v in [a, b, c] {
                self.add_arc(v, node);
                self.vertices[v].valid = false;
            }
            return;
        }

        self.add_arc(a, node);
        self.add_arc(b, node);

        let hint = self.vertices[a].dir + self.vertices[b].dir;
        let (edge_left, edge_right) = (self.vertices[a].edge_left, self.vertices[b].edge_right);
        let (prev, next) = (self.vertices[a].prev, self.vertices[b].next);

        let mut merged = self.make_vertex(event.point, event.time, node, edge_left, edge_right, hint);
        merged.prev = prev;
        merged.next = next;
        let w = self.vertices.len();
        self.vertices.push(merged);

        self.vertices[prev].next = w;
        self.vertices[next].prev = w;
        self.vertices[a].valid = false;
        self.vertices[b].valid = false;

        self.settle(w);
    }

    fn handle_split_event(&mut self, event: Event, v: usize, edge: usize) {
        if !self.vertices[v].valid {
            return;
        }

        // Find the live wavefront segment of `edge` that contains the point.
        let segment = (0..self.vertices.len()).find(|&x| {
            let start = &self.vertices[x];
            if !start.valid || start.edge_right != edge || x == v || start.next == v {
                return false;
            }
            let end = &self.vertices[start.next];
            start.dir.perp_dot(event.point - start.point) <= WEDGE_TOLERANCE
                && end.dir.perp_dot(event.point - end.point) >= -WEDGE_TOLERANCE
        });
        let Some(x) = segment else {
            return;
        };
        let y = self.vertices[x].next;

        self.time = event.time;
        let node = self.add_node(event.point);
        self.add_arc(v, node);

        let (prev, next) = (self.vertices[v].prev, self.vertices[v].next);
        let (edge_left, edge_right) = (self.vertices[v].edge_left, self.vertices[v].edge_right);

        let mut first = self.make_vertex(event.point, event.time, node, edge_left, edge, DVec2::ZERO);
        first.prev = prev;
        first.next = y;
        let mut second = self.make_vertex(event.point, event.time, node, edge, edge_right, DVec2::ZERO);
        second.prev = x;
        second.next = next;

        let w1 = self.vertices.len();
        self.vertices.push(first);
        let w2 = self.vertices.len();
        self.vertices.push(second);

        self.vertices[prev].next = w1;
        self.vertices[y].prev = w1;
        self.vertices[x].next = w2;
        self.vertices[next].prev = w2;
        self.vertices[v].valid = false;

        self.settle(w1);
        self.settle(w2);
    }

    /// Close degenerate wavefronts left behind by an event, or queue the new
    /// vertex's events.
    fn settle(&mut self, w: usize) {
        match self.lav_len(w) {
            0 | 1 => self.vertices[w].valid = false,
            2 => {
                let other = self.vertices[w].next;
                let other_node = self.vertices[other].node;
                self.add_arc(w, other_node);
                self.vertices[w].valid = false;
                self.vertices[other].valid = false;
            }
            _ => self.queue_events(w),
        }
    }

    /// Outline of the face swept by `edge`, counter-clockwise.
    fn face(&self, edge: usize) -> Option<Vec<Vec2>> {
        let n = self.edges.len();
        let start = edge;
        let end = (edge + 1) % n;

        let arcs: Vec<&SkeletonArc> = self
            .arcs
            .iter()
            .filter(|arc| arc.left_edge == edge || arc.right_edge == edge)
            .collect();
        let mut used = vec![false; arcs.len()];

        let mut outline = vec![self.nodes[start], self.nodes[end]];
        let mut current = end;
        for _ in 0..=arcs.len() {
            let step = arcs.iter().enumerate().find_map(|(i, arc)| {
                if used[i] {
                    None
                } else if arc.from == current {
                    Some((i, arc.to))
                } else if arc.to == current {
                    Some((i, arc.from))
                } else {
                    None
                }
            });
            let (i, next) = step?;
            used[i] = true;
            if next == start {
                let outline: Vec<Vec2> = outline.iter().map(|p| p.as_vec2()).collect();
                return Some(dedup_outline(outline));
            }
            outline.push(self.nodes[next]);
            current = next;
        }

        None
    }
}

fn dedup_outline(points: Vec<Vec2>) -> Vec<Vec2> {
    let mut result: Vec<Vec2> = Vec::with_capacity(points.len());
    for p in points {
        if result.last().map_or(true, |last| last.distance(p) > 1e-5) {
            result.push(p);
        }
    }
    while result.len() > 1 && result[0].distance(result[result.len() - 1]) <= 1e-5 {
        result.pop();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procgen::lot_geometry::{polygon_area, polygon_signed_area};

    fn rect(x0: f32, y0: f32, x1: f32, y1: f32) -> Vec<Vec2> {
        vec![
            Vec2::new(x0, y0),
            Vec2::new(x1, y0),
            Vec2::new(x1, y1),
            Vec2::new(x0, y1),
        ]
    }

    fn assert_faces_tile(polygon: &[Vec2], skeleton: &StraightSkeleton) {
        assert_eq!(skeleton.faces.len(), polygon.len());
        let total: f32 = skeleton.faces.iter().map(|f| polygon_area(&f.polygon)).sum();
        assert!(
            (total - polygon_area(polygon)).abs() < 1e-3 * polygon_area(polygon),
            "faces cover {total}, polygon {}",
            polygon_area(polygon)
        );
        for face in &skeleton.faces {
            assert!(polygon_signed_area(&face.polygon) > 0.0);
        }
    }

    #[test]
    fn rectangle_has_a_horizontal_spine() {
        let polygon = rect(5.0, 5.0, 95.0, 55.0);
        let skeleton = StraightSkeleton::build(&polygon).unwrap();

        assert_faces_tile(&polygon, &skeleton);

        let bottom = skeleton.face(0).unwrap();
        assert_eq!(bottom.polygon.len(), 4);
        assert!(bottom.polygon.iter().any(|p| p.distance(Vec2::new(30.0, 30.0)) < 1e-3));
        assert!(bottom.polygon.iter().any(|p| p.distance(Vec2::new(70.0, 30.0)) < 1e-3));

        let left = skeleton.face(3).unwrap();
        assert_eq!(left.polygon.len(), 3);
    }

    #[test]
    fn collinear_vertex_keeps_both_faces() {
        let polygon = vec![
            Vec2::new(5.0, 5.0),
            Vec2::new(50.0, 5.0),
            Vec2::new(95.0, 5.0),
            Vec2::new(95.0, 55.0),
            Vec2::new(5.0, 55.0),
        ];
        let skeleton = StraightSkeleton::build(&polygon).unwrap();

        assert_faces_tile(&polygon, &skeleton);
        assert!(skeleton.faces.iter().all(|face| polygon_area(&face.polygon) > 1.0));
    }

    #[test]
    fn square_collapses_to_its_centre() {
        let polygon = rect(0.0, 0.0, 10.0, 10.0);
        let skeleton = StraightSkeleton::build(&polygon).unwrap();

        assert_faces_tile(&polygon, &skeleton);
        for face in &skeleton.faces {
            assert_eq!(face.polygon.len(), 3);
            assert!(face.polygon[2].distance(Vec2::new(5.0, 5.0)) < 1e-3);
        }
    }

    #[test]
    fn clockwise_input_keeps_its_edge_indices() {
        let mut polygon = rect(5.0, 5.0, 95.0, 55.0);
        polygon.reverse();
        let skeleton = StraightSkeleton::build(&polygon).unwrap();

        assert_faces_tile(&polygon, &skeleton);
        // Edge 2 runs (95,5) -> (5,5) after reversal.
        let face = skeleton.face(2).unwrap();
        assert!(face.polygon.iter().any(|p| p.distance(Vec2::new(95.0, 5.0)) < 1e-3));
        assert!(face.polygon.iter().any(|p| p.distance(Vec2::new(5.0, 5.0)) < 1e-3));
        assert_eq!(face.polygon.len(), 4);
    }

    #[test]
    fn concave_polygon_splits_its_wavefront() {
        let polygon = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(100.0, 0.0),
            Vec2::new(100.0, 40.0),
            Vec2::new(60.0, 40.0),
            Vec2::new(60.0, 100.0),
            Vec2::new(0.0, 100.0),
        ];
        let skeleton = StraightSkeleton::build(&polygon).unwrap();
        assert_faces_tile(&polygon, &skeleton);
    }

    #[test]
    fn notched_rectangle_needs_a_split_event() {
        let polygon = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(200.0, 0.0),
            Vec2::new(200.0, 60.0),
            Vec2::new(100.0, 45.0),
            Vec2::new(0.0, 60.0),
        ];
        let skeleton = StraightSkeleton::build(&polygon).unwrap();
        assert_faces_tile(&polygon, &skeleton);
    }

    #[test]
    fn irregular_pentagon() {
        let polygon = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(80.0, -5.0),
            Vec2::new(110.0, 40.0),
            Vec2::new(50.0, 75.0),
            Vec2::new(-10.0, 45.0),
        ];
        let skeleton = StraightSkeleton::build(&polygon).unwrap();
        assert_faces_tile(&polygon, &skeleton);
    }

    #[test]
    fn invalid_polygons_are_rejected() {
        assert_eq!(
            StraightSkeleton::build(&[Vec2::ZERO, Vec2::X]).unwrap_err(),
            SkeletonError::TooFewVertices(2)
        );

        let bowtie = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(10.0, 10.0),
            Vec2::new(10.0, 0.0),
            Vec2::new(0.0, 10.0),
        ];
        assert!(matches!(
            StraightSkeleton::build(&bowtie),
            Err(SkeletonError::SelfIntersecting(..)) | Err(SkeletonError::ZeroArea)
        ));

        let repeated = vec![Vec2::ZERO, Vec2::ZERO, Vec2::new(10.0, 0.0), Vec2::new(0.0, 10.0)];
        assert_eq!(
            StraightSkeleton::build(&repeated).unwrap_err(),
            SkeletonError::ZeroLengthEdge(0)
        );
    }
}
