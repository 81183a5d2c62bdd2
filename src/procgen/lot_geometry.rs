//! Polygon algebra shared by strip and lot generation.
//!
//! Polygons are ordered vertex lists, never explicitly closed (the last
//! vertex does not repeat the first). The tolerances below absorb the noise
//! coming out of the boundary offset and the straight skeleton.

use bevy::prelude::*;

/// Slice hits closer than this are the same hit (line through a vertex).
pub const SLICE_MERGE_DISTANCE: f32 = 0.01;
/// Consecutive vertices closer than this are collapsed.
pub const VERTEX_MERGE_DISTANCE: f32 = 0.01;
/// Slice pieces smaller than this are dropped.
pub const MIN_PIECE_AREA: f32 = 0.1;
/// Distance within which two edges count as lying on the same line.
pub const SHARED_EDGE_TOLERANCE: f32 = 0.5;

/// Signed area by the shoelace formula. Positive means counter-clockwise.
pub fn polygon_signed_area(vertices: &[Vec2]) -> f32 {
    let n = vertices.len();
    if n < 3 {
        return 0.0;
    }

    let mut area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        area += vertices[i].x * vertices[j].y;
        area -= vertices[j].x * vertices[i].y;
    }

    area / 2.0
}

pub fn polygon_area(vertices: &[Vec2]) -> f32 {
    polygon_signed_area(vertices).abs()
}

/// Calculate the centroid of a lot polygon (vertex average).
pub fn lot_centroid(vertices: &[Vec2]) -> Vec2 {
    if vertices.is_empty() {
        return Vec2::ZERO;
    }

    vertices.iter().copied().sum::<Vec2>() / vertices.len() as f32
}

/// Compute axis-aligned bounding box of a polygon.
pub fn polygon_bounds(vertices: &[Vec2]) -> (Vec2, Vec2) {
    let mut min = Vec2::splat(f32::MAX);
    let mut max = Vec2::splat(f32::MIN);

    for &v in vertices {
        min = min.min(v);
        max = max.max(v);
    }

    (min, max)
}

/// Iterate over the edges of a polygon, including the closing edge.
pub fn polygon_edges(vertices: &[Vec2]) -> impl Iterator<Item = (Vec2, Vec2)> + '_ {
    let n = vertices.len();
    (0..n).map(move |i| (vertices[i], vertices[(i + 1) % n]))
}

/// Even-odd point containment.
pub fn point_in_polygon(point: Vec2, vertices: &[Vec2]) -> bool {
    let mut inside = false;

    for (a, b) in polygon_edges(vertices) {
        if (a.y > point.y) != (b.y > point.y) {
            let x = a.x + (point.y - a.y) / (b.y - a.y) * (b.x - a.x);
            if point.x < x {
                inside = !inside;
            }
        }
    }

    inside
}

/// Distance from a point to a segment.
pub fn distance_to_segment(point: Vec2, a: Vec2, b: Vec2) -> f32 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq < f32::EPSILON {
        return point.distance(a);
    }

    let t = ((point - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    point.distance(a + ab * t)
}

/// Distance from a point to the polygon boundary.
pub fn distance_to_boundary(point: Vec2, vertices: &[Vec2]) -> f32 {
    polygon_edges(vertices)
        .map(|(a, b)| distance_to_segment(point, a, b))
        .fold(f32::MAX, f32::min)
}

/// Nearest boundary hit of a ray leaving `origin` along `direction`.
pub fn ray_polygon_hit(origin: Vec2, direction: Vec2, vertices: &[Vec2]) -> Option<Vec2> {
    let dir = direction.normalize_or_zero();
    if dir == Vec2::ZERO {
        return None;
    }

    let mut best: Option<f32> = None;
    for (a, b) in polygon_edges(vertices) {
        let edge = b - a;
        let denom = dir.perp_dot(edge);
        if denom.abs() < 1e-9 {
            continue;
        }
        let offset = a - origin;
        let t = offset.perp_dot(edge) / denom;
        let s = offset.perp_dot(dir) / denom;
        if t > 1e-3 && (-1e-6..=1.0 + 1e-6).contains(&s) && best.map_or(true, |bt| t < bt) {
            best = Some(t);
        }
    }

    best.map(|t| origin + dir * t)
}

/// Drop consecutive vertices closer than `tolerance`, including across the
/// closing edge.
pub fn dedup_vertices(vertices: &[Vec2], tolerance: f32) -> Vec<Vec2> {
    let mut result: Vec<Vec2> = Vec::with_capacity(vertices.len());

    for &v in vertices {
        if result.last().map_or(true, |last| last.distance(v) > tolerance) {
            result.push(v);
        }
    }

    while result.len() > 1 && result[0].distance(result[result.len() - 1]) <= tolerance {
        result.pop();
    }

    result
}

/// Remove vertices that lie on the straight line through their neighbours,
/// including zero-width spikes.
pub fn remove_collinear(vertices: &[Vec2]) -> Vec<Vec2> {
    let mut result = vertices.to_vec();

    loop {
        let n = result.len();
        if n <= 3 {
            return result;
        }

        let redundant = (0..n).find(|&i| {
            let prev = result[(i + n - 1) % n];
            let here = result[i];
            let next = result[(i + 1) % n];
            let a = here - prev;
            let b = next - here;
            a.perp_dot(b).abs() <= 1e-4 * a.length() * b.length()
        });

        match redundant {
            Some(i) => {
                result.remove(i);
            }
            None => return result,
        }
    }
}

/// Slice a polygon by the infinite line through `line_start` and `line_end`.
///
/// Returns exactly two pieces on success. Any other hit count returns the
/// input unchanged as a single piece, which callers treat as a failed slice.
/// Pieces that degenerate below three vertices or [`MIN_PIECE_AREA`] are
/// dropped, so a slice along an existing edge also yields fewer than two.
pub fn slice_polygon(vertices: &[Vec2], line_start: Vec2, line_end: Vec2) -> Vec<Vec<Vec2>> {
    let n = vertices.len();
    let dir = line_end - line_start;
    if n < 3 || dir.length_squared() < f32::EPSILON {
        return vec![vertices.to_vec()];
    }

    let mut hits: Vec<(usize, f32, Vec2)> = Vec::new();
    for i in 0..n {
        let a = vertices[i];
        let edge = vertices[(i + 1) % n] - a;
        let denom = edge.perp_dot(dir);
        if denom.abs() < 1e-9 {
            continue;
        }

        let t = (line_start - a).perp_dot(dir) / denom;
        if !(-1e-6..=1.0 + 1e-6).contains(&t) {
            continue;
        }

        let point = a + edge * t.clamp(0.0, 1.0);
        if hits
            .iter()
            .all(|(_, _, hit)| hit.distance(point) > SLICE_MERGE_DISTANCE)
        {
            hits.push((i, t, point));
        }
    }

    if hits.len() != 2 {
        return vec![vertices.to_vec()];
    }

    hits.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));
    let (first_edge, _, first) = hits[0];
    let (second_edge, _, second) = hits[1];
    if first_edge == second_edge {
        return vec![vertices.to_vec()];
    }

    let mut near = vec![first];
    near.extend((first_edge + 1..=second_edge).map(|i| vertices[i]));
    near.push(second);

    let mut far = vec![second];
    far.extend((second_edge + 1..=first_edge + n).map(|i| vertices[i % n]));
    far.push(first);

    [near, far]
        .into_iter()
        .map(|piece| dedup_vertices(&piece, VERTEX_MERGE_DISTANCE))
        .filter(|piece| piece.len() >= 3 && polygon_area(piece) >= MIN_PIECE_AREA)
        .collect()
}

/// Length of the overlap between two segments lying on a common line, or
/// `None` when they are not collinear within [`SHARED_EDGE_TOLERANCE`].
///
/// The returned segment lies on `a0`-`a1`, ordered in that direction.
fn collinear_overlap(a0: Vec2, a1: Vec2, b0: Vec2, b1: Vec2) -> Option<(Vec2, Vec2)> {
    let length = a0.distance(a1);
    if length < f32::EPSILON {
        return None;
    }

    let dir = (a1 - a0) / length;
    let off_line = |p: Vec2| (p - a0).perp_dot(dir).abs();
    if off_line(b0) > SHARED_EDGE_TOLERANCE || off_line(b1) > SHARED_EDGE_TOLERANCE {
        return None;
    }

    let t0 = (b0 - a0).dot(dir);
    let t1 = (b1 - a0).dot(dir);
    let lo = t0.min(t1).max(0.0);
    let hi = t0.max(t1).min(length);
    if hi - lo <= 0.0 {
        return None;
    }

    Some((a0 + dir * lo, a0 + dir * hi))
}

/// Longest collinear overlap between any edge of `first` and any edge of
/// `second`, as the actual overlapping sub-segment.
pub fn find_shared_edge(first: &[Vec2], second: &[Vec2]) -> Option<(Vec2, Vec2)> {
    let mut best: Option<(f32, (Vec2, Vec2))> = None;

    for (a0, a1) in polygon_edges(first) {
        for (b0, b1) in polygon_edges(second) {
            let Some((start, end)) = collinear_overlap(a0, a1, b0, b1) else {
                continue;
            };
            let overlap = start.distance(end);
            if overlap > SHARED_EDGE_TOLERANCE && best.map_or(true, |(len, _)| overlap > len) {
                best = Some((overlap, (start, end)));
            }
        }
    }

    best.map(|(_, segment)| segment)
}

/// Total length of polygon boundary lying along the segment `a`-`b`.
pub fn collinear_overlap_length(vertices: &[Vec2], a: Vec2, b: Vec2) -> f32 {
    polygon_edges(vertices)
        .filter_map(|(p, q)| collinear_overlap(a, b, p, q))
        .map(|(start, end)| start.distance(end))
        .sum()
}

/// Index of the edge that carries the segment `start`-`end`.
fn edge_containing(vertices: &[Vec2], start: Vec2, end: Vec2) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;

    for (i, (a, b)) in polygon_edges(vertices).enumerate() {
        let length = a.distance(b);
        if length < f32::EPSILON {
            continue;
        }
        let dir = (b - a) / length;
        let slack = SHARED_EDGE_TOLERANCE;
        let mut error = 0.0;
        let mut fits = true;
        for p in [start, end] {
            let off = (p - a).perp_dot(dir).abs();
            let along = (p - a).dot(dir);
            if off > slack || along < -slack || along > length + slack {
                fits = false;
                break;
            }
            error += off;
        }
        if fits && best.map_or(true, |(_, e)| error < e) {
            best = Some((i, error));
        }
    }

    best.map(|(i, _)| i)
}

/// Merge two polygons that share a (full or partial) collinear edge.
///
/// This is not a general polygon union: polygons that merely overlap, or
/// touch at a point, return `None`.
pub fn union_polygons(first: &[Vec2], second: &[Vec2]) -> Option<Vec<Vec2>> {
    if first.len() < 3 || second.len() < 3 {
        return None;
    }

    let first_area = polygon_signed_area(first);
    let mut second = second.to_vec();
    if (polygon_signed_area(&second) > 0.0) != (first_area > 0.0) {
        second.reverse();
    }

    let (shared_start, shared_end) = find_shared_edge(first, &second)?;
    let k1 = edge_containing(first, shared_start, shared_end)?;
    let k2 = edge_containing(&second, shared_start, shared_end)?;

    let n1 = first.len();
    let n2 = second.len();
    let a = first[k1];
    let b = first[(k1 + 1) % n1];
    let c = second[k2];
    let d = second[(k2 + 1) % n2];

    // Same orientation means the shared edges must run against each other.
    let along = b - a;
    if (d - c).dot(along) >= 0.0 {
        return None;
    }

    let (u0, u1) = if (shared_start - a).dot(along) <= (shared_end - a).dot(along) {
        (shared_start, shared_end)
    } else {
        (shared_end, shared_start)
    };

    let mut merged = Vec::with_capacity(n1 + n2 + 2);
    merged.extend((0..n1).map(|i| first[(k1 + 1 + i) % n1]));
    merged.push(u0);
    merged.extend((0..n2).map(|i| second[(k2 + 1 + i) % n2]));
    merged.push(u1);

    let merged = remove_collinear(&dedup_vertices(&merged, VERTEX_MERGE_DISTANCE));
    if merged.len() < 3 {
        return None;
    }

    let expected = first_area.abs() + polygon_area(&second);
    let actual = polygon_area(&merged);
    if (actual - expected).abs() > (expected * 0.01).max(1.0) {
        return None;
    }

    Some(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x0: f32, y0: f32, x1: f32, y1: f32) -> Vec<Vec2> {
        vec![
            Vec2::new(x0, y0),
            Vec2::new(x1, y0),
            Vec2::new(x1, y1),
            Vec2::new(x0, y1),
        ]
    }

    #[test]
    fn signed_area_follows_winding() {
        let square = rect(0.0, 0.0, 10.0, 10.0);
        assert_eq!(polygon_signed_area(&square), 100.0);

        let mut reversed = square.clone();
        reversed.reverse();
        assert_eq!(polygon_signed_area(&reversed), -100.0);
    }

    #[test]
    fn slicing_a_convex_polygon_preserves_area() {
        let hexagon = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(40.0, -10.0),
            Vec2::new(80.0, 0.0),
            Vec2::new(80.0, 50.0),
            Vec2::new(40.0, 60.0),
            Vec2::new(0.0, 50.0),
        ];

        let pieces = slice_polygon(&hexagon, Vec2::new(30.0, -100.0), Vec2::new(35.0, 100.0));

        assert_eq!(pieces.len(), 2);
        let total: f32 = pieces.iter().map(|p| polygon_area(p)).sum();
        assert!((total - polygon_area(&hexagon)).abs() < 0.01);
    }

    #[test]
    fn slicing_through_a_vertex_counts_one_hit() {
        let square = rect(0.0, 0.0, 10.0, 10.0);

        let pieces = slice_polygon(&square, Vec2::new(0.0, 0.0), Vec2::new(10.0, 10.0));

        assert_eq!(pieces.len(), 2);
        for piece in &pieces {
            assert_eq!(piece.len(), 3);
            assert!((polygon_area(piece) - 50.0).abs() < 1e-3);
        }
    }

    #[test]
    fn missing_the_polygon_returns_it_unsliced() {
        let square = rect(0.0, 0.0, 10.0, 10.0);
        let pieces = slice_polygon(&square, Vec2::new(20.0, 0.0), Vec2::new(20.0, 10.0));
        assert_eq!(pieces, vec![square]);
    }

    #[test]
    fn slicing_along_an_edge_does_not_yield_two_pieces() {
        let square = rect(0.0, 0.0, 10.0, 10.0);
        let pieces = slice_polygon(&square, Vec2::new(-5.0, 0.0), Vec2::new(15.0, 0.0));
        assert_ne!(pieces.len(), 2);
    }

    #[test]
    fn shared_edge_is_the_overlap() {
        let left = rect(0.0, 0.0, 10.0, 10.0);
        let right = rect(10.2, 4.0, 20.0, 30.0);

        let (a, b) = find_shared_edge(&left, &right).unwrap();

        assert!((a.distance(b) - 6.0).abs() < 1e-4);
        assert!(find_shared_edge(&left, &rect(30.0, 0.0, 40.0, 10.0)).is_none());
    }

    #[test]
    fn union_of_adjacent_rectangles() {
        let merged = union_polygons(&rect(0.0, 0.0, 10.0, 10.0), &rect(10.0, 0.0, 20.0, 10.0)).unwrap();

        assert_eq!(merged.len(), 4);
        assert!((polygon_area(&merged) - 200.0).abs() < 1e-3);
    }

    #[test]
    fn union_with_partial_overlap_makes_an_l_shape() {
        let merged = union_polygons(&rect(0.0, 0.0, 10.0, 10.0), &rect(10.0, 0.0, 20.0, 20.0)).unwrap();

        assert_eq!(merged.len(), 6);
        assert!((polygon_area(&merged) - 300.0).abs() < 1e-3);
    }

    #[test]
    fn union_accepts_opposite_windings() {
        let mut right = rect(10.0, 0.0, 20.0, 10.0);
        right.reverse();
        let merged = union_polygons(&rect(0.0, 0.0, 10.0, 10.0), &right).unwrap();
        assert!((polygon_area(&merged) - 200.0).abs() < 1e-3);
    }

    #[test]
    fn union_without_shared_edge_fails() {
        assert!(union_polygons(&rect(0.0, 0.0, 10.0, 10.0), &rect(10.0, 10.0, 20.0, 20.0)).is_none());
    }

    #[test]
    fn ray_hits_the_far_side() {
        let square = rect(0.0, 0.0, 10.0, 10.0);
        let hit = ray_polygon_hit(Vec2::new(5.0, 5.0), Vec2::X, &square).unwrap();
        assert!(hit.distance(Vec2::new(10.0, 5.0)) < 1e-4);
    }

    #[test]
    fn collinear_cleanup_drops_straight_vertices() {
        let with_midpoint = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(5.0, 0.0),
            Vec2::new(10.0, 0.0),
            Vec2::new(10.0, 10.0),
            Vec2::new(0.0, 10.0),
        ];
        assert_eq!(remove_collinear(&with_midpoint).len(), 4);
    }

    #[test]
    fn containment_and_frontage_overlap() {
        let square = rect(0.0, 0.0, 10.0, 10.0);
        assert!(point_in_polygon(Vec2::new(5.0, 5.0), &square));
        assert!(!point_in_polygon(Vec2::new(15.0, 5.0), &square));

        let overlap = collinear_overlap_length(&square, Vec2::new(-5.0, 0.2), Vec2::new(6.0, 0.2));
        assert!((overlap - 6.0).abs() < 1e-4);
    }
}
