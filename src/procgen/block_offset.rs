//! Inset a block boundary by half the width of each bounding street.
//!
//! The result is the buildable outline of the block: same corner count as
//! the street centreline polygon, each corner pulled inward to the miter
//! point of its two offset edges.

use std::collections::HashMap;

use bevy::prelude::*;

use super::block_extractor::DetectedBlock;
use super::lot_geometry::polygon_signed_area;
use super::street_graph::StreetEdgeId;

/// A corner moves at most this many half-widths away from the original vertex.
pub const MITER_LIMIT: f32 = 3.0;
/// Offset outlines smaller than this are degenerate.
pub const MIN_OFFSET_AREA: f32 = 1.0;

/// Inset outline of `block`, or `None` when the inset collapses.
///
/// Edge `i` of the block polygon uses the width of `block.edge_ids[i]`,
/// falling back to `default_width` for edges missing from `edge_widths`.
pub fn offset_block_boundary(
    block: &DetectedBlock,
    edge_widths: &HashMap<StreetEdgeId, f32>,
    default_width: f32,
) -> Option<Vec<Vec2>> {
    let half_widths: Vec<f32> = (0..block.polygon.len())
        .map(|i| {
            block
                .edge_ids
                .get(i)
                .and_then(|id| edge_widths.get(id))
                .copied()
                .unwrap_or(default_width)
                * 0.5
        })
        .collect();

    offset_polygon(&block.polygon, &half_widths)
}

/// Inset `polygon` where edge `i` (from vertex `i` to `i + 1`) moves inward
/// by `half_widths[i]`.
pub fn offset_polygon(polygon: &[Vec2], half_widths: &[f32]) -> Option<Vec<Vec2>> {
    let n = polygon.len();
    if n < 3 || half_widths.len() != n {
        return None;
    }

    let original_area = polygon_signed_area(polygon);
    if original_area == 0.0 {
        return None;
    }
    // Left perpendicular points inside a counter-clockwise polygon.
    let inward = original_area.signum();

    let mut offset = Vec::with_capacity(n);
    for i in 0..n {
        let prev = (i + n - 1) % n;
        let corner = polygon[i];
        let incoming = (corner - polygon[prev]).normalize_or_zero();
        let outgoing = (polygon[(i + 1) % n] - corner).normalize_or_zero();
        let h_in = half_widths[prev];
        let h_out = half_widths[i];

        let on_incoming = corner + incoming.perp() * inward * h_in;
        let on_outgoing = corner + outgoing.perp() * inward * h_out;

        let cross = incoming.perp_dot(outgoing);
        let miter = if cross.abs() < 1e-6 {
            (on_incoming + on_outgoing) * 0.5
        } else {
            let s = (on_outgoing - on_incoming).perp_dot(outgoing) / cross;
            on_incoming + incoming * s
        };

        let limit = MITER_LIMIT * h_in.max(h_out);
        let shift = miter - corner;
        if shift.length() > limit {
            offset.push(corner + shift.normalize_or_zero() * limit);
        } else {
            offset.push(miter);
        }
    }

    let offset_area = polygon_signed_area(&offset);
    if offset_area.signum() != original_area.signum() || offset_area.abs() < MIN_OFFSET_AREA {
        return None;
    }

    Some(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procgen::block_extractor::BlockId;
    use crate::procgen::street_graph::StreetNodeId;

    fn block(polygon: Vec<Vec2>) -> DetectedBlock {
        let n = polygon.len();
        DetectedBlock {
            id: BlockId(0),
            node_ids: (0..n as u64).map(StreetNodeId).collect(),
            edge_ids: (0..n as u64).map(StreetEdgeId).collect(),
            signed_area: polygon_signed_area(&polygon),
            polygon,
            is_exterior: false,
        }
    }

    fn rectangle() -> Vec<Vec2> {
        vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(100.0, 0.0),
            Vec2::new(100.0, 60.0),
            Vec2::new(0.0, 60.0),
        ]
    }

    #[test]
    fn rectangle_loses_half_a_street_on_every_side() {
        let offset = offset_block_boundary(&block(rectangle()), &HashMap::new(), 10.0).unwrap();

        assert_eq!(offset.len(), 4);
        assert!((polygon_signed_area(&offset) - 4500.0).abs() < 1e-2);
        assert!(offset[0].distance(Vec2::new(5.0, 5.0)) < 1e-4);
        assert!(offset[2].distance(Vec2::new(95.0, 55.0)) < 1e-4);
    }

    #[test]
    fn per_edge_widths_are_respected() {
        let mut widths = HashMap::new();
        widths.insert(StreetEdgeId(0), 20.0);

        let offset = offset_block_boundary(&block(rectangle()), &widths, 10.0).unwrap();

        assert!((polygon_signed_area(&offset) - 90.0 * 45.0).abs() < 1e-2);
        assert!((offset[0].y - 10.0).abs() < 1e-4);
    }

    #[test]
    fn clockwise_blocks_keep_their_winding() {
        let mut polygon = rectangle();
        polygon.reverse();

        let offset = offset_block_boundary(&block(polygon), &HashMap::new(), 10.0).unwrap();

        assert!((polygon_signed_area(&offset) + 4500.0).abs() < 1e-2);
    }

    #[test]
    fn sliver_triangle_collapses() {
        let sliver = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(100.0, 0.0),
            Vec2::new(100.0, 0.5),
        ];

        assert!(offset_block_boundary(&block(sliver), &HashMap::new(), 10.0).is_none());
    }

    #[test]
    fn acute_corners_are_clamped() {
        let wedge = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(200.0, 0.0),
            Vec2::new(200.0, 30.0),
        ];

        let offset = offset_block_boundary(&block(wedge.clone()), &HashMap::new(), 10.0).unwrap();

        for (corner, moved) in wedge.iter().zip(&offset) {
            assert!(corner.distance(*moved) <= MITER_LIMIT * 5.0 + 1e-3);
        }
        assert!(polygon_signed_area(&offset) > 0.0);
    }

    #[test]
    fn collinear_corners_use_the_midpoint() {
        let polygon = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(50.0, 0.0),
            Vec2::new(100.0, 0.0),
            Vec2::new(100.0, 60.0),
            Vec2::new(0.0, 60.0),
        ];

        let offset = offset_block_boundary(&block(polygon), &HashMap::new(), 10.0).unwrap();

        assert!(offset[1].distance(Vec2::new(50.0, 5.0)) < 1e-4);
    }
}
