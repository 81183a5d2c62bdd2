//! Procedural subdivision of the street network.
//!
//! - Planar face detection for city blocks
//! - Street-width inset of block outlines
//! - Straight skeleton strips
//! - Ray-cut lots with merge validation
//! - Debounced rebuild cache

use bevy::prelude::*;

pub mod block_extractor;
pub mod block_offset;
pub mod lot_geometry;
pub mod parcels;
pub mod pipeline;
pub mod skeleton;
pub mod street_graph;
pub mod strips;

pub struct ProcgenPlugin;

impl Plugin for ProcgenPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(pipeline::CityPipelinePlugin);
    }
}
