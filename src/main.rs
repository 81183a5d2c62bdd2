//! City blocks demo
//!
//! Headless run of the subdivision pipeline: lays out a street grid, waits
//! for the debounced rebuild, drags one intersection and reports the
//! regenerated city before exiting.

use std::time::Duration;

use bevy::app::{AppExit, ScheduleRunnerPlugin};
use bevy::log::LogPlugin;
use bevy::prelude::*;

use city_blocks::procgen::pipeline::CityRebuilt;
use city_blocks::procgen::street_graph::StreetGraph;
use city_blocks::procgen::ProcgenPlugin;

/// Intersection the demo drags after the first rebuild.
const DRAGGED_NODE: Vec2 = Vec2::new(240.0, 160.0);

fn main() -> AppExit {
    App::new()
        .add_plugins(MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(
            Duration::from_secs_f64(1.0 / 60.0),
        )))
        .add_plugins(LogPlugin::default())
        // Procedural generation
        .add_plugins(ProcgenPlugin)
        .insert_resource(StreetGraph::grid(5, 4, Vec2::new(120.0, 80.0), 12.0))
        .add_systems(Update, drive_demo)
        .run()
}

fn drive_demo(
    mut rebuilt: EventReader<CityRebuilt>,
    mut graph: ResMut<StreetGraph>,
    mut exit: EventWriter<AppExit>,
) {
    for event in rebuilt.read() {
        let generation = &event.generation;
        let lot_area: f32 = generation.lots.iter().map(|lot| lot.area).sum();
        info!(
            "Generation {}: {} blocks, {} strips, {} lots covering {:.0} m²",
            generation.number,
            generation.blocks.len(),
            generation.strips.len(),
            generation.lots.len(),
            lot_area
        );

        if generation.number > 1 {
            exit.send(AppExit::Success);
            continue;
        }

        match graph.find_nearest(DRAGGED_NODE, 1.0) {
            Some(node) => {
                graph.move_node(node, DRAGGED_NODE + Vec2::new(18.0, 12.0));
                info!("Dragged intersection {:?}", node);
            }
            None => {
                warn!("No intersection near {:?}, stopping", DRAGGED_NODE);
                exit.send(AppExit::Success);
            }
        }
    }
}
