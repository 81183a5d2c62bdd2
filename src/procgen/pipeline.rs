//! Derived-geometry cache for the street graph.
//!
//! Street edits mark the pipeline dirty; a debounce timer collapses a burst
//! of edits into one rebuild. A rebuild runs block detection, boundary
//! offset, strip generation and lot subdivision in that order and publishes
//! the result as one immutable [`CityGeneration`].

use std::sync::Arc;
use std::time::Duration;

use bevy::prelude::*;

use super::block_extractor::{detect_blocks, interior_blocks, DetectedBlock};
use super::block_offset::offset_block_boundary;
use super::parcels::{subdivide_strip, GeneratedLot, LotRules};
use super::street_graph::{StreetGraph, DEFAULT_STREET_WIDTH};
use super::strips::{generate_strips, Strip};

pub struct CityPipelinePlugin;

impl Plugin for CityPipelinePlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<PipelineConfig>()
            .init_resource::<StreetGraph>()
            .init_resource::<CityPipeline>()
            .add_event::<CityRebuilt>()
            .add_event::<ForceCityRebuild>()
            .add_systems(
                Update,
                (
                    sync_config,
                    observe_graph_changes,
                    run_debounced_rebuild,
                    run_forced_rebuild,
                )
                    .chain(),
            );
    }
}

/// Pipeline settings.
#[derive(Resource, Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Width for edges missing from the graph's width table.
    pub default_street_width: f32,
    pub lot_rules: LotRules,
    /// Quiet time after the last edit before a rebuild runs.
    pub rebuild_debounce: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_street_width: DEFAULT_STREET_WIDTH,
            lot_rules: LotRules::default(),
            rebuild_debounce: Duration::from_millis(300),
        }
    }
}

/// Counts gathered during one rebuild.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RebuildStats {
    /// Faces found, exterior faces included.
    pub detected_faces: usize,
    pub interior_blocks: usize,
    pub degenerate_offsets: usize,
    /// Blocks with a usable offset that still produced no strips.
    pub blocks_without_strips: usize,
    pub strips: usize,
    pub lots: usize,
}

/// One complete, immutable set of derived geometry.
///
/// `offset_polygons[i]` belongs to `blocks[i]`; `None` marks a block whose
/// inset collapsed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CityGeneration {
    pub number: u64,
    pub blocks: Vec<DetectedBlock>,
    pub offset_polygons: Vec<Option<Vec<Vec2>>>,
    pub strips: Vec<Strip>,
    pub lots: Vec<GeneratedLot>,
    pub stats: RebuildStats,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebuildState {
    Idle,
    PendingRebuild,
    Rebuilding,
}

/// Sent after every debounced or requested rebuild.
#[derive(Event, Clone, Debug)]
pub struct CityRebuilt {
    pub generation: Arc<CityGeneration>,
}

/// Request an immediate rebuild, bypassing the debounce.
#[derive(Event, Clone, Copy, Debug, Default)]
pub struct ForceCityRebuild;

/// Owner of the current generation and of the debounce state.
#[derive(Resource)]
pub struct CityPipeline {
    config: PipelineConfig,
    state: RebuildState,
    debounce: Timer,
    /// Set when an edit arrives while a rebuild is running.
    rearm: bool,
    current: Arc<CityGeneration>,
    rebuilds: u64,
}

impl FromWorld for CityPipeline {
    fn from_world(world: &mut World) -> Self {
        let config = world
            .get_resource::<PipelineConfig>()
            .cloned()
            .unwrap_or_default();
        Self::new(config)
    }
}

impl CityPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            debounce: Timer::new(config.rebuild_debounce, TimerMode::Once),
            config,
            state: RebuildState::Idle,
            rearm: false,
            current: Arc::new(CityGeneration::default()),
            rebuilds: 0,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Replace the configuration. A real change schedules a rebuild.
    pub fn set_config(&mut self, config: PipelineConfig) {
        if config == self.config {
            return;
        }
        self.debounce.set_duration(config.rebuild_debounce);
        self.config = config;
        self.mark_dirty();
    }

    pub fn state(&self) -> RebuildState {
        self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.state == RebuildState::PendingRebuild
    }

    /// Note that the graph changed. Restarts the debounce if one is pending.
    pub fn mark_dirty(&mut self) {
        match self.state {
            RebuildState::Idle | RebuildState::PendingRebuild => {
                self.debounce.reset();
                self.state = RebuildState::PendingRebuild;
            }
            RebuildState::Rebuilding => self.rearm = true,
        }
    }

    /// Advance the debounce. Returns true when a rebuild ran.
    pub fn tick(&mut self, delta: Duration, graph: &StreetGraph) -> bool {
        if self.state != RebuildState::PendingRebuild {
            return false;
        }

        self.debounce.tick(delta);
        if !self.debounce.finished() {
            return false;
        }

        self.rebuild(graph);
        true
    }

    /// Cancel any pending debounce and rebuild now.
    pub fn force_rebuild(&mut self, graph: &StreetGraph) -> Arc<CityGeneration> {
        self.rebuild(graph);
        self.generation()
    }

    fn rebuild(&mut self, graph: &StreetGraph) {
        self.state = RebuildState::Rebuilding;

        let generation = build_generation(graph, &self.config, self.current.number + 1);
        self.current = Arc::new(generation);
        self.rebuilds += 1;

        if std::mem::take(&mut self.rearm) {
            self.debounce.reset();
            self.state = RebuildState::PendingRebuild;
        } else {
            self.state = RebuildState::Idle;
        }
    }

    /// Snapshot of the current generation.
    pub fn generation(&self) -> Arc<CityGeneration> {
        Arc::clone(&self.current)
    }

    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    pub fn blocks(&self) -> &[DetectedBlock] {
        &self.current.blocks
    }

    pub fn offset_polygons(&self) -> &[Option<Vec<Vec2>>] {
        &self.current.offset_polygons
    }

    pub fn strips(&self) -> &[Strip] {
        &self.current.strips
    }

    pub fn lots(&self) -> &[GeneratedLot] {
        &self.current.lots
    }
}

/// Run every stage over the whole graph.
pub fn build_generation(graph: &StreetGraph, config: &PipelineConfig, number: u64) -> CityGeneration {
    let widths = graph.edge_widths();
    let mut stats = RebuildStats::default();

    let detected = detect_blocks(graph);
    stats.detected_faces = detected.len();
    let blocks = interior_blocks(detected);
    stats.interior_blocks = blocks.len();

    let offset_polygons: Vec<Option<Vec<Vec2>>> = blocks
        .iter()
        .map(|block| offset_block_boundary(block, &widths, config.default_street_width))
        .collect();

    let mut strips = Vec::new();
    for (block, offset) in blocks.iter().zip(&offset_polygons) {
        let Some(offset) = offset else {
            stats.degenerate_offsets += 1;
            continue;
        };
        let block_strips = generate_strips(block, offset, &widths, config.default_street_width);
        if block_strips.is_empty() {
            stats.blocks_without_strips += 1;
        }
        strips.extend(block_strips);
    }
    stats.strips = strips.len();

    let lots: Vec<GeneratedLot> = strips
        .iter()
        .flat_map(|strip| subdivide_strip(strip, &config.lot_rules))
        .collect();
    stats.lots = lots.len();

    info!(
        "City generation {}: {} blocks ({} degenerate), {} strips, {} lots",
        number, stats.interior_blocks, stats.degenerate_offsets, stats.strips, stats.lots
    );

    CityGeneration {
        number,
        blocks,
        offset_polygons,
        strips,
        lots,
        stats,
    }
}

fn sync_config(config: Res<PipelineConfig>, mut pipeline: ResMut<CityPipeline>) {
    if config.is_changed() {
        pipeline.set_config(config.clone());
    }
}

fn observe_graph_changes(graph: Res<StreetGraph>, mut pipeline: ResMut<CityPipeline>) {
    if graph.is_changed() {
        pipeline.mark_dirty();
    }
}

fn run_debounced_rebuild(
    time: Res<Time>,
    graph: Res<StreetGraph>,
    mut pipeline: ResMut<CityPipeline>,
    mut rebuilt: EventWriter<CityRebuilt>,
) {
    if pipeline.tick(time.delta(), &graph) {
        rebuilt.send(CityRebuilt {
            generation: pipeline.generation(),
        });
    }
}

fn run_forced_rebuild(
    mut requests: EventReader<ForceCityRebuild>,
    graph: Res<StreetGraph>,
    mut pipeline: ResMut<CityPipeline>,
    mut rebuilt: EventWriter<CityRebuilt>,
) {
    if requests.read().count() == 0 {
        return;
    }

    rebuilt.send(CityRebuilt {
        generation: pipeline.force_rebuild(&graph),
    });
}
