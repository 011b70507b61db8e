use std::fs::File;
use std::io::{BufReader, BufWriter};

use bevy::prelude::*;
use bevy::render::extract_resource::ExtractResourcePlugin;
use bevy::render::renderer::RenderDevice;
use bevy::render::{ExtractSchedule, Render, RenderApp, RenderSet};
use bevy::window::PrimaryWindow;

use crate::gpu::buffers::{
    FluidBindGroupLayouts, SimulationBuffers, apply_frame_plan, init_bind_group_layouts,
    prepare_physics_bind_group,
};
use crate::gpu::draw_buffers::{
    DrawBindGroupLayouts, DrawState, DrawUniforms, QuadVertexBuffer, ReplayImage,
    init_draw_layouts, prepare_draw_bind_groups, prepare_draw_uniforms, update_draw_state,
};
use crate::gpu::draw_pass::add_draw_node_to_graph;
use crate::gpu::draw_pipeline::prepare_draw_pipelines;
use crate::gpu::node::add_compute_node_to_graph;
use crate::gpu::pipeline::prepare_simulation_pipelines;
use crate::gpu::readback::{PositionReadback, extract_readback, poll_position_readback};
use crate::gpu::sort::{SortStepBuffer, prepare_sort_bind_group, prepare_sort_steps};
use crate::input::{gather_frame_input, handle_keys, track_window_size};
use crate::sim::orchestrator::{FluidSimulation, FramePlan, SimulationConfig};
use crate::sim::record::{RecordError, read_trace};

/// How the app starts: free simulation, writing a trace, or playing one back.
#[derive(Resource, Clone, Debug, Default, PartialEq, Eq)]
pub enum LaunchMode {
    #[default]
    Live,
    Record,
    Replay {
        image: Option<String>,
    },
}

#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub struct FluidStepSet;

pub struct FluidSimulationPlugin;

impl Plugin for FluidSimulationPlugin {
    fn build(&self, app: &mut App) {
        // App
        let config = app
            .world()
            .get_resource::<SimulationConfig>()
            .cloned()
            .unwrap_or_default();
        app.insert_resource(FluidSimulation::new(&config))
            .insert_resource(config)
            .init_resource::<LaunchMode>()
            .init_resource::<FramePlan>()
            .init_resource::<PositionReadback>()
            .init_resource::<ReplayImage>()
            .add_plugins((
                ExtractResourcePlugin::<FramePlan>::default(),
                ExtractResourcePlugin::<FluidBindGroupLayouts>::default(),
                ExtractResourcePlugin::<DrawBindGroupLayouts>::default(),
                ExtractResourcePlugin::<DrawState>::default(),
            ))
            .add_systems(
                Startup,
                (init_bind_group_layouts, init_draw_layouts, start_launch_mode),
            )
            .add_systems(
                Update,
                (
                    (handle_keys, track_window_size),
                    step_simulation.in_set(FluidStepSet),
                    (update_draw_state, poll_position_readback),
                )
                    .chain(),
            );

        // Render
        let render_app = app.sub_app_mut(RenderApp);
        render_app
            .add_systems(ExtractSchedule, extract_readback)
            .add_systems(
                Render,
                (
                    (apply_frame_plan, prepare_sort_steps, prepare_draw_uniforms)
                        .in_set(RenderSet::PrepareResources),
                    (
                        prepare_physics_bind_group,
                        prepare_sort_bind_group,
                        prepare_draw_bind_groups,
                    )
                        .in_set(RenderSet::PrepareBindGroups),
                    (prepare_simulation_pipelines, prepare_draw_pipelines)
                        .in_set(RenderSet::Prepare),
                ),
            );

        add_compute_node_to_graph(render_app);
        add_draw_node_to_graph(render_app);
    }

    // the render device exists only once the renderer is up
    fn finish(&self, app: &mut App) {
        app.sub_app_mut(RenderApp)
            .init_resource::<SimulationBuffers>()
            .init_resource::<SortStepBuffer>()
            .init_resource::<QuadVertexBuffer>()
            .init_resource::<DrawUniforms>();
    }
}

fn step_simulation(
    mut sim: ResMut<FluidSimulation>,
    mut plan: ResMut<FramePlan>,
    mut readback: ResMut<PositionReadback>,
    time: Res<Time>,
    windows: Query<&Window, With<PrimaryWindow>>,
    buttons: Res<ButtonInput<MouseButton>>,
    render_device: Res<RenderDevice>,
) {
    let input = gather_frame_input(windows.single().ok(), &buttons, time.delta_secs());
    let next = match sim.do_frame(input) {
        Ok(next) => next,
        Err(err) => {
            error!("simulation frame failed: {err}");
            panic!("unrecoverable simulation state: {err}");
        }
    };
    if next.readback {
        readback.request(&render_device, sim.particle_count());
    }
    *plan = next;
}

fn start_launch_mode(
    launch: Res<LaunchMode>,
    config: Res<SimulationConfig>,
    mut sim: ResMut<FluidSimulation>,
    mut replay_image: ResMut<ReplayImage>,
    assets: Res<AssetServer>,
) {
    match &*launch {
        LaunchMode::Live => {}
        LaunchMode::Record => {
            let file = match File::create(&config.trace_path) {
                Ok(file) => file,
                Err(err) => {
                    error!("cannot create trace {}: {err}", config.trace_path);
                    panic!("recording needs a writable trace file");
                }
            };
            if let Err(err) = sim.enter_record_mode(Box::new(BufWriter::new(file))) {
                error!("cannot write trace header: {err}");
                panic!("recording needs a writable trace file");
            }
        }
        LaunchMode::Replay { image } => {
            let recording = File::open(&config.trace_path)
                .map_err(RecordError::from)
                .and_then(|file| read_trace(BufReader::new(file), config.read_limit));
            match recording {
                Ok(recording) => {
                    sim.enter_replay(&recording);
                    replay_image.handle = image.as_ref().map(|path| assets.load(path.clone()));
                }
                Err(err) => warn!(
                    "replay skipped, cannot read {}: {err}",
                    config.trace_path
                ),
            }
        }
    }
}
