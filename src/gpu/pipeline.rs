use std::borrow::Cow;

use bevy::prelude::*;
use bevy::render::render_resource::{
    CachedComputePipelineId, CachedPipelineState, ComputePipeline, ComputePipelineDescriptor,
    PipelineCache, PushConstantRange, ShaderDefVal,
};

use crate::gpu::buffers::FluidBindGroupLayouts;

pub const WORKGROUP_SIZE: u32 = 128;

/// The compute dispatches of one frame, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComputePass {
    EarlyUpdate,
    SortStep,
    SortOffsets,
    Density,
    Pressure,
    ViscosityUpdate,
}

impl ComputePass {
    pub const ALL: [ComputePass; 6] = [
        ComputePass::EarlyUpdate,
        ComputePass::SortStep,
        ComputePass::SortOffsets,
        ComputePass::Density,
        ComputePass::Pressure,
        ComputePass::ViscosityUpdate,
    ];

    fn shader_path(self) -> &'static str {
        match self {
            ComputePass::EarlyUpdate => "shaders/simulation_early.wgsl",
            ComputePass::SortStep | ComputePass::SortOffsets => "shaders/sort.wgsl",
            ComputePass::Density => "shaders/density.wgsl",
            ComputePass::Pressure => "shaders/pressure.wgsl",
            ComputePass::ViscosityUpdate => "shaders/viscosity_update.wgsl",
        }
    }

    fn entry_point(self) -> &'static str {
        match self {
            ComputePass::SortStep => "bitonic_step",
            ComputePass::SortOffsets => "build_offsets",
            _ => "main",
        }
    }

    fn label(self) -> &'static str {
        match self {
            ComputePass::EarlyUpdate => "fluid_early_update_pipeline",
            ComputePass::SortStep => "fluid_sort_step_pipeline",
            ComputePass::SortOffsets => "fluid_sort_offsets_pipeline",
            ComputePass::Density => "fluid_density_pipeline",
            ComputePass::Pressure => "fluid_pressure_pipeline",
            ComputePass::ViscosityUpdate => "fluid_viscosity_update_pipeline",
        }
    }

    pub fn uses_sort_layout(self) -> bool {
        matches!(self, ComputePass::SortStep | ComputePass::SortOffsets)
    }
}

/// Workgroups covering `threads` invocations.
pub fn workgroups(threads: u32) -> u32 {
    threads.max(1).div_ceil(WORKGROUP_SIZE)
}

#[derive(Resource)]
pub struct SimulationPipelines([ComputePipeline; 6]);

impl SimulationPipelines {
    pub fn get(&self, pass: ComputePass) -> &ComputePipeline {
        &self.0[pass as usize]
    }
}

pub struct QueuedPipelines {
    ids: [CachedComputePipelineId; 6],
    // held so the shared import stays loaded
    _common: Handle<Shader>,
}

pub fn prepare_simulation_pipelines(
    mut commands: Commands,
    pipeline_cache: Res<PipelineCache>,
    layouts: Option<Res<FluidBindGroupLayouts>>,
    ready: Option<Res<SimulationPipelines>>,
    mut queued: Local<Option<QueuedPipelines>>,
    assets: Res<AssetServer>,
) {
    if ready.is_some() {
        return;
    }
    let Some(layouts) = layouts else {
        return;
    };

    if queued.is_none() {
        let ids = ComputePass::ALL.map(|pass| {
            let layout = if pass.uses_sort_layout() {
                layouts.sort.clone()
            } else {
                layouts.physics.clone()
            };
            let shader: Handle<Shader> = assets.load(pass.shader_path());
            pipeline_cache.queue_compute_pipeline(ComputePipelineDescriptor {
                label: Some(pass.label().into()),
                layout: vec![layout],
                push_constant_ranges: Vec::<PushConstantRange>::new(),
                shader,
                shader_defs: Vec::<ShaderDefVal>::new(),
                entry_point: Cow::from(pass.entry_point()),
                zero_initialize_workgroup_memory: false,
            })
        });
        *queued = Some(QueuedPipelines {
            ids,
            _common: assets.load("shaders/common.wgsl"),
        });
        info!("fluid compute pipelines QUEUED");
        return; // waits for compilation
    }
    let Some(pipelines) = queued.as_ref() else {
        return;
    };

    let mut compiled = Vec::with_capacity(ComputePass::ALL.len());
    for (pass, id) in ComputePass::ALL.into_iter().zip(pipelines.ids) {
        match pipeline_cache.get_compute_pipeline_state(id) {
            CachedPipelineState::Ok(_) => {
                if let Some(pipeline) = pipeline_cache.get_compute_pipeline(id) {
                    compiled.push(pipeline.clone());
                }
            }
            CachedPipelineState::Err(err) => {
                error!("{} ERROR: {err:?}", pass.label());
                panic!("failed to build {}", pass.label());
            }
            CachedPipelineState::Queued | CachedPipelineState::Creating(_) => return,
        }
    }

    if let Ok(all) = <[ComputePipeline; 6]>::try_from(compiled) {
        info!("fluid compute pipelines READY");
        commands.insert_resource(SimulationPipelines(all));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workgroup_counts_round_up() {
        assert_eq!(workgroups(0), 1);
        assert_eq!(workgroups(128), 1);
        assert_eq!(workgroups(129), 2);
        assert_eq!(workgroups(25_000), 196);
    }

    #[test]
    fn sort_passes_share_one_shader() {
        assert_eq!(
            ComputePass::SortStep.shader_path(),
            ComputePass::SortOffsets.shader_path()
        );
        assert_ne!(
            ComputePass::SortStep.entry_point(),
            ComputePass::SortOffsets.entry_point()
        );
        assert_eq!(ComputePass::ALL.iter().filter(|p| p.uses_sort_layout()).count(), 2);
    }
}
