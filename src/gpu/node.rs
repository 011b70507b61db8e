/* used https://docs.rs/bevy/latest/bevy/render/render_resource/struct.ComputePass.html
as my source for computepass */

use bevy::prelude::*;
use bevy::render::graph::CameraDriverLabel;
use bevy::render::render_graph::{
    Node, NodeRunError, RenderGraph, RenderGraphContext, RenderLabel,
};
use bevy::render::render_resource::ComputePassDescriptor;
use bevy::render::renderer::RenderContext;

use crate::gpu::buffers::{PhysicsBindGroup, SimulationBuffers};
use crate::gpu::pipeline::{ComputePass, SimulationPipelines, workgroups};
use crate::gpu::readback::ExtractedReadback;
use crate::gpu::sort::{SortBindGroup, SortStepBuffer};
use crate::sim::orchestrator::FramePlan;
use crate::sim::particles::ParticleBuffer;

#[derive(Debug, Hash, PartialEq, Eq, Clone, RenderLabel)]
pub struct FluidComputeLabel;

/// Runs one simulation step: early update, the sort network, the offset
/// scan and the three physics passes. Each dispatch gets its own compute
/// pass, so every later pass observes the previous one's writes.
#[derive(Default)]
struct FluidComputeNode;

impl Node for FluidComputeNode {
    fn run(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext,
        world: &World,
    ) -> Result<(), NodeRunError> {
        // nothing to do until everything exists
        let Some(plan) = world.get_resource::<FramePlan>() else { return Ok(()); };
        let Some(pipelines) = world.get_resource::<SimulationPipelines>() else { return Ok(()); };
        let Some(physics) = world.get_resource::<PhysicsBindGroup>() else { return Ok(()); };
        let Some(sort) = world.get_resource::<SortBindGroup>() else { return Ok(()); };
        let Some(steps) = world.get_resource::<SortStepBuffer>() else { return Ok(()); };
        let Some(buffers) = world.get_resource::<SimulationBuffers>() else { return Ok(()); };

        if let Some(dispatch) = plan.dispatch {
            let n = dispatch.particle_count;
            if n > buffers.particle_count {
                error!(
                    "dispatch over {n} particles but buffers hold {}",
                    buffers.particle_count
                );
                return Ok(());
            }
            let particle_groups = workgroups(n);
            let encoder = render_context.command_encoder();

            let mut run = |pass: ComputePass, offset: u32, groups: u32| {
                let mut cpass = encoder.begin_compute_pass(&ComputePassDescriptor {
                    label: Some("fluid_compute"),
                    timestamp_writes: None,
                });
                cpass.set_pipeline(pipelines.get(pass));
                if pass.uses_sort_layout() {
                    cpass.set_bind_group(0, &sort.0, &[offset]);
                } else {
                    cpass.set_bind_group(0, &physics.0, &[]);
                }
                cpass.dispatch_workgroups(groups, 1, 1);
            };

            run(ComputePass::EarlyUpdate, 0, particle_groups);

            let sort_groups = workgroups(dispatch.sort.threads_per_step());
            for i in 0..dispatch.sort.step_count() {
                run(ComputePass::SortStep, i * steps.stride, sort_groups);
            }
            run(ComputePass::SortOffsets, 0, particle_groups);

            run(ComputePass::Density, 0, particle_groups);
            run(ComputePass::Pressure, 0, particle_groups);
            run(ComputePass::ViscosityUpdate, 0, particle_groups);
        }

        if plan.readback {
            if let Some(readback) = world.get_resource::<ExtractedReadback>() {
                let size = readback.size.min(
                    buffers.particle_count as u64 * ParticleBuffer::Position.element_size() as u64,
                );
                render_context.command_encoder().copy_buffer_to_buffer(
                    buffers.buffer(ParticleBuffer::Position),
                    0,
                    &readback.buffer,
                    0,
                    size,
                );
            }
        }
        Ok(())
    }
}

pub fn add_compute_node_to_graph(render_app: &mut bevy::app::SubApp) {
    let mut graph = render_app.world_mut().resource_mut::<RenderGraph>();
    graph.add_node(FluidComputeLabel, FluidComputeNode::default());
    graph.add_node_edge(FluidComputeLabel, CameraDriverLabel);
}
