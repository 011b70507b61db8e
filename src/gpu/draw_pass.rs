use bevy::core_pipeline::core_2d::graph::{Core2d, Node2d};
use bevy::prelude::*;
use bevy::render::render_graph::{
    NodeRunError, RenderGraphApp, RenderGraphContext, RenderLabel, ViewNode, ViewNodeRunner,
};
use bevy::render::render_resource::{PipelineCache, RenderPassDescriptor};
use bevy::render::renderer::RenderContext;
use bevy::render::view::ViewTarget;

use crate::gpu::buffers::SimulationBuffers;
use crate::gpu::draw_buffers::{DrawBindGroups, DrawState, QuadVertexBuffer};
use crate::gpu::draw_pipeline::DrawPipelines;

#[derive(Debug, Hash, PartialEq, Eq, Clone, RenderLabel)]
pub struct FluidDrawPassLabel;

/// Particles first, then the collision map on top of them.
#[derive(Default)]
pub struct FluidDrawNode;

impl ViewNode for FluidDrawNode {
    type ViewQuery = (&'static ViewTarget,);

    fn run(
        &self,
        _graph: &mut RenderGraphContext,
        rcx: &mut RenderContext,
        (view_target,): <Self::ViewQuery as bevy::ecs::query::QueryData>::Item<'_>,
        world: &World,
    ) -> Result<(), NodeRunError> {
        let Some(pipelines) = world.get_resource::<DrawPipelines>() else {
            return Ok(());
        };
        let cache = world.resource::<PipelineCache>();
        let (Some(particles), Some(collision)) = (
            cache.get_render_pipeline(pipelines.particles),
            cache.get_render_pipeline(pipelines.collision),
        ) else {
            return Ok(());
        };
        let Some(bind_groups) = world.get_resource::<DrawBindGroups>() else {
            return Ok(());
        };
        let Some(vb) = world.get_resource::<QuadVertexBuffer>() else {
            return Ok(());
        };
        let (Some(state), Some(buffers)) = (
            world.get_resource::<DrawState>(),
            world.get_resource::<SimulationBuffers>(),
        ) else {
            return Ok(());
        };
        let instances = state.particle_count.min(buffers.particle_count);

        let mut pass = rcx.begin_tracked_render_pass(RenderPassDescriptor {
            label: Some("fluid_draw_pass"),
            color_attachments: &[Some(view_target.get_color_attachment())],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        if instances > 0 {
            pass.set_render_pipeline(particles);
            pass.set_bind_group(0, &bind_groups.particles, &[]);
            pass.set_vertex_buffer(0, vb.buffer.slice(..));
            pass.draw(0..6, 0..instances);
        }

        pass.set_render_pipeline(collision);
        pass.set_bind_group(0, &bind_groups.collision, &[]);
        pass.draw(0..3, 0..1);
        Ok(())
    }
}

pub fn add_draw_node_to_graph(render_app: &mut SubApp) {
    render_app
        .add_render_graph_node::<ViewNodeRunner<FluidDrawNode>>(Core2d, FluidDrawPassLabel)
        .add_render_graph_edges(
            Core2d,
            (Node2d::MainTransparentPass, FluidDrawPassLabel, Node2d::EndMainPass),
        );
}
