use bevy::asset::AssetServer;
use bevy::prelude::*;
use bevy::render::render_resource::TextureFormat;
use bevy::render::render_resource::{
    BlendState, CachedPipelineState, CachedRenderPipelineId, ColorTargetState, ColorWrites,
    FragmentState, MultisampleState, PipelineCache, PrimitiveState, RenderPipelineDescriptor,
    Shader, VertexAttribute, VertexBufferLayout, VertexFormat, VertexState, VertexStepMode,
};

use super::draw_buffers::DrawBindGroupLayouts;

// must match the view's main pass
const MSAA_SAMPLES: u32 = 4;

#[derive(Resource)]
pub struct DrawPipelines {
    pub particles: CachedRenderPipelineId,
    pub collision: CachedRenderPipelineId,
}

fn color_target() -> Vec<Option<ColorTargetState>> {
    vec![Some(ColorTargetState {
        format: TextureFormat::Rgba8UnormSrgb,
        blend: Some(BlendState::ALPHA_BLENDING),
        write_mask: ColorWrites::ALL,
    })]
}

fn particles_descriptor(layouts: &DrawBindGroupLayouts, shader: Handle<Shader>) -> RenderPipelineDescriptor {
    let vbuf_layout = VertexBufferLayout {
        array_stride: std::mem::size_of::<[f32; 2]>() as u64,
        step_mode: VertexStepMode::Vertex,
        attributes: vec![VertexAttribute {
            format: VertexFormat::Float32x2,
            offset: 0,
            shader_location: 0,
        }],
    };

    RenderPipelineDescriptor {
        label: Some("particles_draw_pipeline".into()),
        layout: vec![layouts.particles.clone()],
        vertex: VertexState {
            shader: shader.clone(),
            entry_point: "vs_main".into(),
            shader_defs: vec![],
            buffers: vec![vbuf_layout],
        },
        fragment: Some(FragmentState {
            shader,
            entry_point: "fs_main".into(),
            shader_defs: vec![],
            targets: color_target(),
        }),
        primitive: PrimitiveState::default(),
        depth_stencil: None,
        multisample: MultisampleState {
            count: MSAA_SAMPLES,
            ..Default::default()
        },
        push_constant_ranges: vec![],
        zero_initialize_workgroup_memory: false,
    }
}

// fullscreen triangle generated from the vertex index, no vertex buffer
fn collision_descriptor(layouts: &DrawBindGroupLayouts, shader: Handle<Shader>) -> RenderPipelineDescriptor {
    RenderPipelineDescriptor {
        label: Some("collision_draw_pipeline".into()),
        layout: vec![layouts.collision.clone()],
        vertex: VertexState {
            shader: shader.clone(),
            entry_point: "vs_main".into(),
            shader_defs: vec![],
            buffers: vec![],
        },
        fragment: Some(FragmentState {
            shader,
            entry_point: "fs_main".into(),
            shader_defs: vec![],
            targets: color_target(),
        }),
        primitive: PrimitiveState::default(),
        depth_stencil: None,
        multisample: MultisampleState {
            count: MSAA_SAMPLES,
            ..Default::default()
        },
        push_constant_ranges: vec![],
        zero_initialize_workgroup_memory: false,
    }
}

fn log_state(cache: &PipelineCache, label: &str, id: CachedRenderPipelineId) -> bool {
    match cache.get_render_pipeline_state(id) {
        CachedPipelineState::Ok(_) => true,
        CachedPipelineState::Err(err) => {
            error!("{label} ERROR: {err:?}");
            false
        }
        CachedPipelineState::Queued => {
            debug!("{label} QUEUED (waiting for compilation)...");
            false
        }
        CachedPipelineState::Creating(_) => {
            debug!("{label} CREATING (compiling now)...");
            false
        }
    }
}

pub fn prepare_draw_pipelines(
    mut commands: Commands,
    cache: Res<PipelineCache>,
    layouts: Option<Res<DrawBindGroupLayouts>>,
    ready: Option<Res<DrawPipelines>>,
    assets: Res<AssetServer>,
    mut cached: Local<Option<(CachedRenderPipelineId, CachedRenderPipelineId)>>,
) {
    if ready.is_some() {
        return;
    }
    let Some(layouts) = layouts else {
        return;
    };

    let Some((particles, collision)) = *cached else {
        let particles = cache.queue_render_pipeline(particles_descriptor(
            &layouts,
            assets.load("shaders/particles_draw.wgsl"),
        ));
        let collision = cache.queue_render_pipeline(collision_descriptor(
            &layouts,
            assets.load("shaders/collision_draw.wgsl"),
        ));
        *cached = Some((particles, collision));
        info!("draw pipelines QUEUED");
        return;
    };

    let particles_ok = log_state(&cache, "particles_draw_pipeline", particles);
    let collision_ok = log_state(&cache, "collision_draw_pipeline", collision);
    if particles_ok && collision_ok {
        info!("draw pipelines READY");
        commands.insert_resource(DrawPipelines { particles, collision });
    }
}
