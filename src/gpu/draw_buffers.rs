use bevy::prelude::*;
use bevy::render::extract_resource::ExtractResource;
use bevy::render::render_asset::RenderAssets;
use bevy::render::render_resource::*;
use bevy::render::renderer::{RenderDevice, RenderQueue};
use bevy::render::texture::{FallbackImage, GpuImage};

use crate::gpu::buffers::{SimulationBuffers, read_only_storage_entry, uniform_entry};
use crate::gpu::ffi::{CollisionDrawParams, DrawParams};
use crate::sim::orchestrator::FluidSimulation;
use crate::sim::particles::ParticleBuffer;
use crate::sim::settings::PARTICLE_SIZE;

// ---------------- Types ----------------

// drawn quads are smaller than the simulated particle
const REDUCTION_FACTOR: f32 = 0.45;
const MAX_SPEED: f32 = 400.0;
const COLLISION_COLOR: [f32; 4] = [0.3, 0.7, 0.2, 1.0];

/// How the replay image is filtered when particles sample it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TextureSampling {
    Point,
    #[default]
    Bilinear,
    Trilinear,
}

impl TextureSampling {
    pub fn filters(self) -> (FilterMode, FilterMode) {
        match self {
            TextureSampling::Point => (FilterMode::Nearest, FilterMode::Nearest),
            TextureSampling::Bilinear => (FilterMode::Linear, FilterMode::Nearest),
            TextureSampling::Trilinear => (FilterMode::Linear, FilterMode::Linear),
        }
    }

    pub fn descriptor(self) -> SamplerDescriptor<'static> {
        let (filter, mipmap_filter) = self.filters();
        SamplerDescriptor {
            label: Some("particle_image_sampler"),
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter,
            ..Default::default()
        }
    }
}

/// What the draw passes need from the main world each frame.
#[derive(Resource, Clone, ExtractResource)]
pub struct DrawState {
    pub particle_count: u32,
    pub params: DrawParams,
    pub collision: CollisionDrawParams,
    pub sampling: TextureSampling,
    pub image: Option<Handle<Image>>,
}

/// Image particles are coloured from during replay.
#[derive(Resource, Clone, Default)]
pub struct ReplayImage {
    pub handle: Option<Handle<Image>>,
    pub sampling: TextureSampling,
}

impl DrawState {
    pub fn from_simulation(sim: &FluidSimulation, image: &ReplayImage) -> Self {
        let stops = *sim.heatmap();
        let replay = sim.mode().is_replay();
        let collision = sim.collision();
        Self {
            particle_count: sim.particle_count(),
            params: DrawParams {
                scale: PARTICLE_SIZE * REDUCTION_FACTOR,
                aspect_ratio: sim.aspect_ratio(),
                max_speed: MAX_SPEED,
                use_uvs: replay as u32,
                stop_colors: stops.map(|s| s.color),
                stop_positions: stops.map(|s| s.position),
            },
            collision: CollisionDrawParams {
                color: COLLISION_COLOR,
                map_width: collision.width(),
                map_height: collision.height(),
                _pad: [0; 2],
            },
            sampling: image.sampling,
            image: if replay { image.handle.clone() } else { None },
        }
    }
}

#[derive(Resource, Clone, ExtractResource)]
pub struct DrawBindGroupLayouts {
    pub particles: BindGroupLayout,
    pub collision: BindGroupLayout,
}

#[derive(Resource)]
pub struct DrawUniforms {
    pub params: Buffer,
    pub collision: Buffer,
    sampler: Sampler,
    sampling: TextureSampling,
}

#[derive(Resource)]
pub struct DrawBindGroups {
    pub particles: BindGroup,
    pub collision: BindGroup,
}

#[derive(Resource)]
pub struct QuadVertexBuffer {
    pub buffer: Buffer,
}

const QUAD_VERTS: &[[f32; 2]] = &[
    [-0.5, -0.5],
    [0.5, -0.5],
    [0.5, 0.5],
    [-0.5, -0.5],
    [0.5, 0.5],
    [-0.5, 0.5],
];

// ---------------- Systems (Main world) ----------------

pub fn update_draw_state(mut commands: Commands, sim: Res<FluidSimulation>, image: Res<ReplayImage>) {
    commands.insert_resource(DrawState::from_simulation(&sim, &image));
}

// Layouts: particles 0 positions, 1 velocities, 2 uvs, 3 params, 4 image, 5 sampler;
// collision overlay 0 words, 1 params
pub fn init_draw_layouts(mut commands: Commands, rd: Res<RenderDevice>) {
    let vertex = ShaderStages::VERTEX;
    let fragment = ShaderStages::FRAGMENT;
    let particles = rd.create_bind_group_layout(
        Some("particles_draw_layout"),
        &[
            read_only_storage_entry(0, vertex),
            read_only_storage_entry(1, vertex),
            read_only_storage_entry(2, vertex),
            uniform_entry(3, false, vertex | fragment),
            BindGroupLayoutEntry {
                binding: 4,
                visibility: fragment,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: true },
                    view_dimension: TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            BindGroupLayoutEntry {
                binding: 5,
                visibility: fragment,
                ty: BindingType::Sampler(SamplerBindingType::Filtering),
                count: None,
            },
        ],
    );
    let collision = rd.create_bind_group_layout(
        Some("collision_draw_layout"),
        &[read_only_storage_entry(0, fragment), uniform_entry(1, false, fragment)],
    );
    commands.insert_resource(DrawBindGroupLayouts { particles, collision });
    info!("draw layouts READY");
}

// ---------------- Systems (Render world) ----------------

impl FromWorld for QuadVertexBuffer {
    fn from_world(world: &mut World) -> Self {
        let rd = world.resource::<RenderDevice>();
        let buffer = rd.create_buffer_with_data(&BufferInitDescriptor {
            label: Some("instanced_quad_vb"),
            contents: bytemuck::cast_slice(QUAD_VERTS),
            usage: BufferUsages::VERTEX,
        });
        Self { buffer }
    }
}

impl FromWorld for DrawUniforms {
    fn from_world(world: &mut World) -> Self {
        let rd = world.resource::<RenderDevice>();
        let uniform = |label: &str, contents: &[u8]| {
            rd.create_buffer_with_data(&BufferInitDescriptor {
                label: Some(label),
                contents,
                usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            })
        };
        let sampling = TextureSampling::default();
        Self {
            params: uniform("draw_params_uniform", bytemuck::bytes_of(&DrawParams::default())),
            collision: uniform(
                "collision_draw_params_uniform",
                bytemuck::bytes_of(&CollisionDrawParams::default()),
            ),
            sampler: rd.create_sampler(&sampling.descriptor()),
            sampling,
        }
    }
}

// Update the UBOs each frame (cheap)
pub fn prepare_draw_uniforms(
    state: Option<Res<DrawState>>,
    mut uniforms: ResMut<DrawUniforms>,
    rd: Res<RenderDevice>,
    rq: Res<RenderQueue>,
) {
    let Some(state) = state else {
        return;
    };
    rq.write_buffer(&uniforms.params, 0, bytemuck::bytes_of(&state.params));
    rq.write_buffer(&uniforms.collision, 0, bytemuck::bytes_of(&state.collision));
    if uniforms.sampling != state.sampling {
        uniforms.sampler = rd.create_sampler(&state.sampling.descriptor());
        uniforms.sampling = state.sampling;
    }
}

pub fn prepare_draw_bind_groups(
    mut commands: Commands,
    rd: Res<RenderDevice>,
    layouts: Option<Res<DrawBindGroupLayouts>>,
    buffers: Option<Res<SimulationBuffers>>,
    state: Option<Res<DrawState>>,
    uniforms: Res<DrawUniforms>,
    images: Res<RenderAssets<GpuImage>>,
    fallback: Res<FallbackImage>,
) {
    let (Some(layouts), Some(buffers), Some(state)) = (layouts, buffers, state) else {
        return;
    };

    // falls back to a blank texture until the replay image is loaded
    let image_view = state
        .image
        .as_ref()
        .and_then(|handle| images.get(handle))
        .map(|gpu| &gpu.texture_view)
        .unwrap_or(&fallback.d2.texture_view);

    let particles = rd.create_bind_group(
        Some("particles_draw_bind_group"),
        &layouts.particles,
        &[
            BindGroupEntry {
                binding: 0,
                resource: buffers.buffer(ParticleBuffer::Position).as_entire_binding(),
            },
            BindGroupEntry {
                binding: 1,
                resource: buffers.buffer(ParticleBuffer::Velocity).as_entire_binding(),
            },
            BindGroupEntry {
                binding: 2,
                resource: buffers.uvs.as_entire_binding(),
            },
            BindGroupEntry {
                binding: 3,
                resource: uniforms.params.as_entire_binding(),
            },
            BindGroupEntry {
                binding: 4,
                resource: BindingResource::TextureView(image_view),
            },
            BindGroupEntry {
                binding: 5,
                resource: BindingResource::Sampler(&uniforms.sampler),
            },
        ],
    );
    let collision = rd.create_bind_group(
        Some("collision_draw_bind_group"),
        &layouts.collision,
        &[
            BindGroupEntry {
                binding: 0,
                resource: buffers.collision.as_entire_binding(),
            },
            BindGroupEntry {
                binding: 1,
                resource: uniforms.collision.as_entire_binding(),
            },
        ],
    );
    commands.insert_resource(DrawBindGroups { particles, collision });
}
