use bevy::prelude::*;
use bevy::render::extract_resource::ExtractResource;
use bevy::render::render_resource::{
    BindGroup, BindGroupEntry, BindGroupLayout, BindGroupLayoutEntry, BindingType, Buffer,
    BufferBindingType, BufferDescriptor, BufferInitDescriptor, BufferUsages,
    CommandEncoderDescriptor, ShaderStages,
};
use bevy::render::renderer::{RenderDevice, RenderQueue};

use crate::gpu::ffi::FRAME_PARAMS_SIZE;
use crate::sim::orchestrator::{BufferCommand, FramePlan};
use crate::sim::particles::{ParticleArrays, ParticleBuffer};

// ==================== resources ======================================

/* binding convention of every physics pass (group 0):
   0 params uniform, 1 position, 2 predicted position, 3 velocity,
   4 density, 5 spatial index, 6 spatial offset, 7 collision words.
   sort passes: 0 spatial index, 1 spatial offset, 2 sort step (dynamic) */
#[derive(Resource, Clone, ExtractResource)]
pub struct FluidBindGroupLayouts {
    pub physics: BindGroupLayout,
    pub sort: BindGroupLayout,
}

#[derive(Resource, Clone)]
pub struct PhysicsBindGroup(pub BindGroup);

/// Device copies of everything the compute passes touch. Lives in the
/// render world; only `apply_frame_plan` replaces buffers.
#[derive(Resource)]
pub struct SimulationBuffers {
    particles: [Buffer; 6],
    pub particle_count: u32,
    pub params: Buffer,
    pub collision: Buffer,
    collision_words: usize,
    pub uvs: Buffer,
}

// =====================================================================

fn storage_entry(binding: u32, read_only: bool, visibility: ShaderStages) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub(crate) fn uniform_entry(binding: u32, dynamic: bool, visibility: ShaderStages) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Uniform,
            has_dynamic_offset: dynamic,
            min_binding_size: None,
        },
        count: None,
    }
}

pub(crate) fn read_only_storage_entry(binding: u32, visibility: ShaderStages) -> BindGroupLayoutEntry {
    storage_entry(binding, true, visibility)
}

// ========================== systems ==================================

// Startup, main world
pub fn init_bind_group_layouts(mut commands: Commands, render_device: Res<RenderDevice>) {
    let c = ShaderStages::COMPUTE;
    let physics = render_device.create_bind_group_layout(
        Some("fluid_physics_layout"),
        &[
            uniform_entry(0, false, c),
            storage_entry(1, false, c),
            storage_entry(2, false, c),
            storage_entry(3, false, c),
            storage_entry(4, false, c),
            storage_entry(5, false, c),
            storage_entry(6, false, c),
            storage_entry(7, true, c),
        ],
    );
    let sort = render_device.create_bind_group_layout(
        Some("fluid_sort_layout"),
        &[
            storage_entry(0, false, c),
            storage_entry(1, false, c),
            uniform_entry(2, true, c),
        ],
    );
    commands.insert_resource(FluidBindGroupLayouts { physics, sort });
}

/// Applies buffer commands and uploads from this frame's plan. Runs in
/// Prepare, so the compute node never sees half-resized buffers.
pub fn apply_frame_plan(
    plan: Option<Res<FramePlan>>,
    buffers: Option<ResMut<SimulationBuffers>>,
    render_device: Res<RenderDevice>,
    render_queue: Res<RenderQueue>,
) {
    let (Some(plan), Some(mut buffers)) = (plan, buffers) else {
        return;
    };

    for command in &plan.buffer_commands {
        match command {
            BufferCommand::Reallocate(arrays) => buffers.reallocate(&render_device, arrays),
            BufferCommand::Preserve {
                old_count,
                new_count,
                tail,
            } => buffers.preserve(&render_device, &render_queue, *old_count, *new_count, tail),
        }
    }

    if let Some(params) = plan.params {
        render_queue.write_buffer(&buffers.params, 0, bytemuck::bytes_of(&params));
    }
    if let Some(words) = &plan.collision_upload {
        buffers.upload_collision(&render_device, &render_queue, words);
    }
    if let Some(uvs) = &plan.uv_upload {
        buffers.uvs = create_storage(&render_device, "particle_uvs", bytemuck::cast_slice(uvs), 8);
    }
}

pub fn prepare_physics_bind_group(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    layouts: Option<Res<FluidBindGroupLayouts>>,
    buffers: Option<Res<SimulationBuffers>>,
) {
    let (Some(layouts), Some(buffers)) = (layouts, buffers) else {
        return;
    };
    let mut entries = vec![BindGroupEntry {
        binding: 0,
        resource: buffers.params.as_entire_binding(),
    }];
    for (i, b) in ParticleBuffer::ALL.into_iter().enumerate() {
        entries.push(BindGroupEntry {
            binding: i as u32 + 1,
            resource: buffers.buffer(b).as_entire_binding(),
        });
    }
    entries.push(BindGroupEntry {
        binding: 7,
        resource: buffers.collision.as_entire_binding(),
    });

    let bind_group = render_device.create_bind_group(Some("fluid_physics_bind_group"), &layouts.physics, &entries);
    commands.insert_resource(PhysicsBindGroup(bind_group));
}

// Implementations

fn particle_usage() -> BufferUsages {
    BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC
}

// empty bindings are invalid, so every buffer holds at least one element
fn create_storage(render_device: &RenderDevice, label: &str, contents: &[u8], element: usize) -> Buffer {
    if contents.is_empty() {
        return render_device.create_buffer(&BufferDescriptor {
            label: Some(label),
            size: element as u64,
            usage: particle_usage(),
            mapped_at_creation: false,
        });
    }
    render_device.create_buffer_with_data(&BufferInitDescriptor {
        label: Some(label),
        contents,
        usage: particle_usage(),
    })
}

impl FromWorld for SimulationBuffers {
    fn from_world(world: &mut World) -> Self {
        let render_device = world.resource::<RenderDevice>();
        let particles = ParticleBuffer::ALL.map(|b| create_storage(render_device, b.label(), &[], b.element_size()));
        let params = render_device.create_buffer_with_data(&BufferInitDescriptor {
            label: Some("fluid_frame_params"),
            contents: &[0u8; FRAME_PARAMS_SIZE],
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        });
        Self {
            particles,
            particle_count: 0,
            params,
            collision: create_storage(render_device, "collision_words", &[], 4),
            collision_words: 1,
            uvs: create_storage(render_device, "particle_uvs", &[], 8),
        }
    }
}

impl SimulationBuffers {
    pub fn buffer(&self, buffer: ParticleBuffer) -> &Buffer {
        &self.particles[buffer as usize]
    }

    /// Fresh buffers holding `arrays`.
    pub fn reallocate(&mut self, render_device: &RenderDevice, arrays: &ParticleArrays) {
        self.particles = ParticleBuffer::ALL
            .map(|b| create_storage(render_device, b.label(), arrays.bytes(b), b.element_size()));
        self.particle_count = arrays.len() as u32;
        info!("particle buffers reallocated for {} particles", self.particle_count);
    }

    /// Fresh buffers of `new_count`; the overlapping prefix is copied on the
    /// device and `tail` is written after it.
    pub fn preserve(
        &mut self,
        render_device: &RenderDevice,
        render_queue: &RenderQueue,
        old_count: u32,
        new_count: u32,
        tail: &ParticleArrays,
    ) {
        let kept = old_count.min(new_count).min(self.particle_count) as u64;
        let mut encoder = render_device.create_command_encoder(&CommandEncoderDescriptor {
            label: Some("fluid_preserving_resize"),
        });

        let fresh = ParticleBuffer::ALL.map(|b| {
            let element = b.element_size() as u64;
            let buffer = render_device.create_buffer(&BufferDescriptor {
                label: Some(b.label()),
                size: element * new_count.max(1) as u64,
                usage: particle_usage(),
                mapped_at_creation: false,
            });
            if kept > 0 {
                encoder.copy_buffer_to_buffer(self.buffer(b), 0, &buffer, 0, kept * element);
            }
            if new_count > old_count && !tail.is_empty() {
                render_queue.write_buffer(&buffer, kept * element, tail.bytes(b));
            }
            buffer
        });

        render_queue.submit([encoder.finish()]);
        self.particles = fresh;
        self.particle_count = new_count;
        debug!("particle buffers resized {old_count} -> {new_count}");
    }

    fn upload_collision(&mut self, render_device: &RenderDevice, render_queue: &RenderQueue, words: &[u32]) {
        if words.len() != self.collision_words {
            self.collision = create_storage(render_device, "collision_words", bytemuck::cast_slice(words), 4);
            self.collision_words = words.len().max(1);
            return;
        }
        render_queue.write_buffer(&self.collision, 0, bytemuck::cast_slice(words));
    }
}
