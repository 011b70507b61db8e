// sort network uniforms: one dynamic-offset slot per dispatch
use std::num::NonZeroU64;

use bevy::prelude::*;
use bevy::render::render_resource::{
    BindGroup, BindGroupEntry, BindingResource, Buffer, BufferBinding, BufferDescriptor,
    BufferUsages,
};
use bevy::render::renderer::{RenderDevice, RenderQueue};

use crate::gpu::buffers::{FluidBindGroupLayouts, SimulationBuffers};
use crate::sim::orchestrator::FramePlan;
use crate::sim::particles::ParticleBuffer;
use crate::sim::sort::{BitonicSchedule, SortStep};

const STEP_SIZE: u64 = std::mem::size_of::<SortStep>() as u64;

#[derive(Resource)]
pub struct SortStepBuffer {
    pub buffer: Buffer,
    pub stride: u32,
    pub slots: u32,
}

#[derive(Resource)]
pub struct SortBindGroup(pub BindGroup);

/// Steps in dispatch order, each padded to `stride` bytes. Always holds
/// at least one slot so the offset pass can read the entry count.
pub fn encode_steps(schedule: &BitonicSchedule, stride: u32) -> Vec<u8> {
    let mut steps: Vec<SortStep> = schedule.steps().collect();
    if steps.is_empty() {
        steps.push(SortStep {
            num_entries: schedule.num_entries(),
            group_width: 1,
            group_height: 1,
            step_index: 0,
        });
    }
    let mut bytes = vec![0u8; steps.len() * stride as usize];
    for (slot, step) in bytes.chunks_exact_mut(stride as usize).zip(&steps) {
        slot[..STEP_SIZE as usize].copy_from_slice(bytemuck::bytes_of(step));
    }
    bytes
}

fn uniform_stride(render_device: &RenderDevice) -> u32 {
    render_device
        .limits()
        .min_uniform_buffer_offset_alignment
        .max(STEP_SIZE as u32)
}

impl FromWorld for SortStepBuffer {
    fn from_world(world: &mut World) -> Self {
        let render_device = world.resource::<RenderDevice>();
        let stride = uniform_stride(render_device);
        Self {
            buffer: create_step_buffer(render_device, stride as u64),
            stride,
            slots: 1,
        }
    }
}

fn create_step_buffer(render_device: &RenderDevice, size: u64) -> Buffer {
    render_device.create_buffer(&BufferDescriptor {
        label: Some("sort_steps"),
        size,
        usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

// grows in place so bind groups built later this frame see the new buffer
pub fn prepare_sort_steps(
    plan: Option<Res<FramePlan>>,
    mut steps: ResMut<SortStepBuffer>,
    render_device: Res<RenderDevice>,
    render_queue: Res<RenderQueue>,
) {
    let Some(dispatch) = plan.and_then(|p| p.dispatch) else {
        return;
    };
    let bytes = encode_steps(&dispatch.sort, steps.stride);
    let slots = (bytes.len() / steps.stride as usize) as u32;
    if slots > steps.slots {
        steps.buffer = create_step_buffer(&render_device, bytes.len() as u64);
        steps.slots = slots;
        debug!("sort step buffer grown to {slots} slots");
    }
    render_queue.write_buffer(&steps.buffer, 0, &bytes);
}

pub fn prepare_sort_bind_group(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    layouts: Option<Res<FluidBindGroupLayouts>>,
    buffers: Option<Res<SimulationBuffers>>,
    steps: Option<Res<SortStepBuffer>>,
) {
    let (Some(layouts), Some(buffers), Some(steps)) = (layouts, buffers, steps) else {
        return;
    };
    let bind_group = render_device.create_bind_group(
        Some("fluid_sort_bind_group"),
        &layouts.sort,
        &[
            BindGroupEntry {
                binding: 0,
                resource: buffers.buffer(ParticleBuffer::SpatialIndex).as_entire_binding(),
            },
            BindGroupEntry {
                binding: 1,
                resource: buffers.buffer(ParticleBuffer::SpatialOffset).as_entire_binding(),
            },
            BindGroupEntry {
                binding: 2,
                resource: BindingResource::Buffer(BufferBinding {
                    buffer: &steps.buffer,
                    offset: 0,
                    size: NonZeroU64::new(STEP_SIZE),
                }),
            },
        ],
    );
    commands.insert_resource(SortBindGroup(bind_group));
}
