// copying final particle positions back to the host
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use bevy::prelude::*;
use bevy::render::Extract;
use bevy::render::render_resource::{Buffer, BufferDescriptor, BufferUsages, Maintain, MapMode};
use bevy::render::renderer::RenderDevice;

use crate::sim::orchestrator::FluidSimulation;

// frames between the copy request and mapping; the render world runs one
// frame behind the main world
const FRAMES_BEFORE_MAP: u8 = 2;

#[derive(Default)]
enum ReadbackState {
    #[default]
    Idle,
    Waiting {
        frames_left: u8,
    },
}

/// Main-world side: owns the `MAP_READ` buffer the compute node copies
/// positions into.
#[derive(Resource, Default)]
pub struct PositionReadback {
    buffer: Option<Buffer>,
    count: u32,
    state: ReadbackState,
}

// Rendering world copy
#[derive(Resource, Clone)]
pub struct ExtractedReadback {
    pub buffer: Buffer,
    pub size: u64,
}

impl PositionReadback {
    pub fn request(&mut self, render_device: &RenderDevice, count: u32) {
        let size = (count.max(1) as u64) * std::mem::size_of::<[f32; 2]>() as u64;
        self.buffer = Some(render_device.create_buffer(&BufferDescriptor {
            label: Some("position_readback"),
            size,
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }));
        self.count = count;
        self.state = ReadbackState::Waiting {
            frames_left: FRAMES_BEFORE_MAP,
        };
        debug!("position readback requested for {count} particles");
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, ReadbackState::Waiting { .. })
    }
}

pub fn extract_readback(mut commands: Commands, readback: Extract<Res<PositionReadback>>) {
    match &readback.buffer {
        Some(buffer) => commands.insert_resource(ExtractedReadback {
            buffer: buffer.clone(),
            size: buffer.size(),
        }),
        None => commands.remove_resource::<ExtractedReadback>(),
    }
}

fn map_positions(render_device: &RenderDevice, buffer: &Buffer, count: u32) -> Option<Vec<[f32; 2]>> {
    let slice = buffer.slice(..);
    render_device.poll(Maintain::Wait);

    let status = Arc::new(AtomicU8::new(0));
    let cb = status.clone();
    slice.map_async(MapMode::Read, move |r| {
        cb.store(if r.is_ok() { 1 } else { 2 }, Ordering::SeqCst)
    });

    loop {
        render_device.poll(Maintain::Poll);
        match status.load(Ordering::SeqCst) {
            0 => std::thread::yield_now(),
            1 => break,
            _ => {
                buffer.unmap();
                return None;
            }
        }
    }

    let positions = {
        let data = slice.get_mapped_range();
        let all: &[[f32; 2]] = bytemuck::cast_slice(&data);
        all[..(count as usize).min(all.len())].to_vec()
    };
    buffer.unmap();
    Some(positions)
}

/// Finishes the recording once the copied positions are readable.
pub fn poll_position_readback(
    mut readback: ResMut<PositionReadback>,
    mut sim: ResMut<FluidSimulation>,
    render_device: Res<RenderDevice>,
) {
    let ReadbackState::Waiting { frames_left } = readback.state else {
        return;
    };
    if frames_left > 0 {
        readback.state = ReadbackState::Waiting {
            frames_left: frames_left - 1,
        };
        return;
    }

    let Some(buffer) = readback.buffer.take() else {
        readback.state = ReadbackState::Idle;
        return;
    };
    readback.state = ReadbackState::Idle;
    let Some(positions) = map_positions(&render_device, &buffer, readback.count) else {
        error!("mapping the position readback failed");
        panic!("cannot finish the recording without final positions");
    };

    match sim.finish_recording(&positions) {
        Ok(Some(_)) => info!("recording written"),
        Ok(None) => warn!("positions read back with no recording active"),
        Err(err) => {
            error!("failed to finish the recording: {err}");
            panic!("recording trace is incomplete: {err}");
        }
    }
}
