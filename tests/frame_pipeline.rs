use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use bevy_sph_fluid::cpu::reference::ReferenceDevice;
use bevy_sph_fluid::sim::orchestrator::{
    BufferCommand, FluidSimulation, FrameInput, SimulationConfig,
};
use bevy_sph_fluid::sim::particles::{ParticleArrays, TailFill};
use bevy_sph_fluid::sim::record::{DEFAULT_READ_LIMIT, RecorderState, read_trace, uv_from_positions};
use bevy_sph_fluid::sim::settings::POSITION_FACTOR;
use bevy_sph_fluid::sim::sort::SpatialEntry;
use bevy_sph_fluid::sim::spawner::ParticleSpawner;
use glam::{UVec2, Vec2};

#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn frame(wall_delta: f32) -> FrameInput {
    FrameInput {
        wall_delta,
        ..Default::default()
    }
}

fn small_config(initial: u32, max: u32) -> SimulationConfig {
    SimulationConfig {
        initial_particle_count: initial,
        max_particle_count: max,
        window_size: UVec2::new(400, 200),
        settle_frames: 3,
        ..Default::default()
    }
}

fn run(sim: &mut FluidSimulation, device: &mut ReferenceDevice, frames: usize) {
    for _ in 0..frames {
        let plan = sim.do_frame(frame(0.005)).unwrap();
        device.execute(&plan).unwrap();
    }
}

fn stirred_block(count: usize) -> ParticleArrays {
    let mut arrays = ParticleArrays::initial_block(count);
    for i in 0..count {
        let f = i as f32 + 1.0;
        arrays.predicted_positions[i][0] += 0.25;
        arrays.velocities[i] = [f, -2.0 * f];
        arrays.densities[i] = [3.0 * f, 4.0 * f];
        arrays.spatial_indices[i] = SpatialEntry {
            index: (count - 1 - i) as u32,
            hash: 31 * i as u32,
            key: i as u32 % 5,
        };
        arrays.spatial_offsets[i] = i as u32 % 5;
    }
    arrays
}

fn assert_same_prefix(arrays: &ParticleArrays, before: &ParticleArrays, n: usize) {
    assert_eq!(arrays.positions[..n], before.positions[..n]);
    assert_eq!(arrays.predicted_positions[..n], before.predicted_positions[..n]);
    assert_eq!(arrays.velocities[..n], before.velocities[..n]);
    assert_eq!(arrays.densities[..n], before.densities[..n]);
    assert_eq!(arrays.spatial_indices[..n], before.spatial_indices[..n]);
    assert_eq!(arrays.spatial_offsets[..n], before.spatial_offsets[..n]);
}

#[test]
fn preserving_resize_keeps_the_prefix_and_appends_the_tail() {
    let mut arrays = stirred_block(10);
    let before = arrays.clone();

    let tail = ParticleArrays::tail(
        2,
        &TailFill {
            positions: Some(vec![[7.0, 7.0], [8.0, 8.0]]),
            velocities: Some(vec![[0.0, -1.0]; 2]),
        },
    )
    .unwrap();
    BufferCommand::Preserve {
        old_count: 10,
        new_count: 12,
        tail,
    }
    .apply_to(&mut arrays)
    .unwrap();

    assert!(arrays.is_consistent());
    assert_eq!(arrays.len(), 12);
    assert_same_prefix(&arrays, &before, 10);
    assert_eq!(arrays.positions[10..], [[7.0, 7.0], [8.0, 8.0]]);
    assert_eq!(arrays.predicted_positions[10..], [[7.0, 7.0], [8.0, 8.0]]);
    assert_eq!(arrays.velocities[10..], [[0.0, -1.0]; 2]);
    assert_eq!(arrays.densities[10..], [[0.0, 0.0]; 2]);
    assert_eq!(arrays.spatial_indices[10..], [SpatialEntry::default(); 2]);
    assert_eq!(arrays.spatial_offsets[10..], [0, 0]);
}

#[test]
fn growing_without_values_zero_fills_every_array() {
    let mut arrays = stirred_block(8);
    let before = arrays.clone();
    BufferCommand::Preserve {
        old_count: 8,
        new_count: 11,
        tail: ParticleArrays::tail(3, &TailFill::default()).unwrap(),
    }
    .apply_to(&mut arrays)
    .unwrap();

    assert_eq!(arrays.len(), 11);
    assert_same_prefix(&arrays, &before, 8);
    assert_eq!(arrays.positions[8..], [[0.0, 0.0]; 3]);
    assert_eq!(arrays.predicted_positions[8..], [[0.0, 0.0]; 3]);
    assert_eq!(arrays.velocities[8..], [[0.0, 0.0]; 3]);
    assert_eq!(arrays.densities[8..], [[0.0, 0.0]; 3]);
    assert_eq!(arrays.spatial_indices[8..], [SpatialEntry::default(); 3]);
    assert_eq!(arrays.spatial_offsets[8..], [0, 0, 0]);
}

#[test]
fn shrinking_keeps_only_the_prefix() {
    let mut arrays = stirred_block(10);
    let before = arrays.clone();
    BufferCommand::Preserve {
        old_count: 10,
        new_count: 4,
        tail: ParticleArrays::zeroed(0),
    }
    .apply_to(&mut arrays)
    .unwrap();
    assert!(arrays.is_consistent());
    assert_eq!(arrays.len(), 4);
    assert_same_prefix(&arrays, &before, 4);
}

#[test]
fn spawning_grows_buffers_until_the_cap() {
    let config = SimulationConfig {
        spawner: ParticleSpawner {
            spawn_interval: 0.01,
            spawn_count: 20,
            ..Default::default()
        },
        ..small_config(100, 160)
    };
    let mut sim = FluidSimulation::new(&config);
    let mut device = ReferenceDevice::default();

    let mut counts = Vec::new();
    for _ in 0..40 {
        let plan = sim.do_frame(frame(0.005)).unwrap();
        device.execute(&plan).unwrap();
        assert_eq!(device.particle_count() as u32, sim.particle_count());
        counts.push(sim.particle_count());
    }

    assert_eq!(counts[0], 100);
    assert!(counts.windows(2).all(|w| w[1] == w[0] || w[1] == w[0] + 20));
    assert_eq!(*counts.last().unwrap(), 160);
    assert!(device.arrays.is_consistent());
}

#[test]
fn restart_keeps_the_current_count() {
    let config = SimulationConfig {
        spawner: ParticleSpawner {
            spawn_interval: 0.005,
            spawn_count: 10,
            ..Default::default()
        },
        ..small_config(50, 80)
    };
    let mut sim = FluidSimulation::new(&config);
    let mut device = ReferenceDevice::default();
    run(&mut sim, &mut device, 3);
    let count = sim.particle_count();
    assert!(count > 50);

    sim.restart();
    let plan = sim.do_frame(frame(0.0)).unwrap();
    assert!(matches!(
        plan.buffer_commands.first(),
        Some(BufferCommand::Reallocate(arrays)) if arrays.len() as u32 == count
    ));
}

fn mean_height(device: &ReferenceDevice) -> f32 {
    let positions = &device.arrays.positions;
    positions.iter().map(|p| p[1]).sum::<f32>() / positions.len() as f32
}

#[test]
fn particles_stay_finite_and_inside_the_box() {
    let mut sim = FluidSimulation::new(&small_config(400, 400));
    let mut device = ReferenceDevice::default();
    run(&mut sim, &mut device, 60);

    let half = Vec2::new(POSITION_FACTOR * sim.aspect_ratio(), POSITION_FACTOR);
    for p in &device.arrays.positions {
        assert!(p[0].is_finite() && p[1].is_finite());
        assert!(p[0].abs() <= half.x + 1e-3 && p[1].abs() <= half.y + 1e-3, "{p:?} escaped");
    }
}

#[test]
fn pressureless_block_falls() {
    let mut sim = FluidSimulation::new(&small_config(400, 400));
    sim.settings_mut().pressure_multiplier = 0.0;
    let mut device = ReferenceDevice::default();
    run(&mut sim, &mut device, 1);
    let start = mean_height(&device);

    run(&mut sim, &mut device, 30);
    let end = mean_height(&device);
    assert!(end < start, "mean height {start} -> {end}");
}

#[test]
fn recording_replays_to_the_same_final_state() {
    let config = small_config(64, 64);
    let sink = SharedSink::default();

    // record
    let mut sim = FluidSimulation::new(&config);
    // replay runs without viscosity, so record without it too
    sim.settings_mut().viscosity_strength = 0.0;
    sim.enter_record_mode(Box::new(sink.clone())).unwrap();
    let mut device = ReferenceDevice::default();
    let mut frames = 0;
    loop {
        let plan = sim.do_frame(frame(0.005)).unwrap();
        device.execute(&plan).unwrap();
        frames += 1;
        if plan.readback {
            break;
        }
        assert!(frames < 100, "recording never asked for positions");
    }
    assert_eq!(sim.recorder_state(), Some(RecorderState::AwaitingPositions));
    let recorded = device.arrays.positions.clone();
    assert!(sim.finish_recording(&recorded).unwrap().is_some());

    let bytes = sink.0.lock().unwrap().clone();
    let recording = read_trace(&bytes[..], DEFAULT_READ_LIMIT).unwrap();
    assert_eq!(recording.delta_times.len(), frames);
    assert_eq!(recording.uvs, uv_from_positions(&recorded, sim.aspect_ratio()));

    // replay
    let mut replay = FluidSimulation::new(&config);
    replay.enter_replay(&recording);
    let mut device = ReferenceDevice::default();
    run(&mut replay, &mut device, frames);
    assert_eq!(device.arrays.positions, recorded);
    assert_eq!(device.uvs, recording.uvs);

    // exhausted: nothing more is dispatched
    let plan = replay.do_frame(frame(0.005)).unwrap();
    assert!(plan.dispatch.is_none());
    assert!(replay.replay_finished());
}

#[test]
fn truncated_trace_is_rejected() {
    let config = small_config(16, 16);
    let sink = SharedSink::default();
    let mut sim = FluidSimulation::new(&config);
    sim.enter_record_mode(Box::new(sink.clone())).unwrap();
    let mut device = ReferenceDevice::default();
    loop {
        let plan = sim.do_frame(frame(0.005)).unwrap();
        device.execute(&plan).unwrap();
        if plan.readback {
            break;
        }
    }
    sim.finish_recording(&device.arrays.positions).unwrap();

    let bytes = sink.0.lock().unwrap().clone();
    assert!(read_trace(&bytes[..bytes.len() - 4], DEFAULT_READ_LIMIT).is_err());
    assert!(read_trace(&bytes[..100], DEFAULT_READ_LIMIT).is_err());
}
