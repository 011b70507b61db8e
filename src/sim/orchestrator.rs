use std::io::Write;

use bevy::prelude::*;
use bevy::render::extract_resource::ExtractResource;
use thiserror::Error;

use crate::gpu::ffi::FrameParams;
use crate::sim::collision::CollisionMap;
use crate::sim::kernels::KernelConstants;
use crate::sim::mirrored::DeviceMirrored;
use crate::sim::mode::{OperatingMode, ReplayCursor};
use crate::sim::particles::{ParticleArrays, ResizeError, TailFill};
use crate::sim::record::{
    DEFAULT_READ_LIMIT, DEFAULT_SETTLE_FRAMES, RecordError, Recorder, RecorderState, Recording,
    TraceHeader, TraceWriter,
};
use crate::sim::settings::{GeneralSettings, PARTICLE_SIZE, POSITION_FACTOR};
use crate::sim::sort::{BitonicSchedule, SortError};
use crate::sim::spawner::{ParticleSpawner, SpawnError};

/// Sink a recording is written to.
pub type TraceSink = Box<dyn Write + Send + Sync>;

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error(transparent)]
    Resize(#[from] ResizeError),
    #[error(transparent)]
    Sort(#[from] SortError),
    #[error(transparent)]
    Record(#[from] RecordError),
}

// ==================== configuration ==================================

#[derive(Resource, Clone, Debug)]
pub struct SimulationConfig {
    pub initial_particle_count: u32,
    /// Hard cap on the particle count; spawning stops once it is reached.
    pub max_particle_count: u32,
    pub window_size: UVec2,
    pub spawner: ParticleSpawner,
    pub settle_frames: u32,
    pub read_limit: usize,
    pub trace_path: String,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            initial_particle_count: 25_000,
            max_particle_count: 32_500,
            window_size: UVec2::new(2500, 1200),
            // spawner idles until a recording turns it on
            spawner: ParticleSpawner {
                spawn_interval: f32::MAX,
                ..Default::default()
            },
            settle_frames: DEFAULT_SETTLE_FRAMES,
            read_limit: DEFAULT_READ_LIMIT,
            trace_path: ".sim".to_string(),
        }
    }
}

impl SimulationConfig {
    /// Starts from a handful of particles and pours the rest in from the
    /// spawner, which is what recordings are made from.
    pub fn demo_pour() -> Self {
        Self {
            initial_particle_count: 60,
            max_particle_count: 20_000,
            spawner: ParticleSpawner::default(),
            ..Default::default()
        }
    }
}

// ==================== UI facing state ================================

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InteractionSettings {
    pub mouse_pull: bool,
    pub strength: f32,
    pub paint_collision: bool,
    pub paint_size: IVec2, // pixels
}

impl Default for InteractionSettings {
    fn default() -> Self {
        Self {
            mouse_pull: true,
            strength: 1000.0,
            paint_collision: false,
            paint_size: IVec2::new(30, 30),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeatmapStop {
    pub color: [f32; 4],
    pub position: f32, // fraction of max speed, ascending
}

pub fn default_heatmap() -> [HeatmapStop; 4] {
    let rgb = |r: f32, g: f32, b: f32| [r / 255.0, g / 255.0, b / 255.0, 1.0];
    [
        HeatmapStop { color: rgb(28.0, 70.0, 158.0), position: 0.15 },
        HeatmapStop { color: rgb(94.0, 190.0, 149.0), position: 0.5 },
        HeatmapStop { color: rgb(200.0, 200.0, 17.0), position: 0.7 },
        HeatmapStop { color: rgb(200.0, 73.0, 43.0), position: 1.0 },
    ]
}

/// Pointer and elapsed time sampled for one frame. `pointer` is in
/// normalized window coordinates, [-1, 1] on both axes, y pointing down.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameInput {
    pub pointer: Vec2,
    pub left: bool,
    pub right: bool,
    pub wall_delta: f32,
}

// ==================== per-frame device work ==========================

/// A change to the six particle buffers, applied before any pass runs.
#[derive(Clone, Debug, PartialEq)]
pub enum BufferCommand {
    /// Fresh buffers holding `arrays`.
    Reallocate(ParticleArrays),
    /// Fresh buffers of `new_count`, the first `min(old, new)` entries
    /// copied over, then `tail` written after them when growing.
    Preserve {
        old_count: u32,
        new_count: u32,
        tail: ParticleArrays,
    },
}

impl BufferCommand {
    pub fn particle_count(&self) -> u32 {
        match self {
            BufferCommand::Reallocate(arrays) => arrays.len() as u32,
            BufferCommand::Preserve { new_count, .. } => *new_count,
        }
    }

    /// Host-side application, mirroring what the device path does.
    pub fn apply_to(&self, arrays: &mut ParticleArrays) -> Result<(), ResizeError> {
        match self {
            BufferCommand::Reallocate(fresh) => {
                *arrays = fresh.clone();
                Ok(())
            }
            BufferCommand::Preserve { new_count, tail, .. } => {
                let fill = TailFill {
                    positions: Some(tail.positions.clone()),
                    velocities: Some(tail.velocities.clone()),
                };
                if *new_count as usize <= arrays.len() {
                    return arrays.resize_preserving(*new_count as usize, &TailFill::default());
                }
                arrays.resize_preserving(*new_count as usize, &fill)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DispatchPlan {
    pub particle_count: u32,
    pub sort: BitonicSchedule,
}

/// Everything the render world needs to run this frame.
#[derive(Resource, Clone, Debug, Default, ExtractResource)]
pub struct FramePlan {
    pub buffer_commands: Vec<BufferCommand>,
    pub params: Option<FrameParams>,
    pub collision_upload: Option<Vec<u32>>,
    pub uv_upload: Option<Vec<[f32; 2]>>,
    pub dispatch: Option<DispatchPlan>,
    pub readback: bool,
}

// ==================== orchestrator ===================================

#[derive(Resource)]
pub struct FluidSimulation {
    settings: DeviceMirrored<GeneralSettings>,
    spawner: ParticleSpawner,
    collision: CollisionMap,
    mode: OperatingMode,
    recorder: Option<Recorder<TraceSink>>,
    interaction: InteractionSettings,
    heatmap: [HeatmapStop; 4],
    initial_particle_count: u32,
    particle_count: u32,
    max_particle_count: u32,
    window_size: UVec2,
    aspect_ratio: f32,
    aspect_ratio_change: f32,
    settle_frames: u32,
    paused: bool,
    replay_finished: bool,
    readback_requested: bool,
    pending: Vec<BufferCommand>,
    pending_uvs: Option<Vec<[f32; 2]>>,
}

impl FluidSimulation {
    pub fn new(config: &SimulationConfig) -> Self {
        let size = config.window_size.max(UVec2::ONE);
        let count = config.initial_particle_count;
        let mut sim = Self {
            settings: DeviceMirrored::new(GeneralSettings::initial(count)),
            spawner: config.spawner.clone(),
            collision: CollisionMap::new(size.x, size.y),
            mode: OperatingMode::Live,
            recorder: None,
            interaction: InteractionSettings::default(),
            heatmap: default_heatmap(),
            initial_particle_count: count,
            particle_count: count,
            max_particle_count: config.max_particle_count,
            window_size: size,
            aspect_ratio: size.x as f32 / size.y as f32,
            aspect_ratio_change: 1.0,
            settle_frames: config.settle_frames,
            paused: false,
            replay_finished: false,
            readback_requested: false,
            pending: Vec::new(),
            pending_uvs: None,
        };
        sim.restart_with(count);
        sim
    }

    /// Runs the host half of one frame and describes the device half.
    pub fn do_frame(&mut self, input: FrameInput) -> Result<FramePlan, SimulationError> {
        let mut plan = FramePlan {
            buffer_commands: std::mem::take(&mut self.pending),
            uv_upload: self.pending_uvs.take(),
            ..Default::default()
        };

        if self.paused || self.replay_finished {
            plan.collision_upload = self.collision.take_upload();
            return Ok(plan);
        }

        let Some(delta_time) = self.mode.next_delta(input.wall_delta) else {
            self.replay_finished = true;
            info!("replay finished after {} frames", self.replay_frame());
            plan.collision_upload = self.collision.take_upload();
            return Ok(plan);
        };

        if self.spawner.tick(delta_time) && self.particle_count < self.max_particle_count {
            let mut batch = self
                .spawner
                .batch(PARTICLE_SIZE * POSITION_FACTOR, self.aspect_ratio)?;
            // the last batch is cut to land exactly on the cap
            let room = (self.max_particle_count - self.particle_count) as usize;
            batch.positions.truncate(room);
            batch.velocities.truncate(room);
            let old_count = self.particle_count;
            let new_count = old_count + batch.positions.len() as u32;
            let tail = ParticleArrays::tail((new_count - old_count) as usize, &batch.into())?;
            plan.buffer_commands.push(BufferCommand::Preserve {
                old_count,
                new_count,
                tail,
            });
            self.particle_count = new_count;
        }

        self.set_frame_parameters(&input, delta_time);

        let map_size = [self.collision.width(), self.collision.height()];
        let (aspect, change) = (self.aspect_ratio, self.aspect_ratio_change);
        self.settings.flush_if_dirty(|s| {
            plan.params = Some(FrameParams::new(*s, aspect, change, map_size));
        });
        self.aspect_ratio_change = 1.0;
        plan.collision_upload = self.collision.take_upload();

        if self.particle_count > 0 {
            plan.dispatch = Some(DispatchPlan {
                particle_count: self.particle_count,
                sort: BitonicSchedule::new(self.particle_count, self.particle_count)?,
            });
        }

        if let Some(recorder) = self.recorder.as_mut() {
            let before = recorder.state();
            let state = recorder.on_frame(delta_time, self.particle_count)?;
            if before == RecorderState::Recording && state != before {
                info!(
                    "recording reached {} particles, settling for {} frames",
                    self.particle_count, self.settle_frames
                );
            }
            if state == RecorderState::AwaitingPositions && !self.readback_requested {
                self.readback_requested = true;
                plan.readback = true;
            }
        }

        Ok(plan)
    }

    fn set_frame_parameters(&mut self, input: &FrameInput, delta_time: f32) {
        let mut strength = 0.0;
        if self.interaction.paint_collision {
            let pixel = self.pointer_to_pixel(input.pointer);
            if input.left {
                self.collision.paint_rect(pixel, self.interaction.paint_size, true);
            } else if input.right {
                self.collision.paint_rect(pixel, self.interaction.paint_size, false);
            }
        } else if self.interaction.mouse_pull {
            if input.left {
                strength = self.interaction.strength;
            } else if input.right {
                strength = -self.interaction.strength;
            }
        }
        let point = self.pointer_to_world(input.pointer);
        let replay = self.mode.is_replay();
        let count = self.particle_count;

        let settings = self.settings.get();
        settings.apply_kernel_constants(&KernelConstants::from_radius(settings.smoothing_radius));
        settings.delta_time = delta_time;
        settings.num_particles = count;
        settings.interaction_input_point = point.to_array();
        settings.interaction_input_strength = strength;
        if replay {
            settings.viscosity_strength = 0.0;
        }
    }

    pub fn pointer_to_world(&self, pointer: Vec2) -> Vec2 {
        Vec2::new(
            pointer.x * POSITION_FACTOR * self.aspect_ratio,
            -pointer.y * POSITION_FACTOR,
        )
    }

    pub fn pointer_to_pixel(&self, pointer: Vec2) -> IVec2 {
        ((pointer + Vec2::ONE) * 0.5 * self.window_size.as_vec2()).as_ivec2()
    }

    // ==================== actions ====================================

    /// Resets particles to the starting block, keeping the current count.
    pub fn restart(&mut self) {
        self.restart_with(self.particle_count);
    }

    fn restart_with(&mut self, count: u32) {
        self.pending.clear();
        self.pending
            .push(BufferCommand::Reallocate(ParticleArrays::initial_block(count as usize)));
        self.particle_count = count;
        self.settings.get().num_particles = count;
        self.spawner.since_last_spawn = 0.0;
        self.readback_requested = false;
    }

    pub fn set_default_settings(&mut self) {
        self.settings.set(GeneralSettings::initial(self.particle_count));
        self.interaction = InteractionSettings::default();
    }

    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
        info!("simulation {}", if self.paused { "paused" } else { "resumed" });
    }

    pub fn set_window_size(&mut self, width: u32, height: u32) {
        // minimized windows report zero
        if width == 0 || height == 0 {
            return;
        }
        let size = UVec2::new(width, height);
        let aspect = width as f32 / height as f32;
        if size != self.window_size {
            self.collision.resize(width, height);
            self.aspect_ratio_change = aspect / self.aspect_ratio;
            debug!("window resized to {width}x{height}, aspect change {}", self.aspect_ratio_change);
        }
        self.aspect_ratio = aspect;
        self.window_size = size;
    }

    /// Restarts from the initial count and starts writing a trace to `sink`.
    pub fn enter_record_mode(&mut self, sink: TraceSink) -> Result<(), SimulationError> {
        self.mode = OperatingMode::Live;
        self.replay_finished = false;
        self.restart_with(self.initial_particle_count);
        let header = TraceHeader {
            settings: *self.settings.peek(),
            spawner: self.spawner.clone(),
        };
        let writer = TraceWriter::begin(sink, &header)?;
        self.recorder = Some(Recorder::new(writer, self.max_particle_count, self.settle_frames));
        info!(
            "recording from {} particles up to {}",
            self.initial_particle_count, self.max_particle_count
        );
        Ok(())
    }

    /// Closes the recording with the final particle positions.
    pub fn finish_recording(&mut self, positions: &[[f32; 2]]) -> Result<Option<TraceSink>, SimulationError> {
        let Some(recorder) = self.recorder.as_mut() else {
            return Ok(None);
        };
        let frames = recorder.frames();
        let sink = recorder.finish(positions, self.aspect_ratio)?;
        self.recorder = None;
        info!("recording finished: {frames} frames, {} particles", positions.len());
        Ok(Some(sink))
    }

    /// Switches to playback of `recording`, restarting from its header.
    pub fn enter_replay(&mut self, recording: &Recording) {
        self.recorder = None;
        self.settings.set(recording.header.settings);
        self.spawner = recording.header.spawner.clone();
        self.initial_particle_count = recording.header.settings.num_particles;
        // the trace's final count is where spawning stopped
        if !recording.uvs.is_empty() {
            self.max_particle_count = recording.uvs.len() as u32;
        }
        self.restart_with(self.initial_particle_count);
        self.mode = OperatingMode::Replay(ReplayCursor::new(recording));
        self.pending_uvs = Some(recording.uvs.clone());
        self.replay_finished = false;
        info!(
            "replaying {} frames up to {} particles",
            recording.delta_times.len(),
            recording.uvs.len()
        );
    }

    // ==================== accessors ==================================

    pub fn settings(&self) -> &GeneralSettings {
        self.settings.peek()
    }

    pub fn settings_mut(&mut self) -> &mut GeneralSettings {
        self.settings.get()
    }

    pub fn interaction(&self) -> &InteractionSettings {
        &self.interaction
    }

    pub fn interaction_mut(&mut self) -> &mut InteractionSettings {
        &mut self.interaction
    }

    pub fn heatmap(&self) -> &[HeatmapStop; 4] {
        &self.heatmap
    }

    pub fn heatmap_mut(&mut self) -> &mut [HeatmapStop; 4] {
        &mut self.heatmap
    }

    pub fn spawner(&self) -> &ParticleSpawner {
        &self.spawner
    }

    pub fn spawner_mut(&mut self) -> &mut ParticleSpawner {
        &mut self.spawner
    }

    pub fn collision(&self) -> &CollisionMap {
        &self.collision
    }

    pub fn mode(&self) -> &OperatingMode {
        &self.mode
    }

    pub fn recorder_state(&self) -> Option<RecorderState> {
        self.recorder.as_ref().map(|r| r.state())
    }

    pub fn particle_count(&self) -> u32 {
        self.particle_count
    }

    pub fn max_particle_count(&self) -> u32 {
        self.max_particle_count
    }

    pub fn set_max_particle_count(&mut self, max: u32) {
        self.max_particle_count = max;
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.aspect_ratio
    }

    pub fn window_size(&self) -> UVec2 {
        self.window_size
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn replay_finished(&self) -> bool {
        self.replay_finished
    }

    fn replay_frame(&self) -> usize {
        match &self.mode {
            OperatingMode::Replay(cursor) => cursor.frame(),
            OperatingMode::Live => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::settings::MAX_DELTA_TIME;

    fn config() -> SimulationConfig {
        SimulationConfig {
            initial_particle_count: 16,
            max_particle_count: 32,
            window_size: UVec2::new(200, 100),
            ..Default::default()
        }
    }

    fn frame(dt: f32) -> FrameInput {
        FrameInput {
            wall_delta: dt,
            ..Default::default()
        }
    }

    #[test]
    fn first_frame_carries_initial_block() {
        let mut sim = FluidSimulation::new(&config());
        let plan = sim.do_frame(frame(0.001)).unwrap();
        assert_eq!(plan.buffer_commands.len(), 1);
        assert_eq!(plan.buffer_commands[0].particle_count(), 16);
        assert!(plan.params.is_some());
        assert!(plan.collision_upload.is_some());
        assert_eq!(plan.dispatch.map(|d| d.particle_count), Some(16));

        // nothing new next frame besides params
        let plan = sim.do_frame(frame(0.001)).unwrap();
        assert!(plan.buffer_commands.is_empty());
        assert!(plan.collision_upload.is_none());
    }

    #[test]
    fn delta_is_clamped() {
        let mut sim = FluidSimulation::new(&config());
        let plan = sim.do_frame(frame(0.5)).unwrap();
        assert_eq!(plan.params.unwrap().settings.delta_time, MAX_DELTA_TIME);
    }

    #[test]
    fn spawning_stops_at_max_count() {
        let mut cfg = config();
        cfg.spawner = ParticleSpawner {
            spawn_interval: 0.001,
            spawn_count: 10,
            ..Default::default()
        };
        let mut sim = FluidSimulation::new(&cfg);

        let mut grown = Vec::new();
        for _ in 0..5 {
            let plan = sim.do_frame(frame(0.002)).unwrap();
            for c in &plan.buffer_commands {
                if let BufferCommand::Preserve { old_count, new_count, tail } = c {
                    assert_eq!(tail.len() as u32, new_count - old_count);
                    grown.push(*new_count);
                }
            }
        }
        // 16 -> 26 -> 32, the second batch cut to the cap
        assert_eq!(grown, vec![26, 32]);
        assert_eq!(sim.particle_count(), 32);
    }

    #[test]
    fn oversized_batch_is_cut_to_the_cap() {
        let mut cfg = config();
        cfg.spawner = ParticleSpawner {
            spawn_interval: 0.001,
            spawn_count: 20,
            ..Default::default()
        };
        let mut sim = FluidSimulation::new(&cfg);
        // the batch is due on the first frame, right after the initial block
        let plan = sim.do_frame(frame(0.002)).unwrap();

        let [BufferCommand::Reallocate(_), BufferCommand::Preserve { old_count, new_count, tail }] =
            plan.buffer_commands.as_slice()
        else {
            panic!("expected restart then growth, got {:?}", plan.buffer_commands);
        };
        assert_eq!((*old_count, *new_count), (16, 32));
        assert_eq!(tail.len(), 16);
        assert_eq!(sim.particle_count(), sim.max_particle_count());

        // capped: no further growth
        let plan = sim.do_frame(frame(0.002)).unwrap();
        assert!(plan.buffer_commands.is_empty());
    }

    #[test]
    fn pointer_mapping() {
        let sim = FluidSimulation::new(&config());
        assert_eq!(
            sim.pointer_to_world(Vec2::new(1.0, 1.0)),
            Vec2::new(2.0 * POSITION_FACTOR, -POSITION_FACTOR)
        );
        assert_eq!(sim.pointer_to_pixel(Vec2::new(0.0, -1.0)), IVec2::new(100, 0));
    }

    #[test]
    fn interaction_signs() {
        let mut sim = FluidSimulation::new(&config());
        let mut input = frame(0.001);
        input.left = true;
        let plan = sim.do_frame(input).unwrap();
        assert_eq!(plan.params.unwrap().settings.interaction_input_strength, 1000.0);

        input.left = false;
        input.right = true;
        let plan = sim.do_frame(input).unwrap();
        assert_eq!(plan.params.unwrap().settings.interaction_input_strength, -1000.0);

        sim.interaction_mut().paint_collision = true;
        let plan = sim.do_frame(input).unwrap();
        assert_eq!(plan.params.unwrap().settings.interaction_input_strength, 0.0);
        // erasing an empty map still re-uploads
        assert!(plan.collision_upload.is_some());
    }

    #[test]
    fn pause_skips_dispatch() {
        let mut sim = FluidSimulation::new(&config());
        sim.toggle_pause();
        let plan = sim.do_frame(frame(0.001)).unwrap();
        assert!(plan.dispatch.is_none());
        // the restart still reaches the device
        assert_eq!(plan.buffer_commands.len(), 1);
    }

    #[test]
    fn resize_reports_aspect_change_once() {
        let mut sim = FluidSimulation::new(&config());
        sim.set_window_size(100, 100);
        assert_eq!(sim.collision().width(), 100);
        let plan = sim.do_frame(frame(0.001)).unwrap();
        assert_eq!(plan.params.unwrap().aspect_ratio_change, 0.5);
        let plan = sim.do_frame(frame(0.001)).unwrap();
        assert_eq!(plan.params.unwrap().aspect_ratio_change, 1.0);
    }

    #[test]
    fn restart_drops_pending_growth() {
        let mut sim = FluidSimulation::new(&config());
        sim.do_frame(frame(0.001)).unwrap();
        sim.restart();
        let plan = sim.do_frame(frame(0.001)).unwrap();
        assert!(matches!(
            plan.buffer_commands.as_slice(),
            [BufferCommand::Reallocate(a)] if a.len() == 16
        ));
    }
}
