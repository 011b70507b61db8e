// periodic batch injection of particles along a line
use glam::Vec2;
use thiserror::Error;

/// Largest batch a single spawn can stage.
pub const SPAWN_STAGING_CAPACITY: usize = 1000;
pub const SPAWNER_WIRE_SIZE: usize = 32;

const SEPARATION_FACTOR: f32 = 1.5;

#[derive(Error, Debug, PartialEq)]
pub enum SpawnError {
    #[error("spawn batch of {requested} particles exceeds the staging capacity of {capacity}")]
    StagingOverflow { requested: u32, capacity: usize },
    #[error("spawn target holds {available} slots after offset, {requested} required")]
    TargetTooSmall { requested: u32, available: usize },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParticleSpawner {
    pub direction: Vec2,
    pub spawn_point: Vec2,
    pub spawn_interval: f32, // seconds between batches
    pub spawn_count: u32,
    pub initial_velocity: f32,
    pub since_last_spawn: f32,
}

/// Positions and velocities of one freshly spawned batch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpawnBatch {
    pub positions: Vec<[f32; 2]>,
    pub velocities: Vec<[f32; 2]>,
}

impl Default for ParticleSpawner {
    fn default() -> Self {
        Self {
            direction: Vec2::new(0.0, -1.0),
            spawn_point: Vec2::new(0.0, crate::sim::settings::POSITION_FACTOR - 50.0),
            spawn_interval: 0.05,
            spawn_count: 60,
            initial_velocity: -7.5,
            since_last_spawn: 0.0,
        }
    }
}

impl ParticleSpawner {
    /// Accumulates `delta_time`; true exactly when a batch is due.
    pub fn tick(&mut self, delta_time: f32) -> bool {
        self.since_last_spawn += delta_time;
        if self.since_last_spawn >= self.spawn_interval {
            self.since_last_spawn = 0.0;
            return true;
        }
        false
    }

    /// Writes `spawn_count` particles into `positions[offset..]` and
    /// `velocities[offset..]`.
    pub fn spawn(
        &self,
        positions: &mut [[f32; 2]],
        velocities: &mut [[f32; 2]],
        offset: usize,
        particle_size: f32,
        aspect_ratio: f32,
    ) -> Result<(), SpawnError> {
        let count = self.spawn_count as usize;
        let available = positions.len().min(velocities.len()).saturating_sub(offset);
        if available < count {
            return Err(SpawnError::TargetTooSmall {
                requested: self.spawn_count,
                available,
            });
        }

        // perpendicular to the spawn direction
        let across = Vec2::new(self.direction.y, -self.direction.x);
        let spacing = particle_size * SEPARATION_FACTOR;
        let centre = self.spawn_point * Vec2::new(aspect_ratio, 1.0);
        let first = centre + across * (spacing * (count.saturating_sub(1)) as f32 * 0.5);
        let velocity = self.direction * self.initial_velocity;

        for i in 0..count {
            let p = first - across * (spacing * i as f32);
            positions[offset + i] = p.to_array();
            velocities[offset + i] = velocity.to_array();
        }
        Ok(())
    }

    /// Stages one batch through the fixed-size spawn buffer.
    pub fn batch(&self, particle_size: f32, aspect_ratio: f32) -> Result<SpawnBatch, SpawnError> {
        if self.spawn_count as usize > SPAWN_STAGING_CAPACITY {
            return Err(SpawnError::StagingOverflow {
                requested: self.spawn_count,
                capacity: SPAWN_STAGING_CAPACITY,
            });
        }
        let mut positions = vec![[0.0; 2]; self.spawn_count as usize];
        let mut velocities = vec![[0.0; 2]; self.spawn_count as usize];
        self.spawn(&mut positions, &mut velocities, 0, particle_size, aspect_ratio)?;
        Ok(SpawnBatch { positions, velocities })
    }

    pub fn encode(&self) -> [u8; SPAWNER_WIRE_SIZE] {
        let words = [
            self.direction.x.to_bits(),
            self.direction.y.to_bits(),
            self.spawn_point.x.to_bits(),
            self.spawn_point.y.to_bits(),
            self.spawn_interval.to_bits(),
            self.spawn_count,
            self.initial_velocity.to_bits(),
            self.since_last_spawn.to_bits(),
        ];
        let mut out = [0u8; SPAWNER_WIRE_SIZE];
        for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8; SPAWNER_WIRE_SIZE]) -> Self {
        let mut w = [0u32; 8];
        for (word, chunk) in w.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Self {
            direction: Vec2::new(f32::from_bits(w[0]), f32::from_bits(w[1])),
            spawn_point: Vec2::new(f32::from_bits(w[2]), f32::from_bits(w[3])),
            spawn_interval: f32::from_bits(w[4]),
            spawn_count: w[5],
            initial_velocity: f32::from_bits(w[6]),
            since_last_spawn: f32::from_bits(w[7]),
        }
    }
}
