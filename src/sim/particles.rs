// host-side view of the six per-particle device arrays and their resize rules
use thiserror::Error;

use crate::sim::settings::{PARTICLE_SIZE, POSITION_FACTOR};
use crate::sim::sort::SpatialEntry;
use crate::sim::spawner::SpawnBatch;

// horizontal packing of the starting block
const BLOCK_REDUCE_FACTOR: f32 = 0.65;

#[derive(Error, Debug, PartialEq)]
pub enum ResizeError {
    #[error("{buffer} tail holds {got} entries, {expected} new particles requested")]
    TailLength {
        buffer: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("requested {requested} particles, capacity is {capacity}")]
    CapacityExceeded { requested: u32, capacity: u32 },
}

/// The per-particle device buffers, in binding order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParticleBuffer {
    Position,
    PredictedPosition,
    Velocity,
    Density,
    SpatialIndex,
    SpatialOffset,
}

impl ParticleBuffer {
    pub const ALL: [ParticleBuffer; 6] = [
        ParticleBuffer::Position,
        ParticleBuffer::PredictedPosition,
        ParticleBuffer::Velocity,
        ParticleBuffer::Density,
        ParticleBuffer::SpatialIndex,
        ParticleBuffer::SpatialOffset,
    ];

    pub fn element_size(self) -> usize {
        match self {
            ParticleBuffer::SpatialIndex => std::mem::size_of::<SpatialEntry>(),
            ParticleBuffer::SpatialOffset => std::mem::size_of::<u32>(),
            _ => std::mem::size_of::<[f32; 2]>(),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ParticleBuffer::Position => "particle_positions",
            ParticleBuffer::PredictedPosition => "particle_predicted_positions",
            ParticleBuffer::Velocity => "particle_velocities",
            ParticleBuffer::Density => "particle_densities",
            ParticleBuffer::SpatialIndex => "spatial_indices",
            ParticleBuffer::SpatialOffset => "spatial_offsets",
        }
    }
}

/// Values for particles appended by a growing resize. `None` means zero.
/// Supplied positions seed both Position and PredictedPosition.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TailFill {
    pub positions: Option<Vec<[f32; 2]>>,
    pub velocities: Option<Vec<[f32; 2]>>,
}

impl From<SpawnBatch> for TailFill {
    fn from(batch: SpawnBatch) -> Self {
        Self {
            positions: Some(batch.positions),
            velocities: Some(batch.velocities),
        }
    }
}

/// All six arrays; every array always has the same length.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParticleArrays {
    pub positions: Vec<[f32; 2]>,
    pub predicted_positions: Vec<[f32; 2]>,
    pub velocities: Vec<[f32; 2]>,
    pub densities: Vec<[f32; 2]>,
    pub spatial_indices: Vec<SpatialEntry>,
    pub spatial_offsets: Vec<u32>,
}

impl ParticleArrays {
    pub fn zeroed(count: usize) -> Self {
        Self {
            positions: vec![[0.0; 2]; count],
            predicted_positions: vec![[0.0; 2]; count],
            velocities: vec![[0.0; 2]; count],
            densities: vec![[0.0; 2]; count],
            spatial_indices: vec![SpatialEntry::default(); count],
            spatial_offsets: vec![0; count],
        }
    }

    /// Resting block of particles centred on the origin.
    pub fn initial_block(count: usize) -> Self {
        let mut arrays = Self::zeroed(count);
        if count == 0 {
            return arrays;
        }

        let rows = (count as f64).sqrt() as usize;
        let per_row = count / rows;
        let dx = PARTICLE_SIZE * BLOCK_REDUCE_FACTOR * POSITION_FACTOR;
        let dy = PARTICLE_SIZE * POSITION_FACTOR;
        let x_start = -(per_row as f32 / 2.0) * PARTICLE_SIZE * BLOCK_REDUCE_FACTOR * POSITION_FACTOR;
        let y_start = -(rows as f32 / 2.0) * PARTICLE_SIZE * POSITION_FACTOR;

        for i in 0..count {
            // leftovers go on one extra row above the block
            let (row, column) = if i < rows * per_row {
                (i / per_row, i % per_row)
            } else {
                (rows, i - rows * per_row)
            };
            arrays.positions[i] = [x_start + column as f32 * dx, y_start + row as f32 * dy];
        }
        arrays.predicted_positions = arrays.positions.clone();
        arrays
    }

    pub fn len(&self) -> usize {
        debug_assert!(self.is_consistent());
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_consistent(&self) -> bool {
        let n = self.positions.len();
        self.predicted_positions.len() == n
            && self.velocities.len() == n
            && self.densities.len() == n
            && self.spatial_indices.len() == n
            && self.spatial_offsets.len() == n
    }

    pub fn bytes(&self, buffer: ParticleBuffer) -> &[u8] {
        match buffer {
            ParticleBuffer::Position => bytemuck::cast_slice(&self.positions),
            ParticleBuffer::PredictedPosition => bytemuck::cast_slice(&self.predicted_positions),
            ParticleBuffer::Velocity => bytemuck::cast_slice(&self.velocities),
            ParticleBuffer::Density => bytemuck::cast_slice(&self.densities),
            ParticleBuffer::SpatialIndex => bytemuck::cast_slice(&self.spatial_indices),
            ParticleBuffer::SpatialOffset => bytemuck::cast_slice(&self.spatial_offsets),
        }
    }

    /// The `added` entries a growing resize appends.
    pub fn tail(added: usize, fill: &TailFill) -> Result<Self, ResizeError> {
        fn checked(
            buffer: &'static str,
            values: &Option<Vec<[f32; 2]>>,
            expected: usize,
        ) -> Result<Vec<[f32; 2]>, ResizeError> {
            match values {
                Some(v) if v.len() != expected => Err(ResizeError::TailLength {
                    buffer,
                    expected,
                    got: v.len(),
                }),
                Some(v) => Ok(v.clone()),
                None => Ok(vec![[0.0; 2]; expected]),
            }
        }

        let positions = checked("position", &fill.positions, added)?;
        let velocities = checked("velocity", &fill.velocities, added)?;
        Ok(Self {
            predicted_positions: positions.clone(),
            positions,
            velocities,
            densities: vec![[0.0; 2]; added],
            spatial_indices: vec![SpatialEntry::default(); added],
            spatial_offsets: vec![0; added],
        })
    }

    /// Reallocates to `count` without keeping contents.
    pub fn resize_destructive(&mut self, count: usize) {
        *self = Self::zeroed(count);
    }

    /// Keeps the overlapping prefix; new entries come from `fill`.
    pub fn resize_preserving(&mut self, count: usize, fill: &TailFill) -> Result<(), ResizeError> {
        let old = self.len();
        if count <= old {
            self.truncate(count);
            return Ok(());
        }
        let tail = Self::tail(count - old, fill)?;
        self.append(tail);
        Ok(())
    }

    fn truncate(&mut self, count: usize) {
        self.positions.truncate(count);
        self.predicted_positions.truncate(count);
        self.velocities.truncate(count);
        self.densities.truncate(count);
        self.spatial_indices.truncate(count);
        self.spatial_offsets.truncate(count);
    }

    fn append(&mut self, mut tail: Self) {
        self.positions.append(&mut tail.positions);
        self.predicted_positions.append(&mut tail.predicted_positions);
        self.velocities.append(&mut tail.velocities);
        self.densities.append(&mut tail.densities);
        self.spatial_indices.append(&mut tail.spatial_indices);
        self.spatial_offsets.append(&mut tail.spatial_offsets);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_block_layout() {
        let a = ParticleArrays::initial_block(10);
        assert_eq!(a.len(), 10);
        // 3 rows of 3 plus one leftover
        assert_eq!(a.positions[0][1], a.positions[2][1]);
        assert!(a.positions[3][1] > a.positions[0][1]);
        assert_eq!(a.positions[9][0], a.positions[0][0]);
        assert!(a.positions[9][1] > a.positions[8][1]);
        assert_eq!(a.positions, a.predicted_positions);
        assert!(a.velocities.iter().all(|v| *v == [0.0, 0.0]));
    }

    // every entry of every array distinct and non-zero
    fn marked(count: usize) -> ParticleArrays {
        let mut a = ParticleArrays::zeroed(count);
        for i in 0..count {
            let f = i as f32 + 1.0;
            a.positions[i] = [f, -f];
            a.predicted_positions[i] = [f + 0.5, -f - 0.5];
            a.velocities[i] = [2.0 * f, 3.0 * f];
            a.densities[i] = [10.0 * f, 20.0 * f];
            a.spatial_indices[i] = SpatialEntry {
                index: i as u32 + 1,
                hash: 100 + i as u32,
                key: 7 + i as u32,
            };
            a.spatial_offsets[i] = 1000 + i as u32;
        }
        a
    }

    fn assert_prefix(a: &ParticleArrays, before: &ParticleArrays, n: usize) {
        assert_eq!(a.positions[..n], before.positions[..n]);
        assert_eq!(a.predicted_positions[..n], before.predicted_positions[..n]);
        assert_eq!(a.velocities[..n], before.velocities[..n]);
        assert_eq!(a.densities[..n], before.densities[..n]);
        assert_eq!(a.spatial_indices[..n], before.spatial_indices[..n]);
        assert_eq!(a.spatial_offsets[..n], before.spatial_offsets[..n]);
    }

    #[test]
    fn growing_keeps_every_prefix_and_zero_fills_the_tail() {
        let mut a = marked(6);
        let before = a.clone();
        a.resize_preserving(10, &TailFill::default()).unwrap();

        assert!(a.is_consistent());
        assert_eq!(a.len(), 10);
        assert_prefix(&a, &before, 6);
        assert!(a.positions[6..].iter().all(|p| *p == [0.0, 0.0]));
        assert!(a.predicted_positions[6..].iter().all(|p| *p == [0.0, 0.0]));
        assert!(a.velocities[6..].iter().all(|v| *v == [0.0, 0.0]));
        assert!(a.densities[6..].iter().all(|d| *d == [0.0, 0.0]));
        assert!(a.spatial_indices[6..].iter().all(|e| *e == SpatialEntry::default()));
        assert!(a.spatial_offsets[6..].iter().all(|o| *o == 0));
    }

    #[test]
    fn growing_with_supplied_values_seeds_both_position_arrays() {
        let mut a = marked(4);
        let before = a.clone();
        let fill = TailFill {
            positions: Some(vec![[5.0, 6.0], [7.0, 8.0]]),
            velocities: Some(vec![[-1.0, 0.0], [0.0, -1.0]]),
        };
        a.resize_preserving(6, &fill).unwrap();

        assert_prefix(&a, &before, 4);
        assert_eq!(a.positions[4..], [[5.0, 6.0], [7.0, 8.0]]);
        assert_eq!(a.predicted_positions[4..], [[5.0, 6.0], [7.0, 8.0]]);
        assert_eq!(a.velocities[4..], [[-1.0, 0.0], [0.0, -1.0]]);
        assert_eq!(a.densities[4..], [[0.0, 0.0]; 2]);
        assert_eq!(a.spatial_offsets[4..], [0, 0]);
    }

    #[test]
    fn shrinking_truncates_all_arrays() {
        let mut a = marked(16);
        let before = a.clone();
        a.resize_preserving(5, &TailFill::default()).unwrap();
        assert!(a.is_consistent());
        assert_eq!(a.len(), 5);
        assert_prefix(&a, &before, 5);
        assert_eq!(a.spatial_indices.len(), 5);
        assert_eq!(a.spatial_offsets.len(), 5);
    }

    #[test]
    fn mismatched_tail_is_rejected() {
        let mut a = ParticleArrays::zeroed(2);
        let fill = TailFill {
            positions: Some(vec![[1.0, 1.0]; 3]),
            velocities: None,
        };
        assert_eq!(
            a.resize_preserving(4, &fill),
            Err(ResizeError::TailLength {
                buffer: "position",
                expected: 2,
                got: 3
            })
        );
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn byte_views_have_element_strides() {
        let a = ParticleArrays::zeroed(3);
        for buffer in ParticleBuffer::ALL {
            assert_eq!(a.bytes(buffer).len(), 3 * buffer.element_size());
        }
    }
}
