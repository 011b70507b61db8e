// simulation-wide scalars shared by every compute pass
use bytemuck::{Pod, Zeroable};

use crate::sim::kernels::KernelConstants;

/// World units per normalized screen unit (vertical half extent of the box).
pub const POSITION_FACTOR: f32 = 500.0;
/// Particle diameter in normalized screen units.
pub const PARTICLE_SIZE: f32 = 0.008;
/// Upper bound on a single frame's timestep, in seconds.
pub const MAX_DELTA_TIME: f32 = 0.007;

// base tunables below are scaled by this
const TUNING_FACTOR: f32 = 2.0;

/// Byte size of the encoded settings record (recording header, first block).
pub const SETTINGS_WIRE_SIZE: usize = 88;

/*
layout (byte offsets, all 4-byte scalars, no implicit padding):
  0 num_particles            4 gravity                  8 delta_time
 12 collision_damping       16 smoothing_radius        20 target_density
 24 pressure_multiplier     28 near_pressure_mult.     32 viscosity_strength
 36 poly6                   40 spiky_pow3              44 spiky_pow2
 48 spiky_pow3_derivative   52 spiky_pow2_derivative   56 interaction_input_point
 64 interaction_strength    68 interaction_radius      72 obstacle_size
 80 obstacle_centre         88 end
*/
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GeneralSettings {
    pub num_particles: u32,
    pub gravity: f32,
    pub delta_time: f32,
    pub collision_damping: f32,
    pub smoothing_radius: f32,
    pub target_density: f32,
    pub pressure_multiplier: f32,
    pub near_pressure_multiplier: f32,
    pub viscosity_strength: f32,
    pub poly6_scaling_factor: f32,
    pub spiky_pow3_scaling_factor: f32,
    pub spiky_pow2_scaling_factor: f32,
    pub spiky_pow3_derivative_scaling_factor: f32,
    pub spiky_pow2_derivative_scaling_factor: f32,
    pub interaction_input_point: [f32; 2],
    pub interaction_input_strength: f32,
    pub interaction_input_radius: f32,
    pub obstacle_size: [f32; 2],
    pub obstacle_centre: [f32; 2],
}

impl GeneralSettings {
    /// Default tunables for a fresh session.
    pub fn initial(num_particles: u32) -> Self {
        let mut settings = Self {
            num_particles,
            gravity: 50.0 * TUNING_FACTOR,
            delta_time: 0.0,
            collision_damping: 0.3,
            smoothing_radius: 3.25 * TUNING_FACTOR,
            target_density: 30.0 * TUNING_FACTOR,
            pressure_multiplier: 25.0 * TUNING_FACTOR,
            near_pressure_multiplier: 0.0,
            viscosity_strength: 0.5 * TUNING_FACTOR,
            interaction_input_point: [0.0, 0.0],
            interaction_input_strength: 0.0,
            interaction_input_radius: 100.0,
            obstacle_size: [0.2 * POSITION_FACTOR, 0.4 * POSITION_FACTOR],
            obstacle_centre: [1.0 * POSITION_FACTOR, -0.3 * POSITION_FACTOR],
            ..Zeroable::zeroed()
        };
        settings.apply_kernel_constants(&KernelConstants::from_radius(settings.smoothing_radius));
        settings
    }

    pub fn apply_kernel_constants(&mut self, k: &KernelConstants) {
        self.poly6_scaling_factor = k.poly6;
        self.spiky_pow3_scaling_factor = k.spiky_pow3;
        self.spiky_pow2_scaling_factor = k.spiky_pow2;
        self.spiky_pow3_derivative_scaling_factor = k.spiky_pow3_derivative;
        self.spiky_pow2_derivative_scaling_factor = k.spiky_pow2_derivative;
    }

    pub fn kernel_constants(&self) -> KernelConstants {
        KernelConstants {
            poly6: self.poly6_scaling_factor,
            spiky_pow3: self.spiky_pow3_scaling_factor,
            spiky_pow2: self.spiky_pow2_scaling_factor,
            spiky_pow3_derivative: self.spiky_pow3_derivative_scaling_factor,
            spiky_pow2_derivative: self.spiky_pow2_derivative_scaling_factor,
        }
    }

    // explicit little-endian encoding, independent of host struct layout
    pub fn encode(&self) -> [u8; SETTINGS_WIRE_SIZE] {
        let mut out = [0u8; SETTINGS_WIRE_SIZE];
        let words: [[u8; 4]; 22] = [
            self.num_particles.to_le_bytes(),
            self.gravity.to_le_bytes(),
            self.delta_time.to_le_bytes(),
            self.collision_damping.to_le_bytes(),
            self.smoothing_radius.to_le_bytes(),
            self.target_density.to_le_bytes(),
            self.pressure_multiplier.to_le_bytes(),
            self.near_pressure_multiplier.to_le_bytes(),
            self.viscosity_strength.to_le_bytes(),
            self.poly6_scaling_factor.to_le_bytes(),
            self.spiky_pow3_scaling_factor.to_le_bytes(),
            self.spiky_pow2_scaling_factor.to_le_bytes(),
            self.spiky_pow3_derivative_scaling_factor.to_le_bytes(),
            self.spiky_pow2_derivative_scaling_factor.to_le_bytes(),
            self.interaction_input_point[0].to_le_bytes(),
            self.interaction_input_point[1].to_le_bytes(),
            self.interaction_input_strength.to_le_bytes(),
            self.interaction_input_radius.to_le_bytes(),
            self.obstacle_size[0].to_le_bytes(),
            self.obstacle_size[1].to_le_bytes(),
            self.obstacle_centre[0].to_le_bytes(),
            self.obstacle_centre[1].to_le_bytes(),
        ];
        for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word);
        }
        out
    }

    pub fn decode(bytes: &[u8; SETTINGS_WIRE_SIZE]) -> Self {
        let mut words = bytes
            .chunks_exact(4)
            .map(|c| [c[0], c[1], c[2], c[3]]);
        let mut u = || u32::from_le_bytes(words.next().unwrap_or_default());
        let num_particles = u();
        let mut f = || f32::from_bits(u());
        Self {
            num_particles,
            gravity: f(),
            delta_time: f(),
            collision_damping: f(),
            smoothing_radius: f(),
            target_density: f(),
            pressure_multiplier: f(),
            near_pressure_multiplier: f(),
            viscosity_strength: f(),
            poly6_scaling_factor: f(),
            spiky_pow3_scaling_factor: f(),
            spiky_pow2_scaling_factor: f(),
            spiky_pow3_derivative_scaling_factor: f(),
            spiky_pow2_derivative_scaling_factor: f(),
            interaction_input_point: [f(), f()],
            interaction_input_strength: f(),
            interaction_input_radius: f(),
            obstacle_size: [f(), f()],
            obstacle_centre: [f(), f()],
        }
    }
}
