// smoothed particle hydrodynamics in 2D, CPU mirror of the compute passes
//
// Each function does what the matching WGSL entry point does for every
// particle. Passes that read neighbour state take a snapshot first, so the
// results are what the device produces when no thread races ahead.
use glam::{IVec2, Vec2};

use crate::gpu::ffi::FrameParams;
use crate::sim::orchestrator::FramePlan;
use crate::sim::particles::{ParticleArrays, ResizeError};
use crate::sim::settings::POSITION_FACTOR;
use crate::sim::sort::{self, EMPTY_OFFSET, SpatialEntry, cell_of, hash_cell, key_from_hash};

const CELL_OFFSETS: [IVec2; 9] = [
    IVec2::new(-1, 1),
    IVec2::new(0, 1),
    IVec2::new(1, 1),
    IVec2::new(-1, 0),
    IVec2::new(0, 0),
    IVec2::new(1, 0),
    IVec2::new(-1, -1),
    IVec2::new(0, -1),
    IVec2::new(1, -1),
];

#[inline]
fn v(p: [f32; 2]) -> Vec2 {
    Vec2::from_array(p)
}

// WGSL sign(): zero stays zero
#[inline]
fn sign(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Whether the collision bitmap is solid under world position `pos`.
pub fn collision_at(pos: Vec2, params: &FrameParams, words: &[u32]) -> bool {
    let (w, h) = (params.map_width, params.map_height);
    if w == 0 || h == 0 {
        return false;
    }
    let ndc = Vec2::new(pos.x / (POSITION_FACTOR * params.aspect_ratio), pos.y / POSITION_FACTOR);
    let pixel = ((ndc + Vec2::ONE) * 0.5 * Vec2::new(w as f32, h as f32)).floor();
    if pixel.x < 0.0 || pixel.y < 0.0 || pixel.x >= w as f32 || pixel.y >= h as f32 {
        return false;
    }
    let (x, row) = (pixel.x as u32, pixel.y as u32);
    let byte = row * w.div_ceil(8) + x / 8;
    let bit = (byte % 4) * 8 + (x & 7);
    words
        .get((byte / 4) as usize)
        .is_some_and(|word| (word >> bit) & 1 == 1)
}

fn external_forces(pos: Vec2, vel: Vec2, params: &FrameParams) -> Vec2 {
    let s = &params.settings;
    let gravity = Vec2::new(0.0, -s.gravity);
    let strength = s.interaction_input_strength;
    if strength == 0.0 {
        return gravity;
    }
    let offset = v(s.interaction_input_point) - pos;
    let sqr_dst = offset.length_squared();
    let radius = s.interaction_input_radius;
    if sqr_dst >= radius * radius {
        return gravity;
    }
    let dst = sqr_dst.sqrt();
    let centre_t = 1.0 - dst / radius;
    let dir = if dst > 0.0 { offset / dst } else { Vec2::ZERO };
    // the pointer partly cancels gravity near its centre
    let gravity_weight = 1.0 - centre_t * (strength / 10.0).clamp(0.0, 1.0);
    gravity * gravity_weight + dir * centre_t * strength - vel * centre_t
}

/// Applies external forces, predicts positions and writes unsorted
/// spatial entries.
pub fn early_update(arrays: &mut ParticleArrays, params: &FrameParams, collision: &[u32]) {
    let s = &params.settings;
    let n = s.num_particles.min(arrays.len() as u32);
    for i in 0..n as usize {
        let pos = v(arrays.positions[i]);
        let vel = v(arrays.velocities[i]) + external_forces(pos, v(arrays.velocities[i]), params) * s.delta_time;
        arrays.velocities[i] = vel.to_array();

        let mut predicted = pos + vel * s.delta_time;
        if collision_at(predicted, params, collision) {
            predicted = pos;
        }
        arrays.predicted_positions[i] = predicted.to_array();

        let hash = hash_cell(cell_of(predicted, s.smoothing_radius));
        arrays.spatial_indices[i] = SpatialEntry {
            index: i as u32,
            hash,
            key: key_from_hash(hash, n),
        };
        arrays.spatial_offsets[i] = EMPTY_OFFSET;
    }
}

/// Runs the bitonic network over the entries and builds the offset table.
pub fn sort_and_offsets(arrays: &mut ParticleArrays, num_particles: u32) {
    let n = (num_particles as usize).min(arrays.len());
    sort::sort_entries(&mut arrays.spatial_indices[..n]);
    sort::build_offsets(&arrays.spatial_indices[..n], &mut arrays.spatial_offsets[..n]);
}

// visits every particle in the 3x3 cells around `pos` through the offset table
fn for_each_neighbour(
    indices: &[SpatialEntry],
    offsets: &[u32],
    pos: Vec2,
    radius: f32,
    mut visit: impl FnMut(usize),
) {
    let n = indices.len() as u32;
    let origin = cell_of(pos, radius);
    for offset in CELL_OFFSETS {
        let hash = hash_cell(origin + offset);
        let key = key_from_hash(hash, n);
        let start = offsets[key as usize];
        if start == EMPTY_OFFSET {
            continue;
        }
        for entry in &indices[start as usize..] {
            if entry.key != key {
                break;
            }
            if entry.hash == hash {
                visit(entry.index as usize);
            }
        }
    }
}

pub fn density_pass(arrays: &mut ParticleArrays, params: &FrameParams) {
    let s = &params.settings;
    let k = s.kernel_constants();
    let r = s.smoothing_radius;
    let n = (s.num_particles as usize).min(arrays.len());
    let predicted = &arrays.predicted_positions[..n];

    for i in 0..n {
        let pos = v(predicted[i]);
        let (mut density, mut near) = (0.0, 0.0);
        for_each_neighbour(&arrays.spatial_indices[..n], &arrays.spatial_offsets[..n], pos, r, |j| {
            let sqr = (v(predicted[j]) - pos).length_squared();
            if sqr > r * r {
                return;
            }
            let dst = sqr.sqrt();
            density += k.density(dst, r);
            near += k.near_density(dst, r);
        });
        arrays.densities[i] = [density, near];
    }
}

pub fn pressure_pass(arrays: &mut ParticleArrays, params: &FrameParams) {
    let s = &params.settings;
    let k = s.kernel_constants();
    let r = s.smoothing_radius;
    let n = (s.num_particles as usize).min(arrays.len());
    let pressure_of = |d: f32| (d - s.target_density) * s.pressure_multiplier;
    let near_pressure_of = |d: f32| d * s.near_pressure_multiplier;

    for i in 0..n {
        let pos = v(arrays.predicted_positions[i]);
        let [density, near] = arrays.densities[i];
        let pressure = pressure_of(density);
        let near_pressure = near_pressure_of(near);
        let mut force = Vec2::ZERO;

        for_each_neighbour(&arrays.spatial_indices[..n], &arrays.spatial_offsets[..n], pos, r, |j| {
            if j == i {
                return;
            }
            let offset = v(arrays.predicted_positions[j]) - pos;
            let sqr = offset.length_squared();
            if sqr > r * r {
                return;
            }
            let dst = sqr.sqrt();
            let dir = if dst > 0.0 { offset / dst } else { Vec2::ZERO };
            let [nd, nnd] = arrays.densities[j];
            let shared = (pressure + pressure_of(nd)) * 0.5;
            let shared_near = (near_pressure + near_pressure_of(nnd)) * 0.5;
            force += dir * k.density_derivative(dst, r) * shared / nd;
            force += dir * k.near_density_derivative(dst, r) * shared_near / nnd;
        });

        let accel = force / density;
        arrays.velocities[i] = (v(arrays.velocities[i]) + accel * s.delta_time).to_array();
    }
}

fn resolve_bounds(pos: &mut Vec2, vel: &mut Vec2, params: &FrameParams) {
    let s = &params.settings;
    let half = Vec2::new(POSITION_FACTOR * params.aspect_ratio, POSITION_FACTOR);
    let edge = half - pos.abs();
    if edge.x <= 0.0 {
        pos.x = half.x * sign(pos.x);
        vel.x *= -s.collision_damping;
    }
    if edge.y <= 0.0 {
        pos.y = half.y * sign(pos.y);
        vel.y *= -s.collision_damping;
    }

    let centre = v(s.obstacle_centre);
    let obstacle_half = v(s.obstacle_size) * 0.5;
    let local = *pos - centre;
    let edge = obstacle_half - local.abs();
    if edge.x >= 0.0 && edge.y >= 0.0 {
        // push out along the shallower axis
        if edge.x < edge.y {
            pos.x = obstacle_half.x * sign(local.x) + centre.x;
            vel.x *= -s.collision_damping;
        } else {
            pos.y = obstacle_half.y * sign(local.y) + centre.y;
            vel.y *= -s.collision_damping;
        }
    }
}

pub fn viscosity_update_pass(arrays: &mut ParticleArrays, params: &FrameParams, collision: &[u32]) {
    let s = &params.settings;
    let k = s.kernel_constants();
    let r = s.smoothing_radius;
    let n = (s.num_particles as usize).min(arrays.len());
    let velocities = arrays.velocities.clone();

    for i in 0..n {
        let pos = v(arrays.predicted_positions[i]);
        let mut vel = v(velocities[i]);
        let mut force = Vec2::ZERO;
        for_each_neighbour(&arrays.spatial_indices[..n], &arrays.spatial_offsets[..n], pos, r, |j| {
            if j == i {
                return;
            }
            let sqr = (v(arrays.predicted_positions[j]) - pos).length_squared();
            if sqr > r * r {
                return;
            }
            force += (v(velocities[j]) - vel) * k.viscosity(sqr.sqrt(), r);
        });
        vel += force * s.viscosity_strength * s.delta_time;

        let old = v(arrays.positions[i]);
        let mut next = old + vel * s.delta_time;
        next.x *= params.aspect_ratio_change;
        resolve_bounds(&mut next, &mut vel, params);
        if collision_at(next, params, collision) {
            next = old;
            vel *= -s.collision_damping;
        }

        arrays.positions[i] = next.to_array();
        arrays.velocities[i] = vel.to_array();
    }
}

/// One full simulation step, in dispatch order.
pub fn step(arrays: &mut ParticleArrays, params: &FrameParams, collision: &[u32]) {
    early_update(arrays, params, collision);
    sort_and_offsets(arrays, params.settings.num_particles);
    density_pass(arrays, params);
    pressure_pass(arrays, params);
    viscosity_update_pass(arrays, params, collision);
}

/// Host stand-in for the device: owns the arrays and uniforms a
/// `FramePlan` targets.
#[derive(Clone, Debug, Default)]
pub struct ReferenceDevice {
    pub arrays: ParticleArrays,
    pub params: Option<FrameParams>,
    pub collision: Vec<u32>,
    pub uvs: Vec<[f32; 2]>,
}

impl ReferenceDevice {
    /// Applies the plan the way the render world does: buffer commands
    /// and uploads first, then the passes.
    pub fn execute(&mut self, plan: &FramePlan) -> Result<(), ResizeError> {
        for command in &plan.buffer_commands {
            command.apply_to(&mut self.arrays)?;
        }
        if let Some(params) = plan.params {
            self.params = Some(params);
        }
        if let Some(words) = &plan.collision_upload {
            self.collision = words.clone();
        }
        if let Some(uvs) = &plan.uv_upload {
            self.uvs = uvs.clone();
        }
        if let (Some(dispatch), Some(params)) = (plan.dispatch, self.params) {
            if dispatch.particle_count as usize > self.arrays.len() {
                return Err(ResizeError::CapacityExceeded {
                    requested: dispatch.particle_count,
                    capacity: self.arrays.len() as u32,
                });
            }
            step(&mut self.arrays, &params, &self.collision);
        }
        Ok(())
    }

    pub fn particle_count(&self) -> usize {
        self.arrays.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::settings::GeneralSettings;

    fn params(n: u32) -> FrameParams {
        let mut s = GeneralSettings::initial(n);
        s.gravity = 0.0;
        s.delta_time = 0.005;
        s.obstacle_size = [0.0, 0.0];
        FrameParams::new(s, 1.0, 1.0, [8, 8])
    }

    #[test]
    fn coincident_particles_stay_put() {
        let mut a = ParticleArrays::zeroed(4);
        for p in a.positions.iter_mut() {
            *p = [10.0, 20.0];
        }
        let p = params(4);
        step(&mut a, &p, &[0; 16]);

        let key = a.spatial_indices[0].key;
        assert!(a.spatial_indices.iter().all(|e| e.key == key));
        assert_eq!(a.spatial_offsets[key as usize], 0);
        assert_eq!(a.spatial_offsets.iter().filter(|o| **o != EMPTY_OFFSET).count(), 1);
        assert!(a.densities.iter().all(|d| *d == a.densities[0]));
        assert!(a.densities[0][0] > 0.0);
        assert!(a.positions.iter().all(|p| *p == [10.0, 20.0]));
        assert!(a.velocities.iter().all(|v| *v == [0.0, 0.0]));
    }

    #[test]
    fn collision_lookup_uses_bottom_up_rows() {
        let p = params(1);
        // 8x8 map over the [-500, 500] box: pixel (0, 0) is the bottom-left corner
        let mut words = vec![0u32; 2];
        words[0] |= 1;
        assert!(collision_at(Vec2::new(-490.0, -490.0), &p, &words));
        assert!(!collision_at(Vec2::new(-490.0, 490.0), &p, &words));
        assert!(!collision_at(Vec2::new(-600.0, -490.0), &p, &words));
    }

    #[test]
    fn walls_reflect_with_damping() {
        let mut a = ParticleArrays::zeroed(1);
        a.positions[0] = [0.0, -499.0];
        a.velocities[0] = [0.0, -1000.0];
        let p = params(1);
        step(&mut a, &p, &[0; 16]);
        assert_eq!(a.positions[0][1], -POSITION_FACTOR);
        assert!(a.velocities[0][1] > 0.0);
    }

    #[test]
    fn gravity_pulls_down() {
        let mut a = ParticleArrays::zeroed(1);
        let mut p = params(1);
        p.settings.gravity = 100.0;
        step(&mut a, &p, &[0; 16]);
        assert!(a.velocities[0][1] < 0.0);
        assert!(a.positions[0][1] < 0.0);
    }
}
