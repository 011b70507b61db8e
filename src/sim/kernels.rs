// 2D SPH smoothing kernels and their normalization constants
use std::f32::consts::PI;

/// Normalization factors of the smoothing kernels for one radius.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KernelConstants {
    pub poly6: f32,
    pub spiky_pow3: f32,
    pub spiky_pow2: f32,
    pub spiky_pow3_derivative: f32,
    pub spiky_pow2_derivative: f32,
}

impl KernelConstants {
    pub fn from_radius(radius: f32) -> Self {
        Self {
            poly6: 4.0 / (PI * radius.powi(8)),
            spiky_pow3: 10.0 / (PI * radius.powi(5)),
            spiky_pow2: 6.0 / (PI * radius.powi(4)),
            spiky_pow3_derivative: 30.0 / (PI * radius.powi(5)),
            spiky_pow2_derivative: 12.0 / (PI * radius.powi(4)),
        }
    }

    // the WGSL passes evaluate the same functions; keep them in sync

    #[inline]
    pub fn density(&self, dst: f32, radius: f32) -> f32 {
        if dst < radius {
            let v = radius - dst;
            v * v * self.spiky_pow2
        } else {
            0.0
        }
    }

    #[inline]
    pub fn near_density(&self, dst: f32, radius: f32) -> f32 {
        if dst < radius {
            let v = radius - dst;
            v * v * v * self.spiky_pow3
        } else {
            0.0
        }
    }

    #[inline]
    pub fn density_derivative(&self, dst: f32, radius: f32) -> f32 {
        if dst <= radius {
            let v = radius - dst;
            -v * self.spiky_pow2_derivative
        } else {
            0.0
        }
    }

    #[inline]
    pub fn near_density_derivative(&self, dst: f32, radius: f32) -> f32 {
        if dst <= radius {
            let v = radius - dst;
            -v * v * self.spiky_pow3_derivative
        } else {
            0.0
        }
    }

    #[inline]
    pub fn viscosity(&self, dst: f32, radius: f32) -> f32 {
        if dst < radius {
            let v = radius * radius - dst * dst;
            v * v * v * self.poly6
        } else {
            0.0
        }
    }
}
