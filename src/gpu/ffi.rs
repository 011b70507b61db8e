use bytemuck::{Pod, Zeroable};

use crate::sim::settings::GeneralSettings;

pub const FRAME_PARAMS_SIZE: usize = 112;

// Physics uniform: the settings record followed by per-frame window state.
// Must match `FrameParams` in shaders/common.wgsl field for field.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct FrameParams {
    pub settings: GeneralSettings,
    pub aspect_ratio: f32,
    pub aspect_ratio_change: f32,
    pub map_width: u32,
    pub map_height: u32,
    // uniform structs round up to 16 bytes
    pub _pad: [u32; 2],
}

impl FrameParams {
    pub fn new(settings: GeneralSettings, aspect_ratio: f32, aspect_ratio_change: f32, map_size: [u32; 2]) -> Self {
        Self {
            settings,
            aspect_ratio,
            aspect_ratio_change,
            map_width: map_size[0],
            map_height: map_size[1],
            _pad: [0; 2],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct DrawParams {
    pub scale: f32, // quad half size, normalized screen units
    pub aspect_ratio: f32,
    pub max_speed: f32,
    pub use_uvs: u32,
    pub stop_colors: [[f32; 4]; 4],
    pub stop_positions: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CollisionDrawParams {
    pub color: [f32; 4],
    pub map_width: u32,
    pub map_height: u32,
    pub _pad: [u32; 2],
}
