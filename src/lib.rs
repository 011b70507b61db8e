pub mod sim {
    pub mod collision;
    pub mod kernels;
    pub mod mirrored;
    pub mod mode;
    pub mod orchestrator;
    pub mod particles;
    pub mod record;
    pub mod settings;
    pub mod sort;
    pub mod spawner;
}

pub mod cpu {
    pub mod reference;
}

pub mod gpu {
    pub mod ffi;
    pub mod buffers;
    pub mod pipeline;
    pub mod sort;
    pub mod node;
    pub mod readback;
    pub mod draw_buffers;
    pub mod draw_pipeline;
    pub mod draw_pass;
}

pub mod input;
pub mod plugin;
