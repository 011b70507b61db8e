// window, mouse and keyboard state -> FrameInput and UI actions
use bevy::prelude::*;
use bevy::window::{PrimaryWindow, WindowResized};

use crate::sim::orchestrator::{FluidSimulation, FrameInput};
use crate::sim::spawner::ParticleSpawner;

/// Cursor position in logical pixels (top-left origin) to `[-1, 1]` on both
/// axes, y pointing down.
pub fn normalized_pointer(cursor: Vec2, size: Vec2) -> Vec2 {
    if size.x <= 0.0 || size.y <= 0.0 {
        return Vec2::ZERO;
    }
    cursor / size * 2.0 - Vec2::ONE
}

pub fn gather_frame_input(
    window: Option<&Window>,
    buttons: &ButtonInput<MouseButton>,
    wall_delta: f32,
) -> FrameInput {
    let pointer = window
        .and_then(|w| {
            w.cursor_position()
                .map(|c| normalized_pointer(c, Vec2::new(w.width(), w.height())))
        })
        .unwrap_or(Vec2::ZERO);
    FrameInput {
        pointer,
        left: buttons.pressed(MouseButton::Left),
        right: buttons.pressed(MouseButton::Right),
        wall_delta,
    }
}

/// Switches the spawner between pouring at the default interval and idle.
/// Returns whether it now pours.
pub fn toggle_pouring(spawner: &mut ParticleSpawner) -> bool {
    let pouring = spawner.spawn_interval == f32::MAX;
    spawner.spawn_interval = if pouring {
        ParticleSpawner::default().spawn_interval
    } else {
        f32::MAX
    };
    spawner.since_last_spawn = 0.0;
    pouring
}

pub fn handle_keys(keys: Res<ButtonInput<KeyCode>>, mut sim: ResMut<FluidSimulation>) {
    if keys.just_pressed(KeyCode::KeyP) {
        sim.toggle_pause();
    }
    if keys.just_pressed(KeyCode::KeyR) {
        info!("restart");
        sim.restart();
    }
    if keys.just_pressed(KeyCode::KeyD) {
        info!("default settings restored");
        sim.set_default_settings();
    }
    if keys.just_pressed(KeyCode::KeyC) {
        let interaction = sim.interaction_mut();
        interaction.paint_collision = !interaction.paint_collision;
        info!("collision painting: {}", interaction.paint_collision);
    }
    if keys.just_pressed(KeyCode::KeyM) {
        let interaction = sim.interaction_mut();
        interaction.mouse_pull = !interaction.mouse_pull;
        info!("mouse pull: {}", interaction.mouse_pull);
    }
    // a trace replays with the spawner from its header, so it stays fixed
    // while recording or replaying
    if keys.just_pressed(KeyCode::KeyS) && sim.recorder_state().is_none() && !sim.mode().is_replay() {
        let pouring = toggle_pouring(sim.spawner_mut());
        info!("pouring: {pouring}");
    }
}

// the simulation works in physical pixels, like the collision map
pub fn track_window_size(
    mut resized: EventReader<WindowResized>,
    windows: Query<&Window, With<PrimaryWindow>>,
    mut sim: ResMut<FluidSimulation>,
) {
    if resized.read().last().is_none() {
        return;
    }
    let Ok(window) = windows.single() else {
        return;
    };
    sim.set_window_size(window.physical_width(), window.physical_height());
}
