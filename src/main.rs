use bevy::prelude::*;
use bevy::window::WindowResolution;
use bevy_sph_fluid::plugin::{FluidSimulationPlugin, LaunchMode};
use bevy_sph_fluid::sim::orchestrator::SimulationConfig;

#[derive(Debug)]
struct LaunchOptions {
    mode: LaunchMode,
    config: SimulationConfig,
}

// --record | --replay <image> | --particles <n> | --max <n>
//
// recordings pour from the spawner until the max count is reached, so
// --record starts from the pouring config
fn parse_args(args: impl IntoIterator<Item = String>) -> Result<LaunchOptions, String> {
    let mut mode = LaunchMode::Live;
    let mut initial = None;
    let mut max = None;
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--record" => mode = LaunchMode::Record,
            "--replay" => mode = LaunchMode::Replay { image: args.next() },
            "--particles" => initial = Some(count_arg(&arg, args.next())?),
            "--max" => max = Some(count_arg(&arg, args.next())?),
            other => return Err(format!("unknown argument {other}")),
        }
    }

    let mut config = match mode {
        LaunchMode::Record => SimulationConfig::demo_pour(),
        _ => SimulationConfig::default(),
    };
    if let Some(initial) = initial {
        config.initial_particle_count = initial;
    }
    if let Some(max) = max {
        config.max_particle_count = max;
    }
    config.max_particle_count = config.max_particle_count.max(config.initial_particle_count);
    Ok(LaunchOptions { mode, config })
}

fn count_arg(flag: &str, value: Option<String>) -> Result<u32, String> {
    let value = value.ok_or_else(|| format!("{flag} needs a value"))?;
    value
        .parse()
        .map_err(|err| format!("{flag} {value}: {err}"))
}

fn main() {
    let options = match parse_args(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("{err}");
            eprintln!("usage: bevy_sph_fluid [--record | --replay <image>] [--particles <n>] [--max <n>]");
            std::process::exit(2);
        }
    };
    let size = options.config.window_size;

    App::new()
        .add_plugins(DefaultPlugins.set(WindowPlugin {
            primary_window: Some(Window {
                title: "SPH fluid".into(),
                resolution: WindowResolution::new(size.x as f32, size.y as f32),
                ..default()
            }),
            ..default()
        }))
        .insert_resource(ClearColor(Color::BLACK))
        .insert_resource(options.config)
        .insert_resource(options.mode)
        .add_plugins(FluidSimulationPlugin)
        .add_systems(Startup, setup)
        .run();
}

fn setup(mut commands: Commands) {
    commands.spawn(Camera2d::default());
}

#[cfg(test)]
mod tests {
    use std::io;

    use bevy_sph_fluid::sim::orchestrator::{FluidSimulation, FrameInput};
    use bevy_sph_fluid::sim::record::RecorderState;

    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_arguments_run_live_with_defaults() {
        let options = parse_args(Vec::new()).unwrap();
        assert_eq!(options.mode, LaunchMode::Live);
        assert_eq!(options.config.initial_particle_count, 25_000);
    }

    #[test]
    fn replay_takes_an_image() {
        let options = parse_args(args(&["--replay", "logo.png", "--particles", "100"])).unwrap();
        assert_eq!(
            options.mode,
            LaunchMode::Replay {
                image: Some("logo.png".into())
            }
        );
        assert_eq!(options.config.initial_particle_count, 100);
    }

    #[test]
    fn max_never_drops_below_initial() {
        let options = parse_args(args(&["--particles", "500", "--max", "10"])).unwrap();
        assert_eq!(options.config.max_particle_count, 500);
    }

    #[test]
    fn record_pours_from_the_spawner() {
        let options = parse_args(args(&["--max", "3000", "--record"])).unwrap();
        assert_eq!(options.mode, LaunchMode::Record);
        let pour = SimulationConfig::demo_pour();
        assert_eq!(options.config.spawner, pour.spawner);
        assert_eq!(options.config.initial_particle_count, pour.initial_particle_count);
        assert_eq!(options.config.max_particle_count, 3000);
    }

    #[test]
    fn recording_reaches_the_final_readback() {
        let options = parse_args(args(&["--record"])).unwrap();
        let mut sim = FluidSimulation::new(&options.config);
        sim.enter_record_mode(Box::new(io::sink())).unwrap();

        let input = FrameInput {
            wall_delta: 1.0 / 60.0,
            ..Default::default()
        };
        let frames = (1..=10_000).find(|_| sim.do_frame(input).unwrap().readback);
        assert!(frames.is_some(), "recording never asked for final positions");
        assert_eq!(sim.recorder_state(), Some(RecorderState::AwaitingPositions));
        assert_eq!(sim.particle_count(), options.config.max_particle_count);
    }

    #[test]
    fn bad_counts_are_rejected() {
        assert!(parse_args(args(&["--max"])).is_err());
        assert!(parse_args(args(&["--particles", "lots"])).is_err());
        assert!(parse_args(args(&["--fast"])).is_err());
    }
}
