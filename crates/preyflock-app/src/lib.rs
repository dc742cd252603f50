//! Command-line plumbing for the headless PreyFlock driver.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use glam::Vec2;
use preyflock_core::{FrameRateGovernor, SimulationConfig, SimulationMode, TickSummary, WorldState};
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "preyflock",
    version,
    about = "Run the predator/prey flocking simulation headless"
)]
pub struct Cli {
    /// JSON file with simulation settings; missing fields keep their defaults.
    #[arg(long, env = "PREYFLOCK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of ticks to run before exiting.
    #[arg(long, env = "PREYFLOCK_TICKS", default_value_t = 600)]
    pub ticks: u64,

    /// Target ticks per second; ignored with --unpaced.
    #[arg(long, env = "PREYFLOCK_TARGET_FPS", default_value_t = 60.0)]
    pub target_fps: f32,

    /// Step as fast as possible instead of sleeping to the target rate.
    #[arg(long, env = "PREYFLOCK_UNPACED")]
    pub unpaced: bool,

    /// Ticks between logged summaries.
    #[arg(long, env = "PREYFLOCK_REPORT_EVERY", default_value_t = 60)]
    pub report_every: u64,

    #[arg(long, env = "PREYFLOCK_SEED")]
    pub seed: Option<u64>,

    #[arg(long)]
    pub boids: Option<usize>,

    #[arg(long)]
    pub predators: Option<usize>,

    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Frame rate below which spawns are refused and load is shed.
    #[arg(long)]
    pub min_fps: Option<f32>,

    /// Fixed pointer position boids flee from, as `x,y`.
    #[arg(long, value_parser = parse_point)]
    pub pointer: Option<Vec2>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    Infinite,
    DeathMatch,
    Retry,
}

impl From<ModeArg> for SimulationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Infinite => SimulationMode::Infinite,
            ModeArg::DeathMatch => SimulationMode::DeathMatch,
            ModeArg::Retry => SimulationMode::Retry,
        }
    }
}

fn parse_point(raw: &str) -> Result<Vec2, String> {
    let (x, y) = raw
        .split_once(',')
        .ok_or_else(|| format!("expected `x,y`, got `{raw}`"))?;
    let x: f32 = x.trim().parse().map_err(|err| format!("bad x coordinate: {err}"))?;
    let y: f32 = y.trim().parse().map_err(|err| format!("bad y coordinate: {err}"))?;
    Ok(Vec2::new(x, y))
}

/// Read a configuration file, or fall back to the defaults when none is given.
pub fn load_config(path: Option<&Path>) -> Result<SimulationConfig> {
    let Some(path) = path else {
        return Ok(SimulationConfig::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse config {}", path.display()))
}

impl Cli {
    /// Layer command-line overrides on top of a loaded configuration.
    pub fn apply_overrides(&self, config: &mut SimulationConfig) {
        if let Some(seed) = self.seed {
            config.rng_seed = Some(seed);
        }
        if let Some(boids) = self.boids {
            config.initial_boids = boids;
        }
        if let Some(predators) = self.predators {
            config.initial_predators = predators;
        }
        if let Some(mode) = self.mode {
            config.simulation_mode = mode.into();
        }
        if let Some(min_fps) = self.min_fps {
            config.min_fps = min_fps;
        }
    }

    fn timestep(&self) -> Result<Option<Duration>> {
        if self.unpaced {
            return Ok(None);
        }
        if !(self.target_fps.is_finite() && self.target_fps > 0.0) {
            bail!("target fps must be positive, got {}", self.target_fps);
        }
        Ok(Some(Duration::from_secs_f32(1.0 / self.target_fps)))
    }
}

/// Build the world with frame-rate admission control from the parsed arguments.
pub fn build_world(cli: &Cli) -> Result<WorldState> {
    let mut config = load_config(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    let governor = FrameRateGovernor::from_config(&config);
    let mut world = WorldState::with_admission(config, Box::new(governor))
        .context("failed to initialise world")?;
    world.set_pointer(cli.pointer);
    Ok(world)
}

/// Drive the world for `cli.ticks` ticks, feeding frame times to admission control.
///
/// Returns the last recorded summary. Stops early if the world pauses itself.
pub fn run(cli: &Cli, world: &mut WorldState) -> Result<Option<TickSummary>> {
    let timestep = cli.timestep()?;
    let report_every = cli.report_every.max(1);
    let mut frame_start = Instant::now();

    for _ in 0..cli.ticks {
        let events = world.step();
        if events.reset {
            info!(tick = events.tick.0, "population died out, world reset");
        }
        if events.refilled > 0 {
            debug!(tick = events.tick.0, refilled = events.refilled, "population refilled");
        }
        if !events.advanced || events.paused {
            warn!(tick = world.tick().0, "world paused, stopping run");
            break;
        }

        if world.tick().0 % report_every == 0 {
            report(world);
        }

        if let Some(step) = timestep {
            let spent = frame_start.elapsed();
            if spent < step {
                thread::sleep(step - spent);
            }
        }
        let now = Instant::now();
        world.record_frame(now - frame_start);
        frame_start = now;
    }

    Ok(world.history().last().copied())
}

fn report(world: &WorldState) {
    let Some(summary) = world.history().last() else {
        return;
    };
    info!(
        tick = summary.tick.0,
        boids = summary.boids,
        predators = summary.predators,
        births = summary.births,
        deaths = summary.deaths(),
        starvations = summary.starvations,
        refusals = summary.refusals,
        leaves = summary.leaves,
        "world summary",
    );
    if let Some(notice) = world.notice() {
        warn!(notice, "admission notice");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pointer_and_mode() {
        let cli = Cli::try_parse_from([
            "preyflock",
            "--pointer",
            "12.5, 40",
            "--mode",
            "death-match",
            "--boids",
            "20",
        ])
        .expect("parse");
        assert_eq!(cli.pointer, Some(Vec2::new(12.5, 40.0)));
        assert_eq!(cli.mode, Some(ModeArg::DeathMatch));
        assert_eq!(cli.ticks, 600);

        assert!(Cli::try_parse_from(["preyflock", "--pointer", "12"]).is_err());
    }

    #[test]
    fn overrides_replace_only_given_fields() {
        let cli = Cli::try_parse_from(["preyflock", "--seed", "7", "--predators", "9"])
            .expect("parse");
        let mut config = SimulationConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.rng_seed, Some(7));
        assert_eq!(config.initial_predators, 9);
        assert_eq!(config.initial_boids, SimulationConfig::default().initial_boids);
        assert_eq!(config.simulation_mode, SimulationMode::Infinite);
    }

    #[test]
    fn missing_config_file_is_reported() {
        let err = load_config(Some(Path::new("/nonexistent/preyflock.json")))
            .expect_err("missing file");
        assert!(err.to_string().contains("failed to read config"));
    }

    #[test]
    fn unpaced_run_advances_requested_ticks() {
        let cli = Cli::try_parse_from([
            "preyflock",
            "--unpaced",
            "--ticks",
            "30",
            "--seed",
            "11",
            "--boids",
            "40",
            "--predators",
            "2",
        ])
        .expect("parse");
        let mut world = build_world(&cli).expect("world");
        let summary = run(&cli, &mut world).expect("run").expect("summary");
        assert_eq!(summary.tick.0, 30);
        assert_eq!(world.tick().0, 30);
    }

    #[test]
    fn zero_target_fps_is_rejected() {
        let cli = Cli::try_parse_from(["preyflock", "--target-fps", "0", "--ticks", "1"])
            .expect("parse");
        let mut world = build_world(&cli).expect("world");
        assert!(run(&cli, &mut world).is_err());
    }
}
