use anyhow::Result;
use clap::Parser;
use preyflock_app::{Cli, build_world, run};
use tracing::{info, warn};

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut world = build_world(&cli)?;
    info!(
        boids = world.boid_count(),
        predators = world.predator_count(),
        ticks = cli.ticks,
        "Starting PreyFlock simulation",
    );

    match run(&cli, &mut world)? {
        Some(summary) => info!(
            tick = summary.tick.0,
            boids = summary.boids,
            predators = summary.predators,
            leaves = summary.leaves,
            "Simulation finished",
        ),
        None => warn!("Simulation finished without recording a summary"),
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
