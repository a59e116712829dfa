//! cytos - headless arena runner
//!
//! Drives the engine at the configured physics rate with bot players,
//! printing leaderboard snapshots on the (slower) leaderboard cadence.
//! Useful for soak-testing the simulation and as a reference host.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;

use cytos::core::config::EngineConfig;
use cytos::core::error::Result;
use cytos::engine::Engine;
use cytos::game::EngineEvent;

#[derive(Parser, Debug)]
#[command(name = "cytos", about = "Cell-eating arena simulation engine")]
struct Args {
    /// TOML config file; defaults apply for unspecified keys
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// RNG seed for reproducible runs
    #[arg(short, long, default_value_t = 0)]
    seed: u64,

    /// Number of ticks to run, 0 means run until interrupted
    #[arg(short, long, default_value_t = 0)]
    ticks: u64,

    /// Override the configured bot count
    #[arg(short, long)]
    bots: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "cytos=info".to_string()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_toml_path(path)?,
        None => EngineConfig::default(),
    };
    if let Some(bots) = args.bots {
        config.bots = bots;
    }

    let tick_delay = Duration::from_secs_f32(config.tick_delay_ms() / 1000.0);
    let leaderboard_every = (config.physics_tps / config.leaderboard_tps).max(1.0) as u64;
    let time_scale = config.time_scale;

    let mut engine = Engine::new(config, args.seed)?;

    // A seated spectator counts as a human, which lets bots join.
    engine.attach("observer".to_string())?;

    tracing::info!(seed = args.seed, ticks = args.ticks, "running");

    let mut last = Instant::now();
    let mut tick_no = 0u64;
    loop {
        let now = Instant::now();
        let dt = now.duration_since(last).as_secs_f32() * 1000.0 * time_scale;
        last = now;

        let events = engine.tick(dt.max(1.0))?;
        tick_no += 1;

        for event in &events {
            match event {
                EngineEvent::Restarted => tracing::warn!(tick_no, "world restarted"),
                EngineEvent::Oversize { id, score } => {
                    tracing::warn!(id, score, "oversize player")
                }
                _ => {}
            }
        }

        if tick_no % leaderboard_every == 0 {
            let usage = now.elapsed().as_secs_f32() / tick_delay.as_secs_f32();
            tracing::debug!(tick_no, cells = engine.cell_count(), usage, "tick usage");
            let rows = engine.leaderboard();
            if !rows.is_empty() {
                println!("{}", serde_json::to_string(rows)?);
            }
        }

        if args.ticks != 0 && tick_no >= args.ticks {
            break;
        }

        let elapsed = now.elapsed();
        if elapsed < tick_delay {
            thread::sleep(tick_delay - elapsed);
        }
    }

    tracing::info!(
        tick_no,
        cells = engine.cell_count(),
        "finished"
    );
    Ok(())
}
