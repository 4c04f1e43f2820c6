//! tabfx CLI
//!
//! Offline front end for the effect-graph engine.

use clap::Parser;
use env_logger::Env;
use log::info;

use tabfx::cli::{commands, Cli, Commands};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    info!("tabfx v{}", env!("CARGO_PKG_VERSION"));

    let settings = commands::load_settings(cli.settings.as_deref())?;

    match cli.command {
        Commands::Describe { config, channels } => commands::describe(&settings, &config, channels),
        Commands::Render {
            config,
            frequency,
            duration,
            channels,
        } => commands::render(&settings, config.as_deref(), frequency, duration, channels),
        Commands::Reverse {
            tone,
            play_after,
            limit,
        } => commands::reverse(&settings, tone, play_after, limit),
    }
}
