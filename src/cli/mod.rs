//! CLI Module
//!
//! Offline tools for inspecting topologies and exercising sessions with
//! synthetic input.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// tabfx - real-time effect graphs for captured tab audio
#[derive(Parser, Debug)]
#[command(name = "tabfx")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Engine settings file (JSON)
    #[arg(short, long, global = true)]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the graph synthesized for a capture config
    #[command(name = "describe")]
    Describe {
        /// Capture config file (JSON)
        config: PathBuf,

        /// Channels of the simulated stream
        #[arg(short, long, default_value_t = 2)]
        channels: usize,
    },

    /// Render a sine tone through a session and print levels
    #[command(name = "render")]
    Render {
        /// Capture config file (JSON); defaults to pass-through
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Tone frequency in Hz
        #[arg(short, long, default_value_t = 440.0)]
        frequency: f32,

        /// Seconds to render
        #[arg(short, long, default_value_t = 1.0)]
        duration: f32,

        /// Channels of the simulated stream
        #[arg(long, default_value_t = 2)]
        channels: usize,
    },

    /// Simulate a reverse record/playback cycle
    #[command(name = "reverse")]
    Reverse {
        /// Seconds of tone before the source goes silent
        #[arg(short, long, default_value_t = 0.5)]
        tone: f32,

        /// Request playback after this many blocks instead of waiting for silence
        #[arg(long)]
        play_after: Option<usize>,

        /// Give up after this many seconds
        #[arg(long, default_value_t = 5.0)]
        limit: f32,
    },
}
