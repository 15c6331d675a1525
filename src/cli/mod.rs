//! CLI Module
//!
//! Offline front end: render a file through a convolver, inspect an impulse
//! response, list an IR directory.

pub mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Ampconv - partitioned convolution for amp and cabinet simulation
#[derive(Parser, Debug)]
#[command(name = "ampconv")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Which convolver renders the file
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderMode {
    /// Cabinet simulator with level, bass and treble
    Cabinet,
    /// Plain impulse response with a gain in dB
    Impulse,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render a WAV file through a convolver
    #[command(name = "render")]
    Render {
        /// Input audio file
        input: PathBuf,

        /// Impulse response file
        #[arg(long)]
        ir: PathBuf,

        /// Output audio file
        #[arg(short, long)]
        output: PathBuf,

        /// Convolver to use
        #[arg(long, value_enum, default_value_t = RenderMode::Cabinet)]
        mode: RenderMode,

        /// Processing block size
        #[arg(short, long, default_value_t = 256)]
        block_size: usize,

        /// Level in dB (cabinet) or gain in dB (impulse)
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        level: f32,

        /// Bass shelf in dB (cabinet only)
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        bass: f32,

        /// Treble shelf in dB (cabinet only)
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        treble: f32,

        /// Output bit depth (16, 24 or 32)
        #[arg(long, default_value_t = 24)]
        bit_depth: u16,

        /// Engine configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show impulse response header and partitioning
    #[command(name = "inspect")]
    Inspect {
        /// Impulse response file
        ir: PathBuf,

        /// Block size to partition for
        #[arg(short, long, default_value_t = 256)]
        block_size: usize,

        /// Processing sample rate (defaults to the file's rate)
        #[arg(short, long)]
        rate: Option<u32>,
    },

    /// List impulse responses in a directory
    #[command(name = "list")]
    List {
        /// Directory to scan
        dir: PathBuf,

        /// IR settings file whose favorites are marked
        #[arg(short, long)]
        settings: Option<PathBuf>,
    },
}
