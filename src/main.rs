//! Ampconv CLI
//!
//! Command-line front end for offline convolution.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ampconv::cli::commands::{self, RenderTone};
use ampconv::cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Ampconv v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(cmd) => handle_command(cmd),
        None => {
            println!("Ampconv v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

fn handle_command(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Render {
            input,
            ir,
            output,
            mode,
            block_size,
            level,
            bass,
            treble,
            bit_depth,
            config,
        } => commands::render(
            &input,
            &ir,
            &output,
            mode,
            block_size,
            RenderTone {
                level,
                bass,
                treble,
            },
            bit_depth,
            config.as_deref(),
        ),
        Commands::Inspect {
            ir,
            block_size,
            rate,
        } => commands::inspect(&ir, block_size, rate),
        Commands::List { dir, settings } => commands::list(&dir, settings.as_deref()),
    }
}
