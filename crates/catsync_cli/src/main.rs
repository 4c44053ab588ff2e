//! catsync CLI
//!
//! Command-line tools for inspecting and exercising the mirror.
//!
//! # Commands
//!
//! - `config` - Print the configuration resolved from the environment
//! - `classify` - Run the echo check on a metadata value
//! - `replay` - Replay a scripted event sequence against in-memory stores

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// catsync mirror tools.
#[derive(Parser)]
#[command(name = "catsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved configuration (secrets redacted)
    Config,

    /// Classify a stored metadata value as echo or genuine edit
    Classify {
        /// Metadata as JSON, e.g. '{"lastSyncedAt":"...","syncSource":"target","syncId":"x"}'
        #[arg(short, long)]
        metadata: String,

        /// Reference time (RFC 3339), defaults to now
        #[arg(short, long)]
        now: Option<String>,

        /// Echo window in milliseconds, defaults to the configured one
        #[arg(short, long)]
        threshold_ms: Option<u64>,
    },

    /// Replay a scripted event sequence against in-memory stores
    Replay {
        /// Script file (JSON)
        file: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Config => {
            commands::config::run()?;
        }
        Commands::Classify {
            metadata,
            now,
            threshold_ms,
        } => {
            commands::classify::run(&metadata, now.as_deref(), threshold_ms)?;
        }
        Commands::Replay { file, format } => {
            commands::replay::run(&file, &format)?;
        }
        Commands::Version => {
            println!("catsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
