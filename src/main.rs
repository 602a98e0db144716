//! retar - pristine upstream tarball regeneration
//!
//! Recreates the original bytes of release archives (tar, tar.gz, tar.bz2)
//! from their content plus a small stored delta that captures everything a
//! content store does not preserve: entry ordering, archiver metadata and
//! the exact compressed wrapping.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod archive;
mod bzip2;
mod cli;
mod config;
mod container;
mod delta;
mod error;
mod flat;
mod gzip;
mod manifest;
mod patch;
mod process;
mod regen;
mod repository;
mod scratch;
mod tarball;

use cli::Commands;

// Re-export error types for library users
pub use error::{Result as RetarResult, RetarError};

/// Pristine tarball regeneration
#[derive(Parser)]
#[command(name = "retar")]
#[command(version)]
#[command(about = "Regenerate byte-identical upstream tarballs", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Keep scratch directories instead of removing them on exit
    #[arg(long, global = true)]
    keep: bool,

    /// Search harder for an exact compressor invocation (slow)
    #[arg(long, global = true)]
    try_harder: bool,

    /// Branch holding stored deltas
    #[arg(long, global = true, default_value = "retar")]
    branch: String,

    #[command(subcommand)]
    command: Commands,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_target(false)
        .init();

    let options = config::Options {
        verbose: cli.verbose,
        keep_scratch: cli.keep,
        try_harder: cli.try_harder,
        branch: cli.branch,
    };

    cli::execute(cli.command, &options)
}
