//! The gendelta command

use std::path::Path;

use anyhow::{bail, Context, Result};
use colored::Colorize;

use crate::cli::format_bytes;
use crate::config::Options;
use crate::regen;

pub fn run(archive: &Path, delta_path: &Path, options: &Options) -> Result<()> {
    if !archive.exists() {
        bail!("Archive not found: {}", archive.display());
    }

    println!("{} {}", "Generating delta for".cyan().bold(), archive.display());

    let delta = regen::gendelta(archive, options)?;
    std::fs::write(delta_path, &delta)
        .with_context(|| format!("Failed to write delta to {}", delta_path.display()))?;

    let archive_size = std::fs::metadata(archive).map(|m| m.len()).unwrap_or(0);
    println!();
    println!("{}", "Delta created.".green().bold());
    println!("  {}: {}", "Output".cyan(), delta_path.display());
    println!("  {}: {}", "Archive size".cyan(), format_bytes(archive_size));
    println!("  {}: {}", "Delta size".cyan(), format_bytes(delta.len() as u64));

    Ok(())
}
