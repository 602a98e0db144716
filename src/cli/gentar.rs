//! The gentar command

use std::path::Path;

use anyhow::{bail, Context, Result};
use colored::Colorize;

use crate::config::Options;
use crate::regen;

pub fn run(delta_path: &Path, tree: &Path, archive: &Path, options: &Options) -> Result<()> {
    if !tree.is_dir() {
        bail!("Working tree not found: {}", tree.display());
    }

    let delta = std::fs::read(delta_path)
        .with_context(|| format!("Failed to read delta from {}", delta_path.display()))?;
    regen::gentar(&delta, tree, archive, options)?;

    println!("{} {}", "Reproduced".green().bold(), archive.display());
    Ok(())
}
