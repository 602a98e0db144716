//! The checkout command
//!
//! Fetches a stored delta and its tree-id sidecar, materialises the tree
//! into a scratch working tree and reproduces the archive from the pair.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use crate::config::Options;
use crate::regen;
use crate::repository::Repository;
use crate::scratch::Scratch;

pub fn run(name: &str, output: Option<&Path>, options: &Options) -> Result<()> {
    let repo = Repository::open(&options.branch)?;

    let delta = repo.read_blob(&format!("{}.delta", name))?;
    let id_blob = repo.read_blob(&format!("{}.id", name))?;
    let tree = String::from_utf8_lossy(&id_blob).trim().to_string();

    let scratch = Scratch::new(options.keep_scratch)?;
    let tree_dir = scratch.subdir("tree")?;
    repo.export_tree(&tree, &tree_dir)?;

    let output = output.unwrap_or_else(|| Path::new(name));
    regen::gentar(&delta, &tree_dir, output, options)?;

    println!("{} {}", "Reproduced".green().bold(), output.display());
    Ok(())
}
