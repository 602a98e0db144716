//! The commit command
//!
//! Generates a delta and stores it on the delta branch together with a
//! sidecar naming the tree whose contents reproduce the archive.

use std::path::Path;

use anyhow::{bail, Context, Result};
use colored::Colorize;

use crate::config::Options;
use crate::regen;
use crate::repository::Repository;
use crate::scratch::Scratch;

pub fn run(archive: &Path, reference: Option<&str>, options: &Options) -> Result<()> {
    if !archive.exists() {
        bail!("Archive not found: {}", archive.display());
    }
    let repo = Repository::open(&options.branch)?;

    println!("{} {}", "Committing".cyan().bold(), archive.display());

    let delta = regen::gendelta(archive, options)?;

    let scratch = Scratch::new(options.keep_scratch)?;
    let tree = match reference {
        Some(reference) => repo.resolve_tree(reference)?,
        None => {
            let contents = regen::extract_contents(archive, &scratch)?;
            repo.tree_of_directory(&contents, scratch.path())?
        }
    };

    let name = archive
        .file_name()
        .context("archive path has no file name")?
        .to_string_lossy()
        .to_string();
    repo.write_blobs(
        &[
            (format!("{}.delta", name), delta),
            (format!("{}.id", name), format!("{}\n", tree).into_bytes()),
        ],
        &format!("retar data for {}", name),
        scratch.path(),
    )?;

    println!(
        "{} {} {} {}",
        "Stored".green().bold(),
        name,
        "on branch".green(),
        options.branch
    );
    Ok(())
}
