//! The list command

use anyhow::Result;
use colored::Colorize;

use crate::config::Options;
use crate::repository::Repository;

pub fn run(options: &Options) -> Result<()> {
    let repo = Repository::open(&options.branch)?;

    let mut found = false;
    for name in repo.list()? {
        if let Some(archive) = name.strip_suffix(".delta") {
            println!("{}", archive);
            found = true;
        }
    }
    if !found {
        println!(
            "{} branch {} holds no archives",
            "Note:".yellow().bold(),
            options.branch
        );
    }
    Ok(())
}
