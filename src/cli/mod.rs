//! Command-line interface for retar

use anyhow::Result;
use clap::Subcommand;

use crate::config::Options;

mod checkout;
mod commit;
mod flatcmd;
mod gendelta;
mod gentar;
mod list;

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a delta that can later reproduce an archive
    Gendelta {
        /// Archive to distil (tar, tar.gz or tar.bz2)
        archive: std::path::PathBuf,

        /// Where to write the delta
        delta: std::path::PathBuf,
    },

    /// Recreate an archive from a delta and a working tree
    Gentar {
        /// Stored delta
        delta: std::path::PathBuf,

        /// Tree whose file contents match the archive
        tree: std::path::PathBuf,

        /// Where to write the reproduced archive
        archive: std::path::PathBuf,
    },

    /// Generate a delta and store it on the delta branch
    Commit {
        /// Archive to commit
        archive: std::path::PathBuf,

        /// Revision whose tree matches the archive contents (defaults to a
        /// tree built from the archive itself)
        #[arg(long)]
        reference: Option<String>,
    },

    /// Reproduce a stored archive from the delta branch
    Checkout {
        /// Archive name as stored by commit
        archive: String,

        /// Output path (defaults to the stored name)
        #[arg(short, long)]
        output: Option<std::path::PathBuf>,
    },

    /// List archives stored on the delta branch
    List,

    /// Flatten a compressed file into the single-blob wrapper encoding
    Genflat {
        /// Compressed input (gz or bz2)
        input: std::path::PathBuf,

        /// Where to write the flat encoding
        output: std::path::PathBuf,
    },

    /// Reproduce a compressed file from its flat encoding
    Unflat {
        /// Flat-encoded input
        input: std::path::PathBuf,

        /// Where to write the reproduced file
        output: std::path::PathBuf,
    },
}

/// Execute a CLI command
pub fn execute(command: Commands, options: &Options) -> Result<()> {
    match command {
        Commands::Gendelta { archive, delta } => gendelta::run(&archive, &delta, options),
        Commands::Gentar { delta, tree, archive } => gentar::run(&delta, &tree, &archive, options),
        Commands::Commit { archive, reference } => {
            commit::run(&archive, reference.as_deref(), options)
        }
        Commands::Checkout { archive, output } => {
            checkout::run(&archive, output.as_deref(), options)
        }
        Commands::List => list::run(options),
        Commands::Genflat { input, output } => flatcmd::genflat(&input, &output, options),
        Commands::Unflat { input, output } => flatcmd::unflat(&input, &output, options),
    }
}

/// Format bytes as human-readable size
pub(crate) fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MB");
    }
}
