//! Scratch directory management
//!
//! Each top-level operation owns one scratch root. Nested work (the
//! compressor search, the canonical tar staging) happens in named
//! subdirectories below it. The root is removed when the owner goes away
//! unless the user asked to keep it for inspection.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

/// An owned scratch tree, removed on drop unless preservation was requested
pub struct Scratch {
    dir: Option<TempDir>,
    path: PathBuf,
    keep: bool,
}

impl Scratch {
    /// Create a fresh scratch root
    pub fn new(keep: bool) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("retar-")
            .tempdir()
            .context("Failed to create scratch directory")?;
        let path = dir.path().to_path_buf();
        tracing::debug!("scratch directory at {}", path.display());

        Ok(Self {
            dir: Some(dir),
            path,
            keep,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create (if needed) and return a named subdirectory
    pub fn subdir(&self, name: &str) -> Result<PathBuf> {
        let path = self.path.join(name);
        std::fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create scratch subdirectory {}", path.display()))?;
        Ok(path)
    }

    /// A file path inside the scratch root (not created)
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        if self.keep {
            if let Some(dir) = self.dir.take() {
                let path = dir.keep();
                tracing::info!("keeping scratch directory {}", path.display());
            }
        }
    }
}
