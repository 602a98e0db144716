//! Archive compression detection and unwrapping
//!
//! The outer compression of an archive is decided from its magic bytes,
//! never from the file name. Decompression goes through the external
//! decompressors so that the plaintext is exactly what the original
//! producer's tools would see.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::process;

/// Outer compression of an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionKind {
    None,
    Gzip,
    Bzip2,
}

impl CompressionKind {
    /// Detect the compression from a file's magic bytes
    pub fn detect(path: &Path) -> Result<Self> {
        let mut file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let mut magic = [0u8; 3];
        let mut filled = 0;
        while filled < magic.len() {
            let n = file.read(&mut magic[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == magic.len() {
            if magic == [0x1f, 0x8b, 0x08] {
                return Ok(Self::Gzip);
            }
            if magic == *b"BZh" {
                return Ok(Self::Bzip2);
            }
        }
        Ok(Self::None)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gz",
            Self::Bzip2 => "bz2",
        }
    }
}

/// Decompress `input` into `output` with the matching external tool
pub fn decompress(kind: CompressionKind, input: &Path, output: &Path) -> Result<()> {
    match kind {
        CompressionKind::None => bail!("{} is not compressed", input.display()),
        // gzip signals trailing garbage with exit status 2; the member
        // itself decompressed fine, so accept it.
        CompressionKind::Gzip => process::run_filter("gzip", &["-dc"], input, output, &[0, 2]),
        CompressionKind::Bzip2 => process::run_filter("bzip2", &["-dc"], input, output, &[0]),
    }
}

/// Move `src` to `dest`, staging beside the destination when a direct
/// rename crosses filesystems
pub fn place(src: &Path, dest: &Path) -> Result<()> {
    if std::fs::rename(src, dest).is_ok() {
        return Ok(());
    }
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = dest
        .file_name()
        .with_context(|| format!("invalid output path {}", dest.display()))?;
    let mut tmp_name = std::ffi::OsString::from(".");
    tmp_name.push(file_name);
    tmp_name.push(".part");
    let staged = dir.join(tmp_name);
    std::fs::copy(src, &staged)
        .with_context(|| format!("Failed to stage {}", staged.display()))?;
    std::fs::rename(&staged, dest)
        .with_context(|| format!("Failed to move archive to {}", dest.display()))?;
    Ok(())
}
