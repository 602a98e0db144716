//! Generation and reproduction driver
//!
//! `gendelta` distils an archive into a delta; `gentar` recreates the
//! archive byte for byte from a working tree plus that delta. Compressed
//! archives nest a wrapper delta for the outer stream inside the tar delta.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

use crate::archive::{self, CompressionKind};
use crate::bzip2;
use crate::config::Options;
use crate::delta::{TarDelta, WrapperKind};
use crate::gzip;
use crate::manifest::{bytes_to_path, Manifest};
use crate::patch;
use crate::scratch::Scratch;
use crate::tarball::{self, BuildMode};

/// Distil `archive_path` into a delta, returning the packed bytes
pub fn gendelta(archive_path: &Path, options: &Options) -> Result<Vec<u8>> {
    let scratch = Scratch::new(options.keep_scratch)?;
    let kind = CompressionKind::detect(archive_path)?;
    tracing::info!("{}: {} compression", archive_path.display(), kind.name());

    let (inner_tar, wrapper) = match kind {
        CompressionKind::None => (archive_path.to_path_buf(), None),
        compressed => {
            let inner = scratch.file("inner.tar");
            archive::decompress(compressed, archive_path, &inner)?;
            let wrapper_scratch = scratch.subdir("wrapper")?;
            let wrapper = match compressed {
                CompressionKind::Gzip => {
                    gzip::identify(archive_path, &inner, &wrapper_scratch, options)?
                }
                CompressionKind::Bzip2 => {
                    bzip2::identify(archive_path, &inner, &wrapper_scratch, options)?
                }
                CompressionKind::None => unreachable!(),
            };
            (inner, Some(wrapper))
        }
    };

    let manifest = Manifest::from_tar(&inner_tar)?;
    if manifest.is_empty() {
        bail!("{} holds no entries", archive_path.display());
    }
    tracing::debug!("manifest holds {} entries", manifest.len());

    let extract_dir = scratch.subdir("extract")?;
    tarball::extract(&inner_tar, &extract_dir)?;
    let source = source_root(&extract_dir, &manifest);

    let build_scratch = scratch.subdir("build")?;
    let canonical = scratch.file("canonical.tar");
    tarball::build(
        &source,
        &manifest,
        &canonical,
        &build_scratch,
        BuildMode {
            clobber_source: true,
            create_missing: false,
        },
    )?;

    let patch_file = scratch.file("delta");
    patch::diff(&canonical, &inner_tar, &patch_file)?;

    let delta = TarDelta {
        manifest,
        patch: fs::read(&patch_file)?,
        wrapper,
    };
    delta.pack()
}

/// Recreate the archive described by `delta_bytes` from `working_tree`
pub fn gentar(delta_bytes: &[u8], working_tree: &Path, output: &Path, options: &Options) -> Result<()> {
    let delta = TarDelta::unpack(delta_bytes)?;
    let scratch = Scratch::new(options.keep_scratch)?;

    let build_scratch = scratch.subdir("build")?;
    let canonical = scratch.file("canonical.tar");
    tarball::build(
        working_tree,
        &delta.manifest,
        &canonical,
        &build_scratch,
        BuildMode {
            clobber_source: false,
            create_missing: true,
        },
    )?;

    let patch_file = scratch.file("delta");
    fs::write(&patch_file, &delta.patch)?;
    let inner_tar = scratch.file("inner.tar");
    patch::apply(&canonical, &patch_file, &inner_tar)?;

    match &delta.wrapper {
        None => archive::place(&inner_tar, output)?,
        Some(wrapper) => {
            let wrapper_scratch = scratch.subdir("wrapper")?;
            match wrapper.kind {
                WrapperKind::Gz => {
                    gzip::reproduce(wrapper, &inner_tar, output, &wrapper_scratch, options)?
                }
                WrapperKind::Bz2 => {
                    bzip2::reproduce(wrapper, &inner_tar, output, &wrapper_scratch, options)?
                }
            }
        }
    }
    tracing::info!("reproduced {}", output.display());
    Ok(())
}

/// Extract an archive's contents, without any wrapping subdirectory, into
/// the scratch and return the tree root
///
/// This is the tree a content store snapshots: `gentar` later rebuilds the
/// wrapper directory from the manifest.
pub fn extract_contents(archive_path: &Path, scratch: &Scratch) -> Result<PathBuf> {
    let kind = CompressionKind::detect(archive_path)?;
    let tar_path = match kind {
        CompressionKind::None => archive_path.to_path_buf(),
        compressed => {
            let plain = scratch.file("contents.tar");
            archive::decompress(compressed, archive_path, &plain)?;
            plain
        }
    };
    let manifest = Manifest::from_tar(&tar_path)?;
    let dir = scratch.subdir("contents")?;
    tarball::extract(&tar_path, &dir)?;
    Ok(source_root(&dir, &manifest))
}

fn source_root(extract_dir: &Path, manifest: &Manifest) -> PathBuf {
    match manifest.common_subdir() {
        Some(subdir) => extract_dir.join(bytes_to_path(&subdir)),
        None => extract_dir.to_path_buf(),
    }
}
