//! Canonical tar construction
//!
//! Rebuilds a deterministic tar from a source tree plus a manifest. All
//! metadata the archiver would record is forced to fixed values in place,
//! then GNU tar is invoked with the manifest as its file list. Two runs
//! over trees with equal content produce identical bytes no matter what
//! timestamps, modes or link types the trees started with.

use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::{Context, Result};
use filetime::FileTime;

use crate::manifest::{bytes_to_path, Manifest};
use crate::process;

/// How the source tree is consumed
#[derive(Debug, Clone, Copy)]
pub struct BuildMode {
    /// Move the source into the staging layout instead of copying it
    pub clobber_source: bool,

    /// Create manifest directories missing from disk (content stores
    /// cannot represent empty directories)
    pub create_missing: bool,
}

const SPECIAL_BITS: u32 = 0o7000;

/// Build the canonical tar for (source tree, manifest) at `output`
///
/// The source tree is the archive contents without any wrapping
/// subdirectory; when the manifest shows a shared first component the
/// wrapper is reintroduced here before archiving.
pub fn build(
    source: &Path,
    manifest: &Manifest,
    output: &Path,
    scratch: &Path,
    mode: BuildMode,
) -> Result<()> {
    let workdir = scratch.join("workdir");
    let dest = match manifest.common_subdir() {
        Some(subdir) => {
            fs::create_dir_all(&workdir)?;
            workdir.join(bytes_to_path(&subdir))
        }
        None => workdir.clone(),
    };

    if mode.clobber_source {
        fs::rename(source, &dest).with_context(|| {
            format!("Failed to move {} into {}", source.display(), dest.display())
        })?;
    } else {
        copy_tree(source, &dest)?;
    }

    let mut full_sweep = false;
    for entry in manifest.entries() {
        prepare_entry(&workdir.join(bytes_to_path(entry)), mode.create_missing, &mut full_sweep)?;
    }
    if full_sweep {
        // The manifest names something the tree lacks, usually because tar
        // canonicalised the stored name. Clamp everything instead.
        tracing::debug!("manifest and tree disagree, sweeping the whole tree");
        sweep(&workdir)?;
    } else {
        // Times go last: replacing links and creating directories above
        // dirtied the mtimes of their parents.
        for entry in manifest.entries() {
            clamp_times(&workdir.join(bytes_to_path(entry)))?;
        }
    }

    let list = scratch.join("manifest");
    manifest.write_to(&list)?;

    let args: Vec<OsString> = vec![
        "--create".into(),
        "--file".into(),
        output.into(),
        "--files-from".into(),
        list.as_path().into(),
        "--format".into(),
        "ustar".into(),
        "--owner".into(),
        "0".into(),
        "--group".into(),
        "0".into(),
        "--numeric-owner".into(),
        "--mode".into(),
        "0644".into(),
        "--no-recursion".into(),
    ];
    process::run("tar", &args, Some(&workdir), &[0])?;
    Ok(())
}

/// Force one manifest path into its archivable shape
fn prepare_entry(path: &Path, create_missing: bool, full_sweep: &mut bool) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => {
            // tar records the link target, and links carry no clampable
            // mtime. An empty regular file keeps the entry predictable; the
            // binary patch restores the real link bytes.
            fs::remove_file(path)?;
            fs::File::create(path)?;
        }
        Ok(_) => {}
        Err(_) => {
            if create_missing {
                fs::create_dir_all(path)
                    .with_context(|| format!("Failed to create {}", path.display()))?;
            } else {
                *full_sweep = true;
                return Ok(());
            }
        }
    }

    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() && meta.permissions().mode() & SPECIAL_BITS != 0 {
        // The forced archive mode does not reach these bits on directories.
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

fn clamp_times(path: &Path) -> Result<()> {
    filetime::set_file_times(path, FileTime::zero(), FileTime::zero())
        .with_context(|| format!("Failed to clamp times on {}", path.display()))
}

/// Clamp every entry below `dir`
fn sweep(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let meta = fs::symlink_metadata(&path)?;
        if meta.file_type().is_symlink() {
            fs::remove_file(&path)?;
            fs::File::create(&path)?;
        } else if meta.is_dir() {
            if meta.permissions().mode() & SPECIAL_BITS != 0 {
                fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
            }
            sweep(&path)?;
        }
        filetime::set_file_times(&path, FileTime::zero(), FileTime::zero())?;
    }
    Ok(())
}

/// Copy a tree, keeping symlinks as symlinks and directory modes intact
fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create {}", dest.display()))?;
    for entry in
        fs::read_dir(source).with_context(|| format!("Failed to read {}", source.display()))?
    {
        let entry = entry?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let meta = fs::symlink_metadata(&from)?;
        if meta.file_type().is_symlink() {
            let target = fs::read_link(&from)?;
            std::os::unix::fs::symlink(&target, &to)?;
        } else if meta.is_dir() {
            copy_tree(&from, &to)?;
            fs::set_permissions(&to, meta.permissions())?;
        } else {
            fs::copy(&from, &to)
                .with_context(|| format!("Failed to copy {}", from.display()))?;
        }
    }
    Ok(())
}

/// Unpack a tar file into a directory, preserving symlinks and modes
pub fn extract(tar_file: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    let file = fs::File::open(tar_file)
        .with_context(|| format!("Failed to open {}", tar_file.display()))?;
    let mut archive = tar::Archive::new(file);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive
        .unpack(dest)
        .with_context(|| format!("Failed to extract {}", tar_file.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    fn mtime_of(path: &Path) -> i64 {
        FileTime::from_last_modification_time(&fs::symlink_metadata(path).unwrap()).unix_seconds()
    }

    #[test]
    fn test_symlink_becomes_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("link");
        symlink("../target", &link).unwrap();

        let mut full_sweep = false;
        prepare_entry(&link, false, &mut full_sweep).unwrap();

        let meta = fs::symlink_metadata(&link).unwrap();
        assert!(meta.is_file());
        assert_eq!(meta.len(), 0);
        assert!(!full_sweep);
    }

    #[test]
    fn test_times_clamped_to_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a");
        fs::write(&file, b"data").unwrap();

        let mut full_sweep = false;
        prepare_entry(&file, false, &mut full_sweep).unwrap();
        clamp_times(&file).unwrap();
        assert_eq!(mtime_of(&file), 0);
    }

    #[test]
    fn test_directory_special_bits_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::set_permissions(&sub, fs::Permissions::from_mode(0o2775)).unwrap();

        let mut full_sweep = false;
        prepare_entry(&sub, false, &mut full_sweep).unwrap();

        let mode = fs::symlink_metadata(&sub).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o755);
    }

    #[test]
    fn test_missing_path_flags_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let mut full_sweep = false;
        prepare_entry(&dir.path().join("absent"), false, &mut full_sweep).unwrap();
        assert!(full_sweep);
        assert!(!dir.path().join("absent").exists());
    }

    #[test]
    fn test_missing_path_created_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pkg-1.0/empty");
        let mut full_sweep = false;
        prepare_entry(&path, true, &mut full_sweep).unwrap();
        clamp_times(&path).unwrap();
        assert!(path.is_dir());
        assert!(!full_sweep);
        assert_eq!(mtime_of(&path), 0);
    }

    #[test]
    fn test_normalisation_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a");
        fs::write(&file, b"data").unwrap();
        let link = dir.path().join("b");
        symlink("a", &link).unwrap();

        let mut full_sweep = false;
        for path in [&file, &link] {
            prepare_entry(path, false, &mut full_sweep).unwrap();
            clamp_times(path).unwrap();
        }
        let snapshot = |path: &Path| {
            let meta = fs::symlink_metadata(path).unwrap();
            (meta.len(), meta.permissions().mode(), mtime_of(path))
        };
        let first = (snapshot(&file), snapshot(&link));
        for path in [&file, &link] {
            prepare_entry(path, false, &mut full_sweep).unwrap();
            clamp_times(path).unwrap();
        }
        assert_eq!((snapshot(&file), snapshot(&link)), first);
        assert!(!full_sweep);
    }

    #[test]
    fn test_sweep_clamps_everything() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/a"), b"x").unwrap();
        symlink("a", dir.path().join("sub/link")).unwrap();

        sweep(dir.path()).unwrap();

        assert_eq!(mtime_of(&dir.path().join("sub")), 0);
        assert_eq!(mtime_of(&dir.path().join("sub/a")), 0);
        let link_meta = fs::symlink_metadata(dir.path().join("sub/link")).unwrap();
        assert!(link_meta.is_file());
    }

    #[test]
    fn test_copy_tree_preserves_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src");
        fs::create_dir_all(source.join("sub")).unwrap();
        fs::write(source.join("sub/a"), b"content").unwrap();
        symlink("sub/a", source.join("link")).unwrap();

        let dest = dir.path().join("dst");
        copy_tree(&source, &dest).unwrap();

        assert_eq!(fs::read(dest.join("sub/a")).unwrap(), b"content");
        let meta = fs::symlink_metadata(dest.join("link")).unwrap();
        assert!(meta.file_type().is_symlink());
        assert_eq!(fs::read_link(dest.join("link")).unwrap(), Path::new("sub/a"));
    }
}
