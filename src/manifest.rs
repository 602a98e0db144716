//! Archive entry manifests
//!
//! A manifest records the paths of an archive's entries in their original
//! order. That order fully determines traversal when the canonical tar is
//! rebuilt; the builder never walks the filesystem on its own. Paths are
//! kept as raw bytes and are never transcoded.

use std::ffi::OsStr;
use std::fs::File;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use anyhow::{Context, Result};

/// Ordered list of archive entry paths
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<Vec<u8>>,
}

impl Manifest {
    /// Read entry names, in order, from a tar file
    pub fn from_tar(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let mut archive = tar::Archive::new(file);
        let mut raw = Vec::new();
        for entry in archive
            .entries()
            .with_context(|| format!("Failed to read tar entries from {}", path.display()))?
        {
            let entry = entry?;
            raw.push(entry.path_bytes().into_owned());
        }
        Ok(Self::from_raw(raw))
    }

    /// Normalise raw entry names: strip leading `./` and `/`, drop empties
    pub fn from_raw(raw: Vec<Vec<u8>>) -> Self {
        let mut entries = Vec::new();
        for name in raw {
            let name = normalise(&name);
            if !name.is_empty() {
                entries.push(name);
            }
        }
        Self { entries }
    }

    /// Parse the newline-separated on-disk form
    pub fn from_bytes(data: &[u8]) -> Self {
        Self::from_raw(data.split(|&b| b == b'\n').map(<[u8]>::to_vec).collect())
    }

    /// Newline-separated on-disk form
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in &self.entries {
            out.extend_from_slice(entry);
            out.push(b'\n');
        }
        out
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_bytes())
            .with_context(|| format!("Failed to write manifest to {}", path.display()))
    }

    pub fn entries(&self) -> impl Iterator<Item = &[u8]> {
        self.entries.iter().map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The shared first path component, when every entry sits under one
    ///
    /// Any entry without a `/` is a top-level entry and disables wrapping.
    pub fn common_subdir(&self) -> Option<Vec<u8>> {
        let mut subdir: Option<&[u8]> = None;
        for entry in &self.entries {
            let pos = entry.iter().position(|&b| b == b'/')?;
            let first = &entry[..pos];
            match subdir {
                None => subdir = Some(first),
                Some(seen) if seen == first => {}
                Some(_) => return None,
            }
        }
        subdir.map(<[u8]>::to_vec)
    }
}

/// Interpret manifest bytes as a filesystem path
pub(crate) fn bytes_to_path(bytes: &[u8]) -> &Path {
    Path::new(OsStr::from_bytes(bytes))
}

fn normalise(mut name: &[u8]) -> Vec<u8> {
    loop {
        if let Some(rest) = name.strip_prefix(b"./") {
            name = rest;
        } else if let Some(rest) = name.strip_prefix(b"/") {
            name = rest;
        } else {
            break;
        }
    }
    name.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_of(names: &[&str]) -> Manifest {
        Manifest::from_raw(names.iter().map(|n| n.as_bytes().to_vec()).collect())
    }

    #[test]
    fn test_normalisation() {
        let manifest = manifest_of(&["./foo/a", "/foo/b", ".//foo/c", "", "./", "foo/d"]);
        let entries: Vec<&[u8]> = manifest.entries().collect();
        assert_eq!(
            entries,
            vec![
                b"foo/a".as_slice(),
                b"foo/b".as_slice(),
                b"foo/c".as_slice(),
                b"foo/d".as_slice(),
            ]
        );
    }

    #[test]
    fn test_order_preserved() {
        let manifest = manifest_of(&["z", "a", "m"]);
        let entries: Vec<&[u8]> = manifest.entries().collect();
        assert_eq!(entries, vec![b"z".as_slice(), b"a".as_slice(), b"m".as_slice()]);
    }

    #[test]
    fn test_bytes_round_trip() {
        let manifest = manifest_of(&["pkg-1.0/", "pkg-1.0/src/main.c", "pkg-1.0/README"]);
        let parsed = Manifest::from_bytes(&manifest.to_bytes());
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn test_common_subdir_shared() {
        let manifest = manifest_of(&["pkg-1.0/", "pkg-1.0/a", "pkg-1.0/sub/b"]);
        assert_eq!(manifest.common_subdir(), Some(b"pkg-1.0".to_vec()));
    }

    #[test]
    fn test_common_subdir_divergent() {
        let manifest = manifest_of(&["pkg-1.0/a", "other/b"]);
        assert_eq!(manifest.common_subdir(), None);
    }

    #[test]
    fn test_common_subdir_top_level_entry() {
        let manifest = manifest_of(&["pkg-1.0/a", "README"]);
        assert_eq!(manifest.common_subdir(), None);
    }

    #[test]
    fn test_common_subdir_empty_manifest() {
        assert_eq!(Manifest::default().common_subdir(), None);
    }
}
