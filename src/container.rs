//! Delta container packing
//!
//! A stored delta is a small tar, normally gzip wrapped, holding one file
//! per field. Writers pin every header field so the output is
//! deterministic. Readers accept raw or gzipped containers, ignore entries
//! they do not know, and name the missing entry when a required one is
//! absent.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::RetarError;

/// Ordered name to bytes entries of a delta container
#[derive(Debug, Clone, Default)]
pub struct Container {
    entries: Vec<(String, Vec<u8>)>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry; on-disk order follows insertion order
    pub fn push(&mut self, name: &str, data: Vec<u8>) {
        self.entries.push((name.to_string(), data));
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, data)| data.as_slice())
    }

    /// Fetch a required entry
    pub fn require(&self, name: &str) -> Result<&[u8]> {
        self.get(name)
            .ok_or_else(|| RetarError::MissingDeltaEntry(name.to_string()).into())
    }

    /// Fetch a required entry as whitespace-trimmed text
    pub fn require_text(&self, name: &str) -> Result<String> {
        let data = self.require(name)?;
        Ok(String::from_utf8_lossy(data).trim().to_string())
    }

    /// Serialise as a gzipped ustar tar with pinned metadata
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let gz = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(gz);
        for (name, data) in &self.entries {
            let mut header = tar::Header::new_ustar();
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_uid(0);
            header.set_gid(0);
            header.set_mtime(0);
            builder
                .append_data(&mut header, name, data.as_slice())
                .with_context(|| format!("Failed to pack delta entry {}", name))?;
        }
        let gz = builder
            .into_inner()
            .context("Failed to finish delta tar")?;
        gz.finish().context("Failed to compress delta")
    }

    /// Parse a container, gzipped or raw
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let raw = if data.starts_with(&[0x1f, 0x8b]) {
            let mut decoder = GzDecoder::new(data);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .context("Failed to decompress delta")?;
            out
        } else {
            data.to_vec()
        };
        let mut archive = tar::Archive::new(raw.as_slice());
        let mut entries = Vec::new();
        for entry in archive.entries().context("Failed to read delta container")? {
            let mut entry = entry?;
            let name = String::from_utf8_lossy(&entry.path_bytes()).to_string();
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            entries.push((name, data));
        }
        Ok(Self { entries })
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read delta from {}", path.display()))?;
        Self::from_bytes(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Container {
        let mut container = Container::new();
        container.push("version", b"2.0\n".to_vec());
        container.push("type", b"tar\n".to_vec());
        container.push("delta", vec![0, 1, 2, 255]);
        container
    }

    #[test]
    fn test_round_trip() {
        let packed = sample().to_bytes().unwrap();
        assert!(packed.starts_with(&[0x1f, 0x8b]));

        let parsed = Container::from_bytes(&packed).unwrap();
        assert_eq!(parsed.require("version").unwrap(), b"2.0\n");
        assert_eq!(parsed.require_text("type").unwrap(), "tar");
        assert_eq!(parsed.require("delta").unwrap(), &[0, 1, 2, 255]);
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(sample().to_bytes().unwrap(), sample().to_bytes().unwrap());
    }

    #[test]
    fn test_raw_tar_accepted() {
        let packed = sample().to_bytes().unwrap();
        let mut decoder = GzDecoder::new(packed.as_slice());
        let mut raw = Vec::new();
        decoder.read_to_end(&mut raw).unwrap();

        let parsed = Container::from_bytes(&raw).unwrap();
        assert_eq!(parsed.require_text("version").unwrap(), "2.0");
    }

    #[test]
    fn test_missing_entry_named() {
        let parsed = Container::from_bytes(&sample().to_bytes().unwrap()).unwrap();
        let err = parsed.require("manifest").unwrap_err();
        assert_eq!(err.to_string(), "delta lacks manifest");
    }

    #[test]
    fn test_unknown_entries_ignored() {
        let mut container = sample();
        container.push("future-field", b"whatever".to_vec());
        let parsed = Container::from_bytes(&container.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.require_text("version").unwrap(), "2.0");
    }
}
