//! Stored delta formats
//!
//! Two nested layouts share the container encoding: the tar delta
//! (manifest plus binary patch, optionally carrying a wrapper delta for the
//! outer compression) and the compressed-wrapper delta (compressor
//! identification plus an optional residual patch). The `version` entry
//! gates all further decoding; parameters stored in a wrapper are checked
//! against a whitelist before any compressor is spawned.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use base64::prelude::*;
use sha1::{Digest, Sha1};

use crate::container::Container;
use crate::error::RetarError;
use crate::manifest::Manifest;

/// Parsed `version` entry ("major.minor")
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    pub const V2: Version = Version { major: 2, minor: 0 };
    pub const V3: Version = Version { major: 3, minor: 0 };

    pub fn parse(text: &str) -> Result<Self> {
        let (major, minor) = text.split_once('.').unwrap_or((text, "0"));
        let parse = |part: &str| {
            part.parse::<u32>().map_err(|_| RetarError::UnsupportedVersion {
                kind: "delta",
                found: text.to_string(),
                supported: "decimal major.minor",
            })
        };
        Ok(Self {
            major: parse(major)?,
            minor: parse(minor)?,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

fn gate_version(
    kind: &'static str,
    supported: &'static str,
    found: Version,
    accepted_majors: std::ops::Range<u32>,
) -> Result<()> {
    if accepted_majors.contains(&found.major) {
        return Ok(());
    }
    Err(RetarError::UnsupportedVersion {
        kind,
        found: found.to_string(),
        supported,
    }
    .into())
}

/// Compression flavour recorded in a wrapper delta
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperKind {
    Gz,
    Bz2,
}

impl WrapperKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Gz => "gz",
            Self::Bz2 => "bz2",
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        match text {
            "gz" => Ok(Self::Gz),
            "bz2" => Ok(Self::Bz2),
            other => Err(RetarError::CompressionMismatch {
                requested: "gz or bz2".to_string(),
                stored: other.to_string(),
            }
            .into()),
        }
    }
}

/// Identification of the compressed wrapping of an archive
#[derive(Debug, Clone)]
pub struct WrapperDelta {
    pub kind: WrapperKind,

    /// Whitelisted compressor arguments
    pub params: Vec<String>,

    /// bz2 only: which compressor binary
    pub program: Option<String>,

    /// gz only: stored-name field from the member header
    pub filename: Option<Vec<u8>>,

    /// gz only: modification time from the member header
    pub timestamp: Option<u32>,

    /// Base64 SHA-1 of the pristine compressed file; older deltas may
    /// lack it
    pub sha1sum: Option<String>,

    /// Residual patch from the best candidate's output to the pristine file
    pub patch: Option<Vec<u8>>,
}

impl WrapperDelta {
    pub fn version(&self) -> Version {
        if self.patch.is_some() {
            Version::V3
        } else {
            Version::V2
        }
    }

    pub fn pack(&self) -> Result<Vec<u8>> {
        let mut container = Container::new();
        container.push("version", format!("{}\n", self.version()).into_bytes());
        container.push("type", format!("{}\n", self.kind.name()).into_bytes());
        container.push("params", format!("{}\n", self.params.join(" ")).into_bytes());
        match self.kind {
            WrapperKind::Gz => {
                let mut filename = self.filename.clone().unwrap_or_default();
                filename.push(b'\n');
                container.push("filename", filename);
                container.push(
                    "timestamp",
                    format!("{}\n", self.timestamp.unwrap_or(0)).into_bytes(),
                );
            }
            WrapperKind::Bz2 => {
                let program = self.program.as_deref().unwrap_or_default();
                container.push("program", format!("{}\n", program).into_bytes());
            }
        }
        if let Some(sha1sum) = &self.sha1sum {
            container.push("sha1sum", format!("{}\n", sha1sum).into_bytes());
        }
        if let Some(patch) = &self.patch {
            container.push("delta", patch.clone());
        }
        container.to_bytes()
    }

    pub fn unpack(data: &[u8]) -> Result<Self> {
        let container = Container::from_bytes(data)?;
        let version = Version::parse(&container.require_text("version")?)?;
        let kind = WrapperKind::parse(&container.require_text("type")?)?;
        match kind {
            WrapperKind::Gz => gate_version("gz wrapper delta", "2.x-3.x", version, 2..4)?,
            WrapperKind::Bz2 => gate_version("bz2 wrapper delta", "2.x", version, 2..3)?,
        }

        let params: Vec<String> = container
            .require_text("params")?
            .split_whitespace()
            .map(String::from)
            .collect();

        let (program, filename, timestamp) = match kind {
            WrapperKind::Gz => {
                let mut filename = container.require("filename")?.to_vec();
                if filename.last() == Some(&b'\n') {
                    filename.pop();
                }
                let timestamp = container
                    .require_text("timestamp")?
                    .parse::<u32>()
                    .context("delta holds an unparsable timestamp")?;
                (None, Some(filename), Some(timestamp))
            }
            WrapperKind::Bz2 => {
                let program = container.require_text("program")?;
                validate_bz2_program(&program)?;
                (Some(program), None, None)
            }
        };

        let patch = if version.major >= 3 {
            Some(container.require("delta")?.to_vec())
        } else {
            None
        };

        Ok(Self {
            kind,
            params,
            program,
            filename,
            timestamp,
            sha1sum: match container.get("sha1sum") {
                Some(data) => Some(String::from_utf8_lossy(data).trim().to_string()),
                None => None,
            },
            patch,
        })
    }
}

/// A stored tar delta
#[derive(Debug, Clone)]
pub struct TarDelta {
    pub manifest: Manifest,

    /// Binary patch from the canonical tar to the original inner tar
    pub patch: Vec<u8>,

    /// Identification of the outer compression, when there was one
    pub wrapper: Option<WrapperDelta>,
}

impl TarDelta {
    pub fn pack(&self) -> Result<Vec<u8>> {
        let mut container = Container::new();
        container.push("version", format!("{}\n", Version::V2).into_bytes());
        container.push("type", b"tar\n".to_vec());
        container.push("manifest", self.manifest.to_bytes());
        container.push("delta", self.patch.clone());
        if let Some(wrapper) = &self.wrapper {
            container.push("wrapper", wrapper.pack()?);
        }
        container.to_bytes()
    }

    pub fn unpack(data: &[u8]) -> Result<Self> {
        let container = Container::from_bytes(data)?;
        let version = Version::parse(&container.require_text("version")?)?;
        gate_version("tar delta", "2.x", version, 2..3)?;
        let stored = container.require_text("type")?;
        if stored != "tar" {
            return Err(RetarError::CompressionMismatch {
                requested: "tar".to_string(),
                stored,
            }
            .into());
        }

        let manifest = Manifest::from_bytes(container.require("manifest")?);
        let patch = container.require("delta")?.to_vec();
        let wrapper = match container.get("wrapper") {
            Some(data) => Some(WrapperDelta::unpack(data)?),
            None => None,
        };

        Ok(Self {
            manifest,
            patch,
            wrapper,
        })
    }
}

/// Validate stored gz params against the restore whitelist
pub fn validate_gz_params(params: &[String]) -> Result<()> {
    let mut iter = params.iter();
    while let Some(param) = iter.next() {
        match param.as_str() {
            "--gnu" | "--rsyncable" | "-n" | "-m" | "-M" => {}
            level if is_level(level) => {}
            "--original-name" | "--quirk" => {
                if iter.next().is_none() {
                    return Err(
                        RetarError::ParamValidation(format!("{} lacks a value", param)).into()
                    );
                }
            }
            "--osflag" => {
                let value = iter.next().ok_or_else(|| {
                    RetarError::ParamValidation(format!("{} lacks a value", param))
                })?;
                if value.parse::<u8>().is_err() {
                    return Err(RetarError::ParamValidation(format!(
                        "--osflag {} is not numeric",
                        value
                    ))
                    .into());
                }
            }
            other => return Err(RetarError::ParamValidation(other.to_string()).into()),
        }
    }
    Ok(())
}

/// Validate stored bz2 params against the restore whitelist
pub fn validate_bz2_params(params: &[String]) -> Result<()> {
    for param in params {
        let ok = is_level(param)
            || param == "--old-bzip2"
            || param
                .strip_prefix("-b")
                .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()));
        if !ok {
            return Err(RetarError::ParamValidation(param.to_string()).into());
        }
    }
    Ok(())
}

/// Compressor binaries allowed for bz2 reproduction
pub const BZ2_PROGRAMS: &[&str] = &["bzip2", "pbzip2", "zgz"];

pub fn validate_bz2_program(program: &str) -> Result<()> {
    if BZ2_PROGRAMS.contains(&program) {
        return Ok(());
    }
    Err(RetarError::ParamValidation(format!("unsupported compressor {}", program)).into())
}

fn is_level(param: &str) -> bool {
    matches!(param.as_bytes(), [b'-', digit] if digit.is_ascii_digit() && *digit != b'0')
}

/// Base64 SHA-1 of a file, streamed
pub fn sha1_base64(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha1::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(BASE64_STANDARD.encode(hasher.finalize()))
}

/// Check a reproduced file against its stored base64 SHA-1 guard
pub fn verify_sha1(path: &Path, expected: &str) -> Result<()> {
    let actual = sha1_base64(path)?;
    if actual != expected {
        return Err(RetarError::Sha1Mismatch {
            expected: expected.to_string(),
            actual,
        }
        .into());
    }
    Ok(())
}
