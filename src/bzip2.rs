//! bzip2 wrapper identification and replay
//!
//! The signature's level digit pins the compressor level; what varies is
//! which binary produced the stream. The ordered program list is tried
//! first, and an optional exhaustive pbzip2 block-size sweep covers files
//! whose producer split the input into independent chunks. There is no
//! residual-patch fallback for bz2.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::Result;

use crate::config::Options;
use crate::delta::{self, WrapperDelta, WrapperKind};
use crate::error::RetarError;
use crate::process;

/// Fields of a bz2 file signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bz2Header {
    /// Level digit from the signature, 1 through 9
    pub level: u8,
}

impl Bz2Header {
    pub fn parse_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| header_error(format!("cannot open {}: {}", path.display(), e)))?;
        Self::read(&mut std::io::BufReader::new(file))
    }

    pub fn read(reader: &mut impl Read) -> Result<Self> {
        let mut signature = [0u8; 4];
        reader
            .read_exact(&mut signature)
            .map_err(|_| header_error("truncated signature".to_string()))?;
        if &signature[..3] != b"BZh" {
            return Err(header_error("bad signature".to_string()));
        }
        let digit = signature[3];
        if !(b'1'..=b'9').contains(&digit) {
            return Err(header_error(format!("bad level digit {:?}", digit as char)));
        }
        Ok(Self {
            level: digit - b'0',
        })
    }
}

fn header_error(reason: String) -> anyhow::Error {
    RetarError::HeaderParse {
        format: "bzip2",
        reason,
    }
    .into()
}

/// Ordered (program, args) invocations for a signature
pub fn candidates(header: &Bz2Header) -> Vec<(&'static str, Vec<String>)> {
    let level = format!("-{}", header.level);
    vec![
        ("bzip2", vec![level.clone()]),
        ("pbzip2", vec![level.clone()]),
        ("zgz", vec![level, "--old-bzip2".to_string()]),
    ]
}

/// pbzip2 file-block sizes for the exhaustive sweep
///
/// Small sizes first, then a coarse stride across the range, then the gaps.
/// 9 is pbzip2's default and was already covered by the plain candidates.
pub fn sweep_block_sizes() -> Vec<u32> {
    let mut out = Vec::new();
    let mut push = |n: u32| {
        if n != 9 && !out.contains(&n) {
            out.push(n);
        }
    };
    for n in 1..=10 {
        push(n);
    }
    for n in (15..=95).step_by(5) {
        push(n);
    }
    for n in 11..=100 {
        push(n);
    }
    out
}

/// Work out how `pristine` was compressed from `plaintext`
pub fn identify(
    pristine: &Path,
    plaintext: &Path,
    _scratch: &Path,
    options: &Options,
) -> Result<WrapperDelta> {
    let header = Bz2Header::parse_file(pristine)?;
    let sha1sum = delta::sha1_base64(pristine)?;

    let wrapper = |program: &str, params: &[String]| WrapperDelta {
        kind: WrapperKind::Bz2,
        params: params.to_vec(),
        program: Some(program.to_string()),
        filename: None,
        timestamp: None,
        sha1sum: Some(sha1sum.clone()),
        patch: None,
    };

    for (program, params) in candidates(&header) {
        if process::filter_matches(program, &params, plaintext, pristine)? {
            tracing::debug!("bz2 reproduced by: {} {}", program, params.join(" "));
            return Ok(wrapper(program, &params));
        }
    }

    if options.try_harder {
        for block_size in sweep_block_sizes() {
            let params = vec![format!("-{}", header.level), format!("-b{}", block_size)];
            if process::filter_matches("pbzip2", &params, plaintext, pristine)? {
                tracing::debug!("bz2 reproduced by: pbzip2 {}", params.join(" "));
                return Ok(wrapper("pbzip2", &params));
            }
        }
    } else {
        tracing::warn!("no plain bzip2 invocation matched; rerun with --try-harder to sweep pbzip2 block sizes");
    }

    Err(RetarError::ReproductionFailure(
        "no supported bzip2 invocation reproduces the archive".to_string(),
    )
    .into())
}

/// Recreate the compressed file described by `wrapper` from `plaintext`
pub fn reproduce(
    wrapper: &WrapperDelta,
    plaintext: &Path,
    output: &Path,
    scratch: &Path,
    _options: &Options,
) -> Result<()> {
    let program = wrapper
        .program
        .as_deref()
        .ok_or_else(|| RetarError::MissingDeltaEntry("program".to_string()))?;
    delta::validate_bz2_program(program)?;
    delta::validate_bz2_params(&wrapper.params)?;

    let staged = scratch.join("recompressed.bz2");
    process::run_filter(program, &wrapper.params, plaintext, &staged, &[0])?;

    if let Some(expected) = &wrapper.sha1sum {
        delta::verify_sha1(&staged, expected)?;
    }
    crate::archive::place(&staged, output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_signature() {
        let header = Bz2Header::read(&mut b"BZh61AY&SY".as_slice()).unwrap();
        assert_eq!(header.level, 6);
    }

    #[test]
    fn test_parse_rejects_bad_signature() {
        let err = Bz2Header::read(&mut b"BZx9".as_slice()).unwrap_err();
        assert!(err.to_string().contains("not a valid bzip2 archive"));

        let err = Bz2Header::read(&mut b"BZh0".as_slice()).unwrap_err();
        assert!(err.to_string().contains("level digit"));

        let err = Bz2Header::read(&mut b"BZ".as_slice()).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_candidate_order() {
        let candidates = candidates(&Bz2Header { level: 9 });
        assert_eq!(candidates[0], ("bzip2", vec!["-9".to_string()]));
        assert_eq!(candidates[1], ("pbzip2", vec!["-9".to_string()]));
        assert_eq!(
            candidates[2],
            ("zgz", vec!["-9".to_string(), "--old-bzip2".to_string()])
        );
    }

    #[test]
    fn test_sweep_order() {
        let sweep = sweep_block_sizes();
        // Small sizes first (without the default 9), then the coarse stride.
        assert_eq!(&sweep[..10], &[1, 2, 3, 4, 5, 6, 7, 8, 10, 15]);
        assert_eq!(sweep[10], 20);
        // The gaps come after the stride.
        let position = |n: u32| sweep.iter().position(|&v| v == n).unwrap();
        assert!(position(95) < position(11));
        assert!(position(15) < position(17));
    }

    #[test]
    fn test_sweep_is_complete_and_unique() {
        let sweep = sweep_block_sizes();
        assert_eq!(sweep.len(), 99);
        assert!(!sweep.contains(&9));
        for n in (1..=100).filter(|&n| n != 9) {
            assert!(sweep.contains(&n), "missing block size {}", n);
        }
    }
}
