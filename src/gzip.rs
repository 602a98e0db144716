//! gzip wrapper identification and replay
//!
//! Parses the first member header of a gz file, enumerates the compressor
//! invocations that could plausibly have produced it and replays each
//! through `zgz` until one reproduces the stream byte for byte. When none
//! does, every candidate is run to completion and the one whose residual
//! patch against the pristine file is smallest is kept.

use std::ffi::OsString;
use std::fs::File;
use std::io::{BufReader, Read};
use std::os::unix::ffi::OsStringExt;
use std::path::Path;

use anyhow::Result;

use crate::config::Options;
use crate::delta::{self, WrapperDelta, WrapperKind};
use crate::error::RetarError;
use crate::patch;
use crate::process;

/// The compressor used to replay gz streams
pub const PROGRAM: &str = "zgz";

const FHCRC: u8 = 1 << 1;
const FEXTRA: u8 = 1 << 2;
const FNAME: u8 = 1 << 3;
const FCOMMENT: u8 = 1 << 4;

const XFL_BEST: u8 = 2;
const XFL_FAST: u8 = 4;

pub const OS_UNIX: u8 = 3;
pub const OS_NTFS: u8 = 11;

/// Fields of a gz member header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GzHeader {
    pub mtime: u32,
    pub extra_flags: u8,
    pub os: u8,

    /// Original-name field, present only when FNAME was set
    pub filename: Option<Vec<u8>>,
}

impl GzHeader {
    pub fn parse_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| header_error(format!("cannot open {}: {}", path.display(), e)))?;
        Self::read(&mut BufReader::new(file))
    }

    /// Parse the fixed member header plus its optional sections
    pub fn read(reader: &mut impl Read) -> Result<Self> {
        let mut fixed = [0u8; 10];
        reader
            .read_exact(&mut fixed)
            .map_err(|_| header_error("truncated header".to_string()))?;
        if fixed[0] != 0x1f || fixed[1] != 0x8b {
            return Err(header_error("bad magic".to_string()));
        }
        if fixed[2] != 8 {
            return Err(header_error(format!("unknown compression method {}", fixed[2])));
        }
        let flags = fixed[3];
        let mtime = u32::from_le_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]);
        let extra_flags = fixed[8];
        let os = fixed[9];

        if flags & FEXTRA != 0 {
            let mut len = [0u8; 2];
            reader
                .read_exact(&mut len)
                .map_err(|_| header_error("truncated extra field".to_string()))?;
            let mut skip = vec![0u8; u16::from_le_bytes(len) as usize];
            reader
                .read_exact(&mut skip)
                .map_err(|_| header_error("truncated extra field".to_string()))?;
        }
        let filename = if flags & FNAME != 0 {
            Some(read_cstring(reader)?)
        } else {
            None
        };
        if flags & FCOMMENT != 0 {
            read_cstring(reader)?;
        }
        if flags & FHCRC != 0 {
            let mut crc = [0u8; 2];
            reader
                .read_exact(&mut crc)
                .map_err(|_| header_error("truncated header crc".to_string()))?;
        }

        Ok(Self {
            mtime,
            extra_flags,
            os,
            filename,
        })
    }
}

fn header_error(reason: String) -> anyhow::Error {
    RetarError::HeaderParse {
        format: "gzip",
        reason,
    }
    .into()
}

fn read_cstring(reader: &mut impl Read) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        reader
            .read_exact(&mut byte)
            .map_err(|_| header_error("unterminated string field".to_string()))?;
        if byte[0] == 0 {
            return Ok(out);
        }
        out.push(byte[0]);
    }
}

/// Ordered compressor invocations that could have produced this header
pub fn candidates(header: &GzHeader) -> Vec<Vec<String>> {
    let mut base = Vec::new();
    if header.filename.is_none() {
        base.push("-n".to_string());
        if header.mtime != 0 {
            base.push("-M".to_string());
        }
    }
    match header.extra_flags {
        XFL_BEST => base.push("-9".to_string()),
        XFL_FAST => base.push("-1".to_string()),
        _ => {}
    }

    let mut out = Vec::new();
    if header.os == OS_UNIX {
        let mut gnu = vec!["--gnu".to_string()];
        gnu.extend(base.iter().cloned());
        out.push(gnu.clone());
        let mut rsyncable = gnu;
        rsyncable.push("--rsyncable".to_string());
        out.push(rsyncable);
    }

    let mut bsd = base.clone();
    bsd.extend(["--osflag".to_string(), header.os.to_string()]);
    out.push(bsd.clone());

    let mut buggy = bsd;
    buggy.extend(["--quirk".to_string(), "buggy-bsd".to_string()]);
    out.push(buggy);

    if header.os == OS_NTFS {
        let mut ntfs = base;
        ntfs.extend([
            "--osflag".to_string(),
            "11".to_string(),
            "--quirk".to_string(),
            "ntfs".to_string(),
        ]);
        out.push(ntfs);
    }

    out
}

/// Full argument list for one invocation: stored params plus the name and
/// timestamp fields, which travel outside the params
fn invocation_args(params: &[String], filename: Option<&[u8]>, timestamp: Option<u32>) -> Vec<OsString> {
    let mut args: Vec<OsString> = params.iter().map(OsString::from).collect();
    if let Some(name) = filename {
        if !name.is_empty() {
            args.push(OsString::from("--original-name"));
            args.push(OsString::from_vec(name.to_vec()));
        }
    }
    if let Some(seconds) = timestamp {
        if seconds != 0 {
            args.push(OsString::from("--timestamp"));
            args.push(OsString::from(seconds.to_string()));
        }
    }
    args
}

/// Work out how `pristine` was compressed from `plaintext`
pub fn identify(
    pristine: &Path,
    plaintext: &Path,
    scratch: &Path,
    _options: &Options,
) -> Result<WrapperDelta> {
    let header = GzHeader::parse_file(pristine)?;
    let sha1sum = delta::sha1_base64(pristine)?;
    let candidates = candidates(&header);

    let wrapper = |params: &[String], patch: Option<Vec<u8>>| WrapperDelta {
        kind: WrapperKind::Gz,
        params: params.to_vec(),
        program: None,
        filename: Some(header.filename.clone().unwrap_or_default()),
        timestamp: Some(header.mtime),
        sha1sum: Some(sha1sum.clone()),
        patch,
    };

    for params in &candidates {
        let args = invocation_args(params, header.filename.as_deref(), Some(header.mtime));
        if process::filter_matches(PROGRAM, &args, plaintext, pristine)? {
            tracing::debug!("gz reproduced by: {} {}", PROGRAM, params.join(" "));
            return Ok(wrapper(params, None));
        }
    }

    // No invocation is exact. Materialise every candidate's output and keep
    // the one whose patch against the pristine file is smallest; earlier
    // candidates win ties.
    tracing::debug!("no exact gz invocation, falling back to a residual patch");
    let pristine_size = std::fs::metadata(pristine)?.len();
    let mut best: Option<(usize, u64)> = None;
    for (index, params) in candidates.iter().enumerate() {
        let output = scratch.join(format!("candidate-{}.gz", index));
        let args = invocation_args(params, header.filename.as_deref(), Some(header.mtime));
        if process::run_filter(PROGRAM, &args, plaintext, &output, &[0]).is_err() {
            continue;
        }
        let patch_file = scratch.join(format!("candidate-{}.patch", index));
        patch::diff(&output, pristine, &patch_file)?;
        let size = std::fs::metadata(&patch_file)?.len();
        if best.map_or(true, |(_, smallest)| size < smallest) {
            best = Some((index, size));
        }
    }

    let (index, patch_size) = best.ok_or_else(|| RetarError::ReproductionFailure(
        "no gz candidate invocation could be completed".to_string(),
    ))?;
    if patch_size >= pristine_size {
        tracing::warn!("storing entire file in delta");
    } else if patch_size * 10 > pristine_size {
        tracing::warn!(
            "residual patch is {}% of the original file",
            patch_size * 100 / pristine_size.max(1)
        );
    }
    let patch_bytes = std::fs::read(scratch.join(format!("candidate-{}.patch", index)))?;
    Ok(wrapper(&candidates[index], Some(patch_bytes)))
}

/// Recreate the compressed file described by `wrapper` from `plaintext`
pub fn reproduce(
    wrapper: &WrapperDelta,
    plaintext: &Path,
    output: &Path,
    scratch: &Path,
    _options: &Options,
) -> Result<()> {
    delta::validate_gz_params(&wrapper.params)?;

    let staged = scratch.join("recompressed.gz");
    let args = invocation_args(&wrapper.params, wrapper.filename.as_deref(), wrapper.timestamp);
    process::run_filter(PROGRAM, &args, plaintext, &staged, &[0])?;

    let finished = match &wrapper.patch {
        None => staged,
        Some(patch_bytes) => {
            let patch_file = scratch.join("wrapper.patch");
            std::fs::write(&patch_file, patch_bytes)?;
            let patched = scratch.join("patched.gz");
            patch::apply(&staged, &patch_file, &patched)?;
            patched
        }
    };

    if let Some(expected) = &wrapper.sha1sum {
        delta::verify_sha1(&finished, expected)?;
    }
    crate::archive::place(&finished, output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(flags: u8, mtime: u32, xfl: u8, os: u8, name: &[u8]) -> Vec<u8> {
        let mut out = vec![0x1f, 0x8b, 0x08, flags];
        out.extend_from_slice(&mtime.to_le_bytes());
        out.push(xfl);
        out.push(os);
        if flags & FNAME != 0 {
            out.extend_from_slice(name);
            out.push(0);
        }
        out
    }

    #[test]
    fn test_parse_minimal_header() {
        let bytes = header_bytes(0, 0, 0, OS_UNIX, b"");
        let header = GzHeader::read(&mut bytes.as_slice()).unwrap();
        assert_eq!(header.mtime, 0);
        assert_eq!(header.os, OS_UNIX);
        assert!(header.filename.is_none());
    }

    #[test]
    fn test_parse_header_with_name() {
        let bytes = header_bytes(FNAME, 1_600_000_000, XFL_BEST, OS_UNIX, b"pkg-1.0.tar");
        let header = GzHeader::read(&mut bytes.as_slice()).unwrap();
        assert_eq!(header.mtime, 1_600_000_000);
        assert_eq!(header.extra_flags, XFL_BEST);
        assert_eq!(header.filename.as_deref(), Some(b"pkg-1.0.tar".as_slice()));
    }

    #[test]
    fn test_parse_header_with_extra_comment_crc() {
        let mut bytes = vec![0x1f, 0x8b, 0x08, FEXTRA | FNAME | FCOMMENT | FHCRC];
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.push(0);
        bytes.push(OS_UNIX);
        bytes.extend_from_slice(&3u16.to_le_bytes());
        bytes.extend_from_slice(b"xyz");
        bytes.extend_from_slice(b"name\0");
        bytes.extend_from_slice(b"a comment\0");
        bytes.extend_from_slice(&[0xab, 0xcd]);

        let header = GzHeader::read(&mut bytes.as_slice()).unwrap();
        assert_eq!(header.filename.as_deref(), Some(b"name".as_slice()));
    }

    #[test]
    fn test_parse_rejects_bad_magic() {
        let err = GzHeader::read(&mut [0u8; 10].as_slice()).unwrap_err();
        assert!(err.to_string().contains("not a valid gzip archive"));
    }

    #[test]
    fn test_parse_rejects_truncation() {
        let err = GzHeader::read(&mut [0x1f, 0x8b].as_slice()).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_candidates_gnu_first_on_unix() {
        let header = GzHeader {
            mtime: 0,
            extra_flags: 0,
            os: OS_UNIX,
            filename: None,
        };
        let candidates = candidates(&header);
        assert_eq!(candidates[0], vec!["--gnu", "-n"]);
        assert_eq!(candidates[1], vec!["--gnu", "-n", "--rsyncable"]);
        assert_eq!(candidates[2], vec!["-n", "--osflag", "3"]);
        assert_eq!(
            candidates[3],
            vec!["-n", "--osflag", "3", "--quirk", "buggy-bsd"]
        );
        assert_eq!(candidates.len(), 4);
    }

    #[test]
    fn test_candidates_mtime_and_level() {
        let header = GzHeader {
            mtime: 12345,
            extra_flags: XFL_BEST,
            os: OS_UNIX,
            filename: None,
        };
        let candidate_list = candidates(&header);
        assert_eq!(candidate_list[0], vec!["--gnu", "-n", "-M", "-9"]);

        let header = GzHeader {
            mtime: 12345,
            extra_flags: XFL_FAST,
            os: OS_UNIX,
            filename: Some(b"a".to_vec()),
        };
        // A stored name means the header carries name and time natively.
        assert_eq!(candidates(&header)[0], vec!["--gnu", "-1"]);
    }

    #[test]
    fn test_candidates_ntfs_quirk() {
        let header = GzHeader {
            mtime: 0,
            extra_flags: 0,
            os: OS_NTFS,
            filename: Some(b"a.tar".to_vec()),
        };
        let candidates = candidates(&header);
        // Not Unix, so no GNU variants; the ntfs quirk comes last.
        assert_eq!(candidates[0], vec!["--osflag", "11"]);
        assert_eq!(
            candidates.last().unwrap(),
            &vec!["--osflag", "11", "--quirk", "ntfs"]
        );
    }

    #[test]
    fn test_invocation_args_carry_name_and_time() {
        let params = vec!["-9".to_string()];
        let args = invocation_args(&params, Some(b"orig.tar"), Some(77));
        let rendered: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(
            rendered,
            vec!["-9", "--original-name", "orig.tar", "--timestamp", "77"]
        );

        let args = invocation_args(&params, Some(b""), Some(0));
        assert_eq!(args.len(), 1);
    }
}
