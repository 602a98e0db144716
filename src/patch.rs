//! Wrapper around the external binary patch tool
//!
//! `xdelta delta` exits 0 when the inputs were identical and 1 when they
//! differed; both mean a usable patch was written. Any other status is
//! fatal. `xdelta patch` must be handed the exact pre-image the patch was
//! generated against; there is no fuzzy matching.

use std::ffi::OsString;
use std::path::Path;

use anyhow::Result;

use crate::process;

const XDELTA: &str = "xdelta";

/// Produce `patch` such that applying it to `pre` yields `post`
pub fn diff(pre: &Path, post: &Path, patch: &Path) -> Result<()> {
    let args: Vec<OsString> = vec![
        OsString::from("delta"),
        pre.into(),
        post.into(),
        patch.into(),
    ];
    // Exit status 1 is "inputs differed", which is the expected case.
    process::run(XDELTA, &args, None, &[0, 1])?;
    Ok(())
}

/// Apply `patch` to `pre`, writing `post`
pub fn apply(pre: &Path, patch: &Path, post: &Path) -> Result<()> {
    let args: Vec<OsString> = vec![
        OsString::from("patch"),
        patch.into(),
        pre.into(),
        post.into(),
    ];
    process::run(XDELTA, &args, None, &[0])?;
    Ok(())
}
