//! The genflat and unflat commands
//!
//! Standalone surface for the flat wrapper encoding: one compressed file
//! in, one self-contained flat blob out, and back again.

use std::path::Path;

use anyhow::{bail, Context, Result};
use colored::Colorize;

use crate::archive::{self, CompressionKind};
use crate::bzip2;
use crate::config::Options;
use crate::delta::WrapperKind;
use crate::flat;
use crate::gzip;
use crate::scratch::Scratch;

pub fn genflat(input: &Path, output: &Path, options: &Options) -> Result<()> {
    let scratch = Scratch::new(options.keep_scratch)?;
    let kind = CompressionKind::detect(input)?;
    if kind == CompressionKind::None {
        bail!("{} is not a gz or bz2 file", input.display());
    }

    let plaintext = scratch.file("plaintext");
    archive::decompress(kind, input, &plaintext)?;

    let wrapper_scratch = scratch.subdir("wrapper")?;
    let wrapper = match kind {
        CompressionKind::Gzip => gzip::identify(input, &plaintext, &wrapper_scratch, options)?,
        CompressionKind::Bzip2 => bzip2::identify(input, &plaintext, &wrapper_scratch, options)?,
        CompressionKind::None => unreachable!(),
    };

    let plain_bytes = std::fs::read(&plaintext)?;
    let encoded = flat::encode(&wrapper, &plain_bytes)?;
    std::fs::write(output, &encoded)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("{} {}", "Flattened to".green().bold(), output.display());
    Ok(())
}

pub fn unflat(input: &Path, output: &Path, options: &Options) -> Result<()> {
    let data = std::fs::read(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let (wrapper, plaintext) = flat::decode(&data)?;

    let scratch = Scratch::new(options.keep_scratch)?;
    let plain_file = scratch.file("plaintext");
    std::fs::write(&plain_file, &plaintext)?;

    let wrapper_scratch = scratch.subdir("wrapper")?;
    match wrapper.kind {
        WrapperKind::Gz => gzip::reproduce(&wrapper, &plain_file, output, &wrapper_scratch, options)?,
        WrapperKind::Bz2 => {
            bzip2::reproduce(&wrapper, &plain_file, output, &wrapper_scratch, options)?
        }
    }

    println!("{} {}", "Reproduced".green().bold(), output.display());
    Ok(())
}
