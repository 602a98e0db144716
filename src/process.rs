//! Child process plumbing
//!
//! Every external tool is spawned through here so that all children run
//! under the C locale (archive member names must pass through untouched)
//! and are reaped on every exit path. The compare filter implements the
//! streaming candidate check: a compressor's stdout is matched byte for
//! byte against a reference file and the child is killed at the first
//! difference instead of running to completion.

use std::ffi::OsStr;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, ExitStatus, Output, Stdio};

use anyhow::{Context, Result};

use crate::error::RetarError;

const COMPARE_CHUNK: usize = 64 * 1024;

/// Build a command with the subprocess environment contract applied
pub fn command<S: AsRef<OsStr>>(program: &str, args: &[S]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.env("LC_ALL", "C");
    cmd.env("LANG", "C");
    cmd
}

/// Child wrapper that kills and reaps the process on drop
///
/// The early-kill path of the candidate search relies on this: returning
/// from the comparator with the child still running must not leak it.
pub struct ChildGuard {
    child: Child,
    program: String,
}

impl ChildGuard {
    pub fn new(child: Child, program: &str) -> Self {
        Self {
            child,
            program: program.to_string(),
        }
    }

    /// Take the piped stdout handle
    pub fn stdout(&mut self) -> Result<ChildStdout> {
        self.child
            .stdout
            .take()
            .with_context(|| format!("{} stdout was not piped", self.program))
    }

    /// Wait for the child to exit
    pub fn wait(&mut self) -> Result<ExitStatus> {
        self.child
            .wait()
            .with_context(|| format!("Failed to wait for {}", self.program))
    }

    /// Wait and require the exit status to be in `ok_codes`
    pub fn finish(&mut self, ok_codes: &[i32]) -> Result<()> {
        let status = self.wait()?;
        check_status(&self.program, status, ok_codes)
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            tracing::trace!("killing {}", self.program);
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn status_ok(status: ExitStatus, ok_codes: &[i32]) -> bool {
    match status.code() {
        Some(code) => ok_codes.contains(&code),
        None => false,
    }
}

fn check_status(program: &str, status: ExitStatus, ok_codes: &[i32]) -> Result<()> {
    if status_ok(status, ok_codes) {
        return Ok(());
    }
    Err(RetarError::SubprocessFailure {
        program: program.to_string(),
        status: status.to_string(),
    }
    .into())
}

/// Turn a completed `Output` into its stdout, checking the exit status
pub fn finish_output(program: &str, output: Output, ok_codes: &[i32]) -> Result<Vec<u8>> {
    if status_ok(output.status, ok_codes) {
        return Ok(output.stdout);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let status = if stderr.trim().is_empty() {
        output.status.to_string()
    } else {
        format!("{} ({})", output.status, stderr.trim())
    };
    Err(RetarError::SubprocessFailure {
        program: program.to_string(),
        status,
    }
    .into())
}

/// Run a command to completion and return its stdout
pub fn run<S: AsRef<OsStr>>(
    program: &str,
    args: &[S],
    cwd: Option<&Path>,
    ok_codes: &[i32],
) -> Result<Vec<u8>> {
    let mut cmd = command(program, args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let output = cmd
        .output()
        .with_context(|| format!("Failed to run {}", program))?;
    finish_output(program, output, ok_codes)
}

/// Run a filter with stdin from one file and stdout into another
pub fn run_filter<S: AsRef<OsStr>>(
    program: &str,
    args: &[S],
    stdin: &Path,
    stdout: &Path,
    ok_codes: &[i32],
) -> Result<()> {
    let input =
        File::open(stdin).with_context(|| format!("Failed to open {}", stdin.display()))?;
    let output =
        File::create(stdout).with_context(|| format!("Failed to create {}", stdout.display()))?;
    let child = command(program, args)
        .stdin(Stdio::from(input))
        .stdout(Stdio::from(output))
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to run {}", program))?;
    ChildGuard::new(child, program).finish(ok_codes)
}

/// Spawn a command whose stdout the caller will stream
pub fn spawn_reader<S: AsRef<OsStr>>(
    program: &str,
    args: &[S],
    cwd: Option<&Path>,
) -> Result<(ChildGuard, ChildStdout)> {
    let mut cmd = command(program, args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let child = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to run {}", program))?;
    let mut guard = ChildGuard::new(child, program);
    let stdout = guard.stdout()?;
    Ok((guard, stdout))
}

/// Spawn `program` as a filter reading `stdin` and compare its stdout
/// byte for byte against `reference`
///
/// Returns true only when the filter's output equals the reference exactly
/// and the child exits successfully. The child is killed at the first
/// mismatching byte.
pub fn filter_matches<S: AsRef<OsStr>>(
    program: &str,
    args: &[S],
    stdin: &Path,
    reference: &Path,
) -> Result<bool> {
    let input =
        File::open(stdin).with_context(|| format!("Failed to open {}", stdin.display()))?;
    let child = command(program, args)
        .stdin(Stdio::from(input))
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to run {}", program))?;
    let mut guard = ChildGuard::new(child, program);
    let mut produced = BufReader::new(guard.stdout()?);
    let mut expected = BufReader::new(
        File::open(reference).with_context(|| format!("Failed to open {}", reference.display()))?,
    );

    let mut prod_buf = vec![0u8; COMPARE_CHUNK];
    let mut want_buf = vec![0u8; COMPARE_CHUNK];
    loop {
        let n = produced.read(&mut prod_buf)?;
        if n == 0 {
            break;
        }
        let mut got = 0;
        while got < n {
            let m = expected.read(&mut want_buf[got..n])?;
            if m == 0 {
                // Candidate produced more bytes than the reference holds.
                return Ok(false);
            }
            got += m;
        }
        if prod_buf[..n] != want_buf[..n] {
            return Ok(false);
        }
    }
    if expected.read(&mut want_buf[..1])? != 0 {
        return Ok(false);
    }
    let status = guard.wait()?;
    Ok(status.success())
}
