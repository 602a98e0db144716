//! git-backed delta storage
//!
//! Deltas and their tree-id sidecars live as blobs on a dedicated branch,
//! one commit per stored archive. Everything goes through git plumbing
//! subprocesses; the branch may exist locally or on exactly one remote,
//! and an ambiguous name is reported with its candidates instead of
//! guessing.

use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};

use crate::error::RetarError;
use crate::process;

/// Delta storage on a git branch
pub struct Repository {
    git_dir: PathBuf,
    branch: String,
}

impl Repository {
    /// Open the repository surrounding the current directory
    pub fn open(branch: &str) -> Result<Self> {
        let out = process::run("git", &["rev-parse", "--absolute-git-dir"], None, &[0])
            .map_err(|_| RetarError::RepositoryLookup("not inside a git repository".to_string()))?;
        let git_dir = PathBuf::from(String::from_utf8_lossy(&out).trim());
        Ok(Self {
            git_dir,
            branch: branch.to_string(),
        })
    }

    fn git(&self, args: &[&str]) -> Vec<OsString> {
        let mut full: Vec<OsString> = vec!["--git-dir".into(), self.git_dir.as_os_str().into()];
        full.extend(args.iter().map(OsString::from));
        full
    }

    fn run_git(
        &self,
        args: &[&str],
        envs: &[(&str, &OsStr)],
        stdin: Option<&Path>,
    ) -> Result<Vec<u8>> {
        let mut cmd = process::command("git", &self.git(args));
        for (key, value) in envs {
            cmd.env(key, value);
        }
        if let Some(path) = stdin {
            let file =
                File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
            cmd.stdin(Stdio::from(file));
        }
        let output = cmd.output().context("Failed to run git")?;
        process::finish_output("git", output, &[0])
    }

    pub fn local_branch_exists(&self) -> Result<bool> {
        let reference = format!("refs/heads/{}", self.branch);
        let status = process::command("git", &self.git(&["show-ref", "--verify", "--quiet", &reference]))
            .status()
            .context("Failed to run git")?;
        Ok(status.success())
    }

    fn remote_branches(&self) -> Result<Vec<String>> {
        let pattern = format!("refs/remotes/*/{}", self.branch);
        let out = self.run_git(&["for-each-ref", "--format=%(refname)", &pattern], &[], None)?;
        Ok(String::from_utf8_lossy(&out)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    /// The ref deltas are read from: the local branch when it exists,
    /// otherwise the single remote-tracking branch of that name
    pub fn resolve_branch(&self) -> Result<String> {
        let local_exists = self.local_branch_exists()?;
        let remotes = if local_exists {
            Vec::new()
        } else {
            self.remote_branches()?
        };
        pick_branch(&self.branch, local_exists, &remotes)
    }

    /// Resolve any revision to a tree id
    pub fn resolve_tree(&self, reference: &str) -> Result<String> {
        let spec = format!("{}^{{tree}}", reference);
        let out = self
            .run_git(&["rev-parse", "--verify", &spec], &[], None)
            .map_err(|_| {
                RetarError::RepositoryLookup(format!("cannot resolve {} to a tree", reference))
            })?;
        Ok(String::from_utf8_lossy(&out).trim().to_string())
    }

    /// Read the blob at `path` on the delta branch
    pub fn read_blob(&self, path: &str) -> Result<Vec<u8>> {
        let branch = self.resolve_branch()?;
        let spec = format!("{}:{}", branch, path);
        self.run_git(&["cat-file", "blob", &spec], &[], None)
            .map_err(|_| RetarError::RepositoryLookup(format!("no stored blob at {}", spec)).into())
    }

    /// List blob names on the delta branch
    pub fn list(&self) -> Result<Vec<String>> {
        let branch = self.resolve_branch()?;
        let out = self.run_git(&["ls-tree", "--name-only", &branch], &[], None)?;
        Ok(String::from_utf8_lossy(&out)
            .lines()
            .map(String::from)
            .collect())
    }

    /// Materialise a tree snapshot into `dest`
    pub fn export_tree(&self, tree: &str, dest: &Path) -> Result<()> {
        std::fs::create_dir_all(dest)?;
        let args = self.git(&["archive", "--format=tar", tree]);
        let (mut guard, stdout) = process::spawn_reader("git", &args, None)?;
        let mut archive = tar::Archive::new(stdout);
        archive.set_preserve_permissions(true);
        archive
            .unpack(dest)
            .with_context(|| format!("Failed to materialise tree {}", tree))?;
        guard.finish(&[0])
    }

    /// Build a tree id for the contents of `dir` through a temporary index
    pub fn tree_of_directory(&self, dir: &Path, scratch: &Path) -> Result<String> {
        let index = scratch.join("tree-index");
        let envs: &[(&str, &OsStr)] = &[
            ("GIT_INDEX_FILE", index.as_os_str()),
            ("GIT_WORK_TREE", dir.as_os_str()),
        ];
        let mut cmd = process::command("git", &self.git(&["add", "--all", "--force", "."]));
        for (key, value) in envs {
            cmd.env(key, value);
        }
        cmd.current_dir(dir);
        let output = cmd.output().context("Failed to run git")?;
        process::finish_output("git", output, &[0])?;

        let out = self.run_git(&["write-tree"], &[("GIT_INDEX_FILE", index.as_os_str())], None)?;
        Ok(String::from_utf8_lossy(&out).trim().to_string())
    }

    /// Store blobs on the delta branch in a single commit
    pub fn write_blobs(
        &self,
        blobs: &[(String, Vec<u8>)],
        message: &str,
        scratch: &Path,
    ) -> Result<()> {
        let index = scratch.join("delta-index");
        let index_env: &[(&str, &OsStr)] = &[("GIT_INDEX_FILE", index.as_os_str())];

        let parent = if self.local_branch_exists()? {
            Some(format!("refs/heads/{}", self.branch))
        } else {
            None
        };
        match &parent {
            Some(branch) => self.run_git(&["read-tree", branch], index_env, None)?,
            None => self.run_git(&["read-tree", "--empty"], index_env, None)?,
        };

        for (path, data) in blobs {
            let blob_file = scratch.join("blob");
            std::fs::write(&blob_file, data)?;
            let out = self.run_git(&["hash-object", "-w", "--stdin"], &[], Some(&blob_file))?;
            let blob = String::from_utf8_lossy(&out).trim().to_string();
            let cacheinfo = format!("100644,{},{}", blob, path);
            self.run_git(&["update-index", "--add", "--cacheinfo", &cacheinfo], index_env, None)?;
        }

        let out = self.run_git(&["write-tree"], index_env, None)?;
        let tree = String::from_utf8_lossy(&out).trim().to_string();

        let mut commit_args = vec!["commit-tree", tree.as_str(), "-m", message];
        if let Some(branch) = &parent {
            commit_args.push("-p");
            commit_args.push(branch.as_str());
        }
        let out = self.run_git(&commit_args, &[], None)?;
        let commit = String::from_utf8_lossy(&out).trim().to_string();

        let reference = format!("refs/heads/{}", self.branch);
        self.run_git(&["update-ref", &reference, &commit], &[], None)?;
        tracing::info!("stored {} blob(s) on {}", blobs.len(), self.branch);
        Ok(())
    }
}

/// Decide which ref a branch name denotes: local wins, otherwise exactly
/// one remote-tracking branch; zero or several is a lookup failure naming
/// the candidates
fn pick_branch(branch: &str, local_exists: bool, remotes: &[String]) -> Result<String> {
    if local_exists {
        return Ok(format!("refs/heads/{}", branch));
    }
    match remotes {
        [] => Err(RetarError::RepositoryLookup(format!(
            "no branch named {} exists locally or on any remote",
            branch
        ))
        .into()),
        [single] => Ok(single.clone()),
        many => Err(RetarError::RepositoryLookup(format!(
            "branch {} is ambiguous, candidates: {}",
            branch,
            many.join(", ")
        ))
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remotes(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn test_pick_branch_prefers_local() {
        let resolved = pick_branch(
            "retar",
            true,
            &remotes(&["refs/remotes/origin/retar"]),
        )
        .unwrap();
        assert_eq!(resolved, "refs/heads/retar");
    }

    #[test]
    fn test_pick_branch_single_remote() {
        let resolved = pick_branch("retar", false, &remotes(&["refs/remotes/origin/retar"]))
            .unwrap();
        assert_eq!(resolved, "refs/remotes/origin/retar");
    }

    #[test]
    fn test_pick_branch_missing_everywhere() {
        let err = pick_branch("retar", false, &[]).unwrap_err();
        assert!(err.to_string().contains("no branch named retar"));
    }

    #[test]
    fn test_pick_branch_ambiguous_lists_candidates() {
        let err = pick_branch(
            "retar",
            false,
            &remotes(&["refs/remotes/origin/retar", "refs/remotes/mirror/retar"]),
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("ambiguous"));
        assert!(message.contains("refs/remotes/origin/retar"));
        assert!(message.contains("refs/remotes/mirror/retar"));
    }
}
