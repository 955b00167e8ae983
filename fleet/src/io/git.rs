//! Git adapter for workspace isolation.
//!
//! Worker workspaces are git worktrees, so this wraps the handful of `git`
//! subprocess calls the daemon needs: worktree listing, creation, removal and
//! a dirtiness check.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    pub path: String,
}

/// One record of `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    /// Short branch name; `None` for detached or bare entries.
    pub branch: Option<String>,
    pub head: Option<String>,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Return the current branch name (errors on detached HEAD).
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            return Err(anyhow!("detached HEAD"));
        }
        Ok(name)
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        out.lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_status_line)
            .collect()
    }

    /// True if the working tree has staged, unstaged or untracked changes.
    pub fn has_uncommitted_changes(&self) -> Result<bool> {
        Ok(!self.status_porcelain()?.is_empty())
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    /// List worktrees registered with this repository.
    pub fn worktree_list(&self) -> Result<Vec<WorktreeEntry>> {
        let out = self.run_capture(&["worktree", "list", "--porcelain"])?;
        Ok(parse_worktree_list(&out))
    }

    /// Add a worktree at `path` for `branch`, creating the branch from `base`
    /// when it does not exist yet.
    #[instrument(skip_all, fields(branch, path = %path.display()))]
    pub fn worktree_add(&self, path: &Path, branch: &str, base: &str) -> Result<()> {
        let path_arg = path.to_string_lossy();
        if self.branch_exists(branch)? {
            debug!("adding worktree for existing branch");
            self.run_checked(&["worktree", "add", &path_arg, branch])?;
        } else {
            debug!(base, "adding worktree with new branch");
            self.run_checked(&["worktree", "add", "-b", branch, &path_arg, base])?;
        }
        Ok(())
    }

    /// Remove a clean worktree and prune stale metadata.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn worktree_remove(&self, path: &Path) -> Result<()> {
        let path_arg = path.to_string_lossy();
        self.run_checked(&["worktree", "remove", &path_arg])?;
        self.run_checked(&["worktree", "prune"])?;
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

/// Records are blank-line separated `key value` lines.
fn parse_worktree_list(out: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;
    for line in out.lines() {
        if line.trim().is_empty() {
            entries.extend(current.take());
            continue;
        }
        let (key, value) = line.split_once(' ').unwrap_or((line, ""));
        match key {
            "worktree" => {
                entries.extend(current.take());
                current = Some(WorktreeEntry {
                    path: PathBuf::from(value),
                    branch: None,
                    head: None,
                });
            }
            "HEAD" => {
                if let Some(entry) = current.as_mut() {
                    entry.head = Some(value.to_string());
                }
            }
            "branch" => {
                if let Some(entry) = current.as_mut() {
                    let short = value.strip_prefix("refs/heads/").unwrap_or(value);
                    entry.branch = Some(short.to_string());
                }
            }
            _ => {}
        }
    }
    entries.extend(current);
    entries
}
