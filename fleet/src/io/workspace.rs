//! Workspace isolation: one branch plus one directory per worker.
//!
//! Workspaces are git worktrees under the configured worktree directory. The
//! [`Vcs`] trait is the seam; [`GitVcs`] is the real implementation and tests
//! substitute a fake.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::graph::Worker;
use crate::io::git::Git;

/// Parameters for [`Vcs::create_or_reuse_workspace`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceRequest {
    pub branch: String,
    pub path: PathBuf,
    /// Branch to fork from when `branch` does not exist.
    pub base: String,
    /// Integrators may reuse a checkout of their branch wherever it lives.
    pub shared: bool,
}

/// What the VCS did for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceOutcome {
    Created(PathBuf),
    Reused(PathBuf),
}

/// Version-control operations the daemon needs.
pub trait Vcs {
    fn create_or_reuse_workspace(&self, request: &WorkspaceRequest) -> Result<WorkspaceOutcome>;
    fn has_uncommitted_changes(&self, path: &Path) -> Result<bool>;
    fn remove_workspace(&self, path: &Path) -> Result<()>;
}

/// [`Vcs`] backed by `git worktree` in the project repository.
#[derive(Debug, Clone)]
pub struct GitVcs {
    git: Git,
}

impl GitVcs {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            git: Git::new(repo_root),
        }
    }
}

impl Vcs for GitVcs {
    #[instrument(skip_all, fields(branch = %request.branch))]
    fn create_or_reuse_workspace(&self, request: &WorkspaceRequest) -> Result<WorkspaceOutcome> {
        let worktrees = self.git.worktree_list()?;

        if let Some(existing) = worktrees
            .iter()
            .find(|w| w.branch.as_deref() == Some(request.branch.as_str()))
        {
            if same_path(&existing.path, &request.path) {
                debug!("reusing own worktree");
                return Ok(WorkspaceOutcome::Reused(request.path.clone()));
            }
            if request.shared {
                debug!(path = %existing.path.display(), "reusing shared checkout");
                return Ok(WorkspaceOutcome::Reused(existing.path.clone()));
            }
            return Err(anyhow!(
                "branch '{}' is already checked out at {}",
                request.branch,
                existing.path.display()
            ));
        }

        if let Some(occupant) = worktrees.iter().find(|w| same_path(&w.path, &request.path)) {
            return Err(anyhow!(
                "{} is a worktree for {}",
                request.path.display(),
                occupant.branch.as_deref().unwrap_or("a detached HEAD")
            ));
        }
        if request.path.exists() {
            return Err(anyhow!("{} already exists", request.path.display()));
        }
        if let Some(parent) = request.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }

        self.git
            .worktree_add(&request.path, &request.branch, &request.base)?;
        Ok(WorkspaceOutcome::Created(request.path.clone()))
    }

    fn has_uncommitted_changes(&self, path: &Path) -> Result<bool> {
        Git::new(path).has_uncommitted_changes()
    }

    fn remove_workspace(&self, path: &Path) -> Result<()> {
        self.git.worktree_remove(path)
    }
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// A worker's materialized workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceHandle {
    pub worker_id: String,
    pub branch: String,
    pub path: PathBuf,
    /// False when an existing workspace was reused.
    pub created: bool,
}

/// The worker's branch or directory is held by something else.
#[derive(Debug, Clone, Error)]
#[error("workspace conflict for worker '{worker_id}' on branch '{branch}': {cause}")]
pub struct WorkspaceConflictError {
    pub worker_id: String,
    pub branch: String,
    pub cause: String,
}

/// Result of reclaiming a workspace at phase close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReclaimOutcome {
    Removed,
    Retained { reason: String },
    AlreadyGone,
}

/// Creates and reclaims worker workspaces.
#[derive(Debug, Clone)]
pub struct WorkspaceManager<V> {
    vcs: V,
    worktree_dir: PathBuf,
    base_branch: String,
}

impl<V: Vcs> WorkspaceManager<V> {
    /// `worktree_dir` is absolute; each worker gets `worktree_dir/<id>`.
    pub fn new(vcs: V, worktree_dir: impl Into<PathBuf>, base_branch: impl Into<String>) -> Self {
        Self {
            vcs,
            worktree_dir: worktree_dir.into(),
            base_branch: base_branch.into(),
        }
    }

    pub fn vcs(&self) -> &V {
        &self.vcs
    }

    pub fn workspace_path(&self, worker: &Worker) -> PathBuf {
        self.worktree_dir.join(&worker.id)
    }

    /// Create the worker's workspace or reuse the one that already exists.
    #[instrument(skip_all, fields(worker = %worker.id))]
    pub fn ensure_workspace(
        &self,
        worker: &Worker,
    ) -> Result<WorkspaceHandle, WorkspaceConflictError> {
        let request = WorkspaceRequest {
            branch: worker.branch.clone(),
            path: self.workspace_path(worker),
            base: self.base_branch.clone(),
            shared: worker.is_integrator(),
        };
        let outcome = self
            .vcs
            .create_or_reuse_workspace(&request)
            .map_err(|err| WorkspaceConflictError {
                worker_id: worker.id.clone(),
                branch: worker.branch.clone(),
                cause: format!("{err:#}"),
            })?;
        let (path, created) = match outcome {
            WorkspaceOutcome::Created(path) => {
                info!(path = %path.display(), "workspace created");
                (path, true)
            }
            WorkspaceOutcome::Reused(path) => {
                info!(path = %path.display(), "workspace reused");
                (path, false)
            }
        };
        Ok(WorkspaceHandle {
            worker_id: worker.id.clone(),
            branch: worker.branch.clone(),
            path,
            created,
        })
    }

    /// Remove a worker's workspace unless that would lose work.
    ///
    /// Dirty workspaces and shared checkouts outside the worktree directory
    /// are retained.
    #[instrument(skip_all, fields(worker = %worker.id, path = %path.display()))]
    pub fn reclaim(&self, worker: &Worker, path: &Path) -> Result<ReclaimOutcome> {
        if !path.exists() {
            debug!("workspace already gone");
            return Ok(ReclaimOutcome::AlreadyGone);
        }
        if !path.starts_with(&self.worktree_dir) {
            let reason = format!("shared checkout {} is not owned by fleet", path.display());
            warn!(%reason, "retaining workspace");
            return Ok(ReclaimOutcome::Retained { reason });
        }
        if self.vcs.has_uncommitted_changes(path)? {
            let reason = "workspace has uncommitted changes".to_string();
            warn!(%reason, "retaining workspace");
            return Ok(ReclaimOutcome::Retained { reason });
        }
        self.vcs.remove_workspace(path)?;
        info!("workspace removed");
        Ok(ReclaimOutcome::Removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::git::Git;
    use crate::test_support::{TestRepo, contributor, integrator};

    fn manager(repo: &TestRepo) -> WorkspaceManager<GitVcs> {
        WorkspaceManager::new(
            GitVcs::new(repo.path()),
            repo.path().join(".fleet/worktrees"),
            "main",
        )
    }

    #[test]
    fn ensure_creates_then_reuses() {
        let repo = TestRepo::new().expect("repo");
        let manager = manager(&repo);
        let worker = contributor("api", 1, &[]);

        let first = manager.ensure_workspace(&worker).expect("create");
        assert!(first.created);
        assert!(first.path.join("README.md").is_file());
        assert_eq!(
            Git::new(&first.path).current_branch().expect("branch"),
            "fleet/api"
        );

        let second = manager.ensure_workspace(&worker).expect("reuse");
        assert!(!second.created);
        assert!(same_path(&first.path, &second.path));
    }

    #[test]
    fn branch_checked_out_elsewhere_is_a_conflict() {
        let repo = TestRepo::new().expect("repo");
        let other = repo.path().join("elsewhere");
        Git::new(repo.path())
            .worktree_add(&other, "fleet/api", "main")
            .expect("add worktree");

        let err = manager(&repo)
            .ensure_workspace(&contributor("api", 1, &[]))
            .unwrap_err();
        assert_eq!(err.worker_id, "api");
        assert!(err.cause.contains("already checked out"));
    }

    #[test]
    fn integrator_reuses_protected_checkout() {
        let repo = TestRepo::new().expect("repo");
        let manager = manager(&repo);
        let worker = integrator("merge", 2, &[]);
        let handle = manager.ensure_workspace(&worker).expect("reuse main");
        assert!(!handle.created);
        assert!(same_path(&handle.path, repo.path()));

        let outcome = manager.reclaim(&worker, &handle.path).expect("reclaim");
        assert!(matches!(outcome, ReclaimOutcome::Retained { .. }));
        assert!(repo.path().join("README.md").is_file());
    }

    #[test]
    fn reclaim_removes_clean_and_retains_dirty() {
        let repo = TestRepo::new().expect("repo");
        let manager = manager(&repo);
        let clean = contributor("clean", 1, &[]);
        let dirty = contributor("dirty", 1, &[]);
        let clean_ws = manager.ensure_workspace(&clean).expect("clean");
        let dirty_ws = manager.ensure_workspace(&dirty).expect("dirty");
        fs::write(dirty_ws.path.join("wip.txt"), "unsaved").expect("write");

        assert_eq!(
            manager.reclaim(&clean, &clean_ws.path).expect("reclaim"),
            ReclaimOutcome::Removed
        );
        assert!(!clean_ws.path.exists());

        let outcome = manager.reclaim(&dirty, &dirty_ws.path).expect("reclaim");
        assert!(matches!(outcome, ReclaimOutcome::Retained { .. }));
        assert!(dirty_ws.path.join("wip.txt").is_file());

        assert_eq!(
            manager.reclaim(&clean, &clean_ws.path).expect("reclaim"),
            ReclaimOutcome::AlreadyGone
        );
    }
}
