//! Test helpers: graph builders, temporary git repositories and scripted
//! stand-ins for the agent runtime, version control and alert sink.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::rc::Rc;

use anyhow::{Context, Result, anyhow, bail};
use tempfile::TempDir;

use crate::core::graph::{GraphDefinition, Project, Worker};
use crate::core::types::Role;
use crate::io::alerts::{Alert, AlertSink};
use crate::io::session::{AgentRuntime, SessionHandle, Signal, StartRequest};
use crate::io::workspace::{Vcs, WorkspaceOutcome, WorkspaceRequest};

/// Graph definition for project `demo` with the given workers.
pub fn definition(workers: Vec<Worker>) -> GraphDefinition {
    GraphDefinition {
        project: Project {
            name: "Demo".to_string(),
            slug: "demo".to_string(),
            base_branch: "main".to_string(),
            protected_branches: vec!["main".to_string(), "master".to_string()],
        },
        workers,
    }
}

/// Contributor on branch `fleet/<id>`.
pub fn contributor(id: &str, phase: u32, deps: &[&str]) -> Worker {
    Worker {
        id: id.to_string(),
        role: Role::Contributor,
        branch: format!("fleet/{id}"),
        phase,
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
        agent: None,
        description: None,
    }
}

/// Integrator on `main`.
pub fn integrator(id: &str, phase: u32, deps: &[&str]) -> Worker {
    Worker {
        role: Role::Integrator,
        branch: "main".to_string(),
        ..contributor(id, phase, deps)
    }
}

/// A git repository on `main` with one commit, deleted on drop.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create tempdir")?;
        let repo = Self { dir };
        repo.git(&["init", "-q", "-b", "main"])?;
        repo.git(&["config", "user.email", "test@example.com"])?;
        repo.git(&["config", "user.name", "test"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        fs::write(repo.path().join("README.md"), "hi\n").context("write README")?;
        repo.git(&["add", "README.md"])?;
        repo.git(&["commit", "-q", "-m", "chore: init"])?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn git(&self, args: &[&str]) -> Result<String> {
        let out = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !out.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }
}

#[derive(Debug, Default)]
struct RuntimeInner {
    alive: BTreeSet<String>,
    outputs: BTreeMap<String, String>,
    after_ack: BTreeMap<String, String>,
    starts: BTreeMap<String, u32>,
    fail_start: BTreeSet<String>,
    fail_send: BTreeSet<String>,
    signals: Vec<(String, Signal)>,
    briefs: BTreeMap<String, PathBuf>,
    agents: BTreeMap<String, Option<String>>,
}

/// In-memory [`AgentRuntime`]. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRuntime {
    inner: Rc<RefCell<RuntimeInner>>,
}

impl ScriptedRuntime {
    /// Set the snapshot returned for a worker.
    pub fn set_output(&self, worker_id: &str, output: &str) {
        self.inner
            .borrow_mut()
            .outputs
            .insert(worker_id.to_string(), output.to_string());
    }

    /// Replace the worker's snapshot with `output` once it is acknowledged.
    pub fn clear_on_acknowledge(&self, worker_id: &str, output: &str) {
        self.inner
            .borrow_mut()
            .after_ack
            .insert(worker_id.to_string(), output.to_string());
    }

    pub fn set_alive(&self, worker_id: &str, alive: bool) {
        let mut inner = self.inner.borrow_mut();
        if alive {
            inner.alive.insert(worker_id.to_string());
        } else {
            inner.alive.remove(worker_id);
        }
    }

    pub fn fail_start(&self, worker_id: &str) {
        self.inner
            .borrow_mut()
            .fail_start
            .insert(worker_id.to_string());
    }

    pub fn fail_send(&self, worker_id: &str) {
        self.inner
            .borrow_mut()
            .fail_send
            .insert(worker_id.to_string());
    }

    pub fn start_count(&self, worker_id: &str) -> u32 {
        self.inner
            .borrow()
            .starts
            .get(worker_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_starts(&self) -> u32 {
        self.inner.borrow().starts.values().sum()
    }

    pub fn signals(&self, worker_id: &str) -> Vec<Signal> {
        self.inner
            .borrow()
            .signals
            .iter()
            .filter(|(id, _)| id == worker_id)
            .map(|(_, signal)| signal.clone())
            .collect()
    }

    pub fn brief_path(&self, worker_id: &str) -> Option<PathBuf> {
        self.inner.borrow().briefs.get(worker_id).cloned()
    }

    /// Agent label passed with the worker's last start.
    pub fn agent_for(&self, worker_id: &str) -> Option<String> {
        self.inner.borrow().agents.get(worker_id).cloned().flatten()
    }
}

fn scripted_id(handle: &SessionHandle) -> Result<&str> {
    handle
        .as_str()
        .strip_prefix("scripted:")
        .ok_or_else(|| anyhow!("foreign handle {}", handle.as_str()))
}

impl AgentRuntime for ScriptedRuntime {
    fn handle_for(&self, worker_id: &str) -> SessionHandle {
        SessionHandle(format!("scripted:{worker_id}"))
    }

    fn start(&self, request: &StartRequest<'_>) -> Result<SessionHandle> {
        let mut inner = self.inner.borrow_mut();
        if inner.fail_start.contains(request.worker_id) {
            bail!("scripted start failure");
        }
        let id = request.worker_id.to_string();
        *inner.starts.entry(id.clone()).or_insert(0) += 1;
        inner.alive.insert(id.clone());
        inner
            .agents
            .insert(id.clone(), request.agent.map(str::to_string));
        inner.briefs.insert(id, request.brief_path.to_path_buf());
        drop(inner);
        Ok(self.handle_for(request.worker_id))
    }

    fn is_alive(&self, handle: &SessionHandle) -> Result<bool> {
        Ok(self.inner.borrow().alive.contains(scripted_id(handle)?))
    }

    fn read_output(&self, handle: &SessionHandle) -> Result<String> {
        let id = scripted_id(handle)?;
        Ok(self
            .inner
            .borrow()
            .outputs
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    fn send_signal(&self, handle: &SessionHandle, signal: &Signal) -> Result<()> {
        let id = scripted_id(handle)?.to_string();
        let mut inner = self.inner.borrow_mut();
        inner.signals.push((id.clone(), signal.clone()));
        if inner.fail_send.contains(&id) {
            bail!("scripted send failure");
        }
        if *signal == Signal::Acknowledge
            && let Some(next) = inner.after_ack.remove(&id)
        {
            inner.outputs.insert(id, next);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct VcsInner {
    conflicts: BTreeMap<String, String>,
    dirty: BTreeSet<PathBuf>,
    created: Vec<PathBuf>,
    removed: Vec<PathBuf>,
}

/// Filesystem-only [`Vcs`]: workspaces are plain directories.
#[derive(Debug, Clone, Default)]
pub struct FakeVcs {
    inner: Rc<RefCell<VcsInner>>,
}

impl FakeVcs {
    /// Make every request for `branch` fail with `cause`.
    pub fn conflict(&self, branch: &str, cause: &str) {
        self.inner
            .borrow_mut()
            .conflicts
            .insert(branch.to_string(), cause.to_string());
    }

    pub fn resolve(&self, branch: &str) {
        self.inner.borrow_mut().conflicts.remove(branch);
    }

    pub fn mark_dirty(&self, path: &Path) {
        self.inner.borrow_mut().dirty.insert(path.to_path_buf());
    }

    pub fn created(&self) -> Vec<PathBuf> {
        self.inner.borrow().created.clone()
    }

    pub fn removed(&self) -> Vec<PathBuf> {
        self.inner.borrow().removed.clone()
    }
}

impl Vcs for FakeVcs {
    fn create_or_reuse_workspace(&self, request: &WorkspaceRequest) -> Result<WorkspaceOutcome> {
        let mut inner = self.inner.borrow_mut();
        if let Some(cause) = inner.conflicts.get(&request.branch) {
            bail!("{cause}");
        }
        if request.path.is_dir() {
            return Ok(WorkspaceOutcome::Reused(request.path.clone()));
        }
        fs::create_dir_all(&request.path)
            .with_context(|| format!("create {}", request.path.display()))?;
        inner.created.push(request.path.clone());
        Ok(WorkspaceOutcome::Created(request.path.clone()))
    }

    fn has_uncommitted_changes(&self, path: &Path) -> Result<bool> {
        Ok(self.inner.borrow().dirty.contains(path))
    }

    fn remove_workspace(&self, path: &Path) -> Result<()> {
        fs::remove_dir_all(path).with_context(|| format!("remove {}", path.display()))?;
        self.inner.borrow_mut().removed.push(path.to_path_buf());
        Ok(())
    }
}

/// [`AlertSink`] that keeps alerts in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingAlertSink {
    alerts: Rc<RefCell<Vec<Alert>>>,
}

impl RecordingAlertSink {
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.borrow().clone()
    }

    pub fn alerts_for(&self, worker_id: &str) -> Vec<Alert> {
        self.alerts
            .borrow()
            .iter()
            .filter(|a| a.worker_id == worker_id)
            .cloned()
            .collect()
    }
}

impl AlertSink for RecordingAlertSink {
    fn emit(&self, alert: &Alert) -> Result<()> {
        self.alerts.borrow_mut().push(alert.clone());
        Ok(())
    }
}
