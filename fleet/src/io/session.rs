//! Agent session launching and observation.
//!
//! The daemon talks to agent sessions only through [`AgentRuntime`]. The
//! [`Launcher`] adds the idempotence rule on top: a worker whose session is
//! already alive is never started twice.

use std::path::Path;

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::core::graph::Worker;

/// Runtime-specific address of a worker's session.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionHandle(pub String);

impl SessionHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Input sent into a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Accept a pending confirmation prompt.
    Acknowledge,
}

/// Everything a runtime needs to start a worker's agent.
#[derive(Debug, Clone, Copy)]
pub struct StartRequest<'a> {
    pub worker_id: &'a str,
    /// Agent profile label from the graph; `None` uses the default command.
    pub agent: Option<&'a str>,
    pub workspace: &'a Path,
    pub brief_path: &'a Path,
}

/// External agent session runtime.
pub trait AgentRuntime {
    /// Deterministic handle for a worker, whether or not it is running.
    fn handle_for(&self, worker_id: &str) -> SessionHandle;
    fn start(&self, request: &StartRequest<'_>) -> Result<SessionHandle>;
    fn is_alive(&self, handle: &SessionHandle) -> Result<bool>;
    fn read_output(&self, handle: &SessionHandle) -> Result<String>;
    /// Best effort; delivery is not guaranteed even on `Ok`.
    fn send_signal(&self, handle: &SessionHandle, signal: &Signal) -> Result<()>;
}

/// The agent process could not be started.
#[derive(Debug, Clone, Error)]
#[error("failed to launch worker '{worker_id}': {cause}")]
pub struct LaunchError {
    pub worker_id: String,
    pub cause: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    Started(SessionHandle),
    /// A live session already existed; nothing was started.
    Reused(SessionHandle),
}

/// Idempotent launcher over an [`AgentRuntime`].
#[derive(Debug, Clone)]
pub struct Launcher<R> {
    runtime: R,
}

impl<R: AgentRuntime> Launcher<R> {
    pub fn new(runtime: R) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Start the worker's session unless one is already alive.
    #[instrument(skip_all, fields(worker = %worker.id))]
    pub fn launch(
        &self,
        worker: &Worker,
        workspace: &Path,
        brief_path: &Path,
    ) -> Result<LaunchOutcome, LaunchError> {
        let launch_error = |err: anyhow::Error| LaunchError {
            worker_id: worker.id.clone(),
            cause: format!("{err:#}"),
        };
        let handle = self.runtime.handle_for(&worker.id);
        if self.runtime.is_alive(&handle).map_err(launch_error)? {
            info!(session = handle.as_str(), "session already alive, reusing");
            return Ok(LaunchOutcome::Reused(handle));
        }
        let request = StartRequest {
            worker_id: &worker.id,
            agent: worker.agent.as_deref(),
            workspace,
            brief_path,
        };
        let handle = self.runtime.start(&request).map_err(launch_error)?;
        info!(session = handle.as_str(), "session started");
        Ok(LaunchOutcome::Started(handle))
    }

    pub fn is_alive(&self, worker_id: &str) -> Result<bool> {
        self.runtime.is_alive(&self.runtime.handle_for(worker_id))
    }

    pub fn read_snapshot(&self, worker_id: &str) -> Result<String> {
        self.runtime.read_output(&self.runtime.handle_for(worker_id))
    }

    pub fn send(&self, worker_id: &str, signal: &Signal) -> Result<()> {
        debug!(worker = worker_id, ?signal, "sending signal");
        self.runtime
            .send_signal(&self.runtime.handle_for(worker_id), signal)
    }
}
