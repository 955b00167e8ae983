//! Shared deterministic types for fleet core logic.
//!
//! These types are the stable vocabulary between the graph, classifier,
//! scheduler and the persisted state. They carry no I/O.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a worker as tracked by the daemon.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    #[default]
    Pending,
    Launched,
    Working,
    Idle,
    Blocked,
    Escalated,
    Completed,
    Error,
}

impl WorkerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Launched => "launched",
            Self::Working => "working",
            Self::Idle => "idle",
            Self::Blocked => "blocked",
            Self::Escalated => "escalated",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Statuses the daemon no longer observes.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// True once a session has been started for the worker.
    pub fn has_session(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a worker in the fleet.
///
/// Integrators merge other workers' branches and are the only role allowed on
/// protected branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Contributor,
    Integrator,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Contributor => "contributor",
            Self::Integrator => "integrator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State inferred from a worker's output snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Working,
    Idle,
    AwaitingConfirmation,
    QuestionForOperator,
    ErrorDetected,
    Completed,
}

impl WorkerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::Idle => "idle",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::QuestionForOperator => "question_for_operator",
            Self::ErrorDetected => "error_detected",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of worker statuses keyed by worker id.
///
/// Ids missing from the map read as [`WorkerStatus::Pending`].
pub type StatusMap = BTreeMap<String, WorkerStatus>;

/// Look up a status, treating unknown ids as pending.
pub fn status_of(statuses: &StatusMap, id: &str) -> WorkerStatus {
    statuses.get(id).copied().unwrap_or_default()
}
