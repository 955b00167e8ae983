//! Decision journal in `.fleet/journal.jsonl`.
//!
//! Every decision the daemon or a manual command takes is appended as one
//! JSON object. Unlike tracing output the journal is always written and is
//! unaffected by `RUST_LOG`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::WorkerStatus;
use crate::io::alerts::append_json_line;

/// One journaled decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEvent {
    StatusChanged {
        worker_id: String,
        from: WorkerStatus,
        to: WorkerStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        evidence: Option<String>,
    },
    ConfirmationSent {
        worker_id: String,
        attempt: u32,
        delivered: bool,
    },
    WorkerLaunched {
        worker_id: String,
        session: String,
        workspace: PathBuf,
    },
    WorkerReused {
        worker_id: String,
        session: String,
    },
    WorkerStale {
        worker_id: String,
        status: WorkerStatus,
        idle_secs: i64,
    },
    WorkspaceConflict {
        worker_id: String,
        branch: String,
        cause: String,
    },
    LaunchFailed {
        worker_id: String,
        cause: String,
    },
    PhaseLaunched {
        phase: u32,
        manual: bool,
    },
    PhaseCompleted {
        phase: u32,
    },
    OrchestrationComplete,
    WorkspaceReclaimed {
        worker_id: String,
        path: PathBuf,
    },
    WorkspaceRetained {
        worker_id: String,
        path: PathBuf,
        reason: String,
    },
}

/// A journal line: timestamp plus the flattened event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: JournalEvent,
}

/// Append-only writer for the journal file.
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, timestamp: DateTime<Utc>, event: JournalEvent) -> Result<()> {
        append_json_line(&self.path, &JournalEntry { timestamp, event })
    }

    /// All entries in file order; a missing journal is empty.
    pub fn read_all(&self) -> Result<Vec<JournalEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("read {}", self.path.display()))?;
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(idx, line)| {
                serde_json::from_str(line)
                    .with_context(|| format!("parse {} line {}", self.path.display(), idx + 1))
            })
            .collect()
    }
}
