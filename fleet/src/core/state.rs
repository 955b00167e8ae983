//! Persisted orchestration state.
//!
//! [`OrchestrationState`] is the single record the daemon reads at startup and
//! rewrites after every iteration that changed something. The graph itself is
//! never stored here; only per-phase flags and per-worker progress.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::graph::Graph;
use crate::core::types::{StatusMap, WorkerStatus};

/// Current on-disk format version.
pub const STATE_VERSION: u32 = 1;

/// Per-phase progress flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub launched: bool,
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launched_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// What happened to a worker's workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceDisposition {
    Active,
    Reclaimed,
    Retained,
}

/// Mutable per-worker progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub status: WorkerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_observed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launched_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<WorkspaceDisposition>,
    /// Why the worker was escalated or errored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Last time the output or the status changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<DateTime<Utc>>,
    /// Fingerprint of the last observed output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_digest: Option<u64>,
    /// A stale warning was raised and no activity has been seen since.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stale: bool,
}

/// Durable checkpoint of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationState {
    pub version: u32,
    pub project: String,
    /// Highest launched phase, 0 before anything launched.
    pub current_phase: u32,
    pub max_phase: u32,
    pub orchestration_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Completed daemon iterations.
    pub iteration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub phases: BTreeMap<u32, PhaseRecord>,
    pub workers: BTreeMap<String, WorkerRecord>,
}

impl OrchestrationState {
    /// Fresh state for a graph: every worker pending, no phase launched.
    pub fn initialize(graph: &Graph) -> Self {
        let phases = graph
            .phase_numbers()
            .into_iter()
            .map(|phase| (phase, PhaseRecord::default()))
            .collect();
        let workers = graph
            .workers()
            .iter()
            .map(|w| (w.id.clone(), WorkerRecord::default()))
            .collect();
        Self {
            version: STATE_VERSION,
            project: graph.project().slug.clone(),
            current_phase: 0,
            max_phase: graph.max_phase(),
            orchestration_complete: false,
            completed_at: None,
            iteration: 0,
            updated_at: None,
            phases,
            workers,
        }
    }

    /// Status snapshot for graph queries.
    pub fn statuses(&self) -> StatusMap {
        self.workers
            .iter()
            .map(|(id, record)| (id.clone(), record.status))
            .collect()
    }

    pub fn status(&self, worker_id: &str) -> WorkerStatus {
        self.workers
            .get(worker_id)
            .map(|r| r.status)
            .unwrap_or_default()
    }

    pub fn worker_mut(&mut self, worker_id: &str) -> &mut WorkerRecord {
        self.workers.entry(worker_id.to_string()).or_default()
    }

    pub fn phase(&self, phase: u32) -> Option<&PhaseRecord> {
        self.phases.get(&phase)
    }

    pub fn is_phase_launched(&self, phase: u32) -> bool {
        self.phases.get(&phase).is_some_and(|p| p.launched)
    }

    pub fn is_phase_complete(&self, phase: u32) -> bool {
        self.phases.get(&phase).is_some_and(|p| p.complete)
    }

    /// Mark a phase launched. Never clears the flag.
    pub fn mark_phase_launched(&mut self, phase: u32, now: DateTime<Utc>) -> bool {
        let record = self.phases.entry(phase).or_default();
        if record.launched {
            return false;
        }
        record.launched = true;
        record.launched_at = Some(now);
        self.current_phase = self.current_phase.max(phase);
        true
    }

    /// Count of workers per status, for reporting.
    pub fn status_counts(&self) -> BTreeMap<WorkerStatus, usize> {
        let mut counts = BTreeMap::new();
        for record in self.workers.values() {
            *counts.entry(record.status).or_insert(0) += 1;
        }
        counts
    }
}
