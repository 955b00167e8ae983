//! `fleet status` and `fleet order` reports.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;

use serde::Serialize;

use crate::core::graph::Graph;
use crate::core::state::{OrchestrationState, WorkspaceDisposition};
use crate::core::types::{Role, WorkerStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerLine {
    pub id: String,
    pub role: Role,
    pub branch: String,
    pub status: WorkerStatus,
    pub blocked_on: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disposition: Option<WorkspaceDisposition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseLine {
    pub phase: u32,
    pub launched: bool,
    pub complete: bool,
    pub workers: Vec<WorkerLine>,
}

/// Snapshot of a run for humans and scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub project: String,
    pub current_phase: u32,
    pub max_phase: u32,
    pub orchestration_complete: bool,
    pub iteration: u64,
    pub totals: BTreeMap<WorkerStatus, usize>,
    pub phases: Vec<PhaseLine>,
}

impl StatusReport {
    pub fn build(graph: &Graph, state: &OrchestrationState) -> Self {
        let statuses = state.statuses();
        let phases = graph
            .phase_numbers()
            .into_iter()
            .map(|phase| {
                let record = state.phase(phase).cloned().unwrap_or_default();
                let workers = graph
                    .workers_in_phase(phase)
                    .into_iter()
                    .map(|worker| {
                        let record = state.workers.get(&worker.id).cloned().unwrap_or_default();
                        WorkerLine {
                            id: worker.id.clone(),
                            role: worker.role,
                            branch: worker.branch.clone(),
                            status: record.status,
                            blocked_on: worker
                                .dependencies
                                .iter()
                                .filter(|dep| statuses.get(*dep) != Some(&WorkerStatus::Completed))
                                .cloned()
                                .collect(),
                            workspace: record.workspace_path,
                            disposition: record.workspace,
                            reason: record.reason,
                            stale: record.stale,
                        }
                    })
                    .collect();
                PhaseLine {
                    phase,
                    launched: record.launched,
                    complete: record.complete,
                    workers,
                }
            })
            .collect();
        Self {
            project: graph.project().name.clone(),
            current_phase: state.current_phase,
            max_phase: state.max_phase,
            orchestration_complete: state.orchestration_complete,
            iteration: state.iteration,
            totals: state.status_counts(),
            phases,
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let overall = if self.orchestration_complete {
            "complete"
        } else {
            "in progress"
        };
        let _ = writeln!(
            out,
            "{}: phase {}/{} ({overall}, iteration {})",
            self.project, self.current_phase, self.max_phase, self.iteration
        );
        let totals: Vec<String> = self
            .totals
            .iter()
            .map(|(status, count)| format!("{count} {}", status.as_str()))
            .collect();
        let _ = writeln!(out, "workers: {}", totals.join(", "));
        for phase in &self.phases {
            let label = match (phase.launched, phase.complete) {
                (_, true) => "complete",
                (true, false) => "launched",
                (false, false) => "not launched",
            };
            let _ = writeln!(out, "phase {} [{label}]", phase.phase);
            for w in &phase.workers {
                let _ = write!(out, "  {:<16} {:<10} {}", w.id, w.status.as_str(), w.branch);
                if w.status != WorkerStatus::Completed && !w.blocked_on.is_empty() {
                    let _ = write!(out, "  waiting on {}", w.blocked_on.join(", "));
                }
                if let Some(reason) = &w.reason {
                    let _ = write!(out, "  ({reason})");
                }
                if w.stale {
                    out.push_str("  [stale]");
                }
                out.push('\n');
            }
        }
        out
    }
}

/// Suggested merge order as numbered `id (branch)` lines.
pub fn render_order(graph: &Graph) -> String {
    graph
        .integration_order()
        .iter()
        .enumerate()
        .map(|(idx, w)| format!("{}. {} ({})\n", idx + 1, w.id, w.branch))
        .collect()
}
