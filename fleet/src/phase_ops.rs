//! Manual phase operations: `fleet launch-phase` and `fleet close-phase`.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::core::state::{OrchestrationState, WorkspaceDisposition};
use crate::core::types::WorkerStatus;
use crate::daemon::{Daemon, Materialized};
use crate::io::alerts::AlertSink;
use crate::io::journal::JournalEvent;
use crate::io::memory::ContextSource;
use crate::io::session::AgentRuntime;
use crate::io::workspace::{ReclaimOutcome, Vcs};

/// Result of a manual phase launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseLaunchReport {
    pub phase: u32,
    /// False when the phase was already launched.
    pub newly_launched: bool,
    pub started: Vec<String>,
    pub reused: Vec<String>,
}

/// Result of closing a phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseCloseReport {
    pub phase: u32,
    pub removed: Vec<String>,
    pub already_gone: Vec<String>,
    pub retained: Vec<(String, String)>,
}

/// Closing left workspaces in place that the operator has to deal with.
#[derive(Debug, Clone, Error)]
#[error("phase {phase}: retained {} workspace(s): {}", .workers.len(), .workers.join(", "))]
pub struct WorkspacesRetained {
    pub phase: u32,
    pub workers: Vec<String>,
}

fn ensure_populated<R, V, C, S>(daemon: &Daemon<R, V, C, S>, phase: u32) -> Result<()>
where
    R: AgentRuntime,
    V: Vcs,
    C: ContextSource,
    S: AlertSink,
{
    if daemon.graph().workers_in_phase(phase).is_empty() {
        return Err(anyhow!(
            "phase {phase} has no workers (phases: {:?})",
            daemon.graph().phase_numbers()
        ));
    }
    Ok(())
}

/// Launch `phase` now, bypassing the grace period and dependency gate, and
/// materialize its pending workers.
///
/// State is persisted even when some workers fail; the first failure is then
/// returned so the caller can surface it.
pub fn launch_phase<R, V, C, S>(
    daemon: &Daemon<R, V, C, S>,
    state: &mut OrchestrationState,
    phase: u32,
    now: DateTime<Utc>,
) -> Result<PhaseLaunchReport>
where
    R: AgentRuntime,
    V: Vcs,
    C: ContextSource,
    S: AlertSink,
{
    ensure_populated(daemon, phase)?;
    if state.is_phase_complete(phase) {
        return Err(anyhow!("phase {phase} is already complete"));
    }

    let mut report = PhaseLaunchReport {
        phase,
        newly_launched: state.mark_phase_launched(phase, now),
        ..PhaseLaunchReport::default()
    };
    if report.newly_launched {
        info!(phase, "phase launched manually");
        daemon.record(now, JournalEvent::PhaseLaunched { phase, manual: true });
    }

    let mut first_error = None;
    for worker in daemon.graph().workers_in_phase(phase) {
        if state.status(&worker.id) != WorkerStatus::Pending {
            continue;
        }
        match daemon.materialize(worker, state, now) {
            Ok(Materialized::Started) => report.started.push(worker.id.clone()),
            Ok(Materialized::Reused) => report.reused.push(worker.id.clone()),
            Err(err) => {
                warn!(worker = %worker.id, error = %format!("{err:#}"), "materialize failed");
                first_error.get_or_insert(err);
            }
        }
    }

    state.updated_at = Some(now);
    daemon.persist(state)?;
    match first_error {
        Some(err) => Err(err),
        None => Ok(report),
    }
}

/// Reclaim the workspaces of `phase`.
///
/// Requires the phase to be complete unless `force` is set. Workspaces with
/// uncommitted changes are retained and reported through
/// [`WorkspacesRetained`].
pub fn close_phase<R, V, C, S>(
    daemon: &Daemon<R, V, C, S>,
    state: &mut OrchestrationState,
    phase: u32,
    force: bool,
    now: DateTime<Utc>,
) -> Result<PhaseCloseReport>
where
    R: AgentRuntime,
    V: Vcs,
    C: ContextSource,
    S: AlertSink,
{
    ensure_populated(daemon, phase)?;
    if !force && !state.is_phase_complete(phase) {
        return Err(anyhow!(
            "phase {phase} is not complete (use --force to close it anyway)"
        ));
    }

    let mut report = PhaseCloseReport {
        phase,
        ..PhaseCloseReport::default()
    };
    for worker in daemon.graph().workers_in_phase(phase) {
        let record = state.worker_mut(&worker.id);
        let Some(path) = record.workspace_path.clone() else {
            continue;
        };
        if record.workspace == Some(WorkspaceDisposition::Reclaimed) {
            continue;
        }
        match daemon.workspaces().reclaim(worker, &path)? {
            ReclaimOutcome::Removed => {
                record.workspace = Some(WorkspaceDisposition::Reclaimed);
                report.removed.push(worker.id.clone());
                daemon.record(
                    now,
                    JournalEvent::WorkspaceReclaimed {
                        worker_id: worker.id.clone(),
                        path,
                    },
                );
            }
            ReclaimOutcome::AlreadyGone => {
                record.workspace = Some(WorkspaceDisposition::Reclaimed);
                report.already_gone.push(worker.id.clone());
            }
            ReclaimOutcome::Retained { reason } => {
                record.workspace = Some(WorkspaceDisposition::Retained);
                daemon.record(
                    now,
                    JournalEvent::WorkspaceRetained {
                        worker_id: worker.id.clone(),
                        path,
                        reason: reason.clone(),
                    },
                );
                report.retained.push((worker.id.clone(), reason));
            }
        }
    }

    state.updated_at = Some(now);
    daemon.persist(state)?;
    info!(
        phase,
        removed = report.removed.len(),
        retained = report.retained.len(),
        "phase closed"
    );
    if report.retained.is_empty() {
        Ok(report)
    } else {
        Err(WorkspacesRetained {
            phase,
            workers: report.retained.iter().map(|(id, _)| id.clone()).collect(),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::Graph;
    use crate::io::config::FleetConfig;
    use crate::io::init::FleetPaths;
    use crate::io::memory::NoContext;
    use crate::io::workspace::WorkspaceConflictError;
    use crate::test_support::{
        FakeVcs, RecordingAlertSink, ScriptedRuntime, contributor, definition,
    };

    type TestDaemon = Daemon<ScriptedRuntime, FakeVcs, NoContext, RecordingAlertSink>;

    fn setup(temp: &tempfile::TempDir) -> (TestDaemon, ScriptedRuntime, FakeVcs, OrchestrationState) {
        let graph = Graph::load(definition(vec![
            contributor("api", 1, &[]),
            contributor("docs", 1, &[]),
            contributor("web", 2, &["api"]),
        ]))
        .expect("graph");
        let state = OrchestrationState::initialize(&graph);
        let runtime = ScriptedRuntime::default();
        let vcs = FakeVcs::default();
        let daemon = Daemon::new(
            graph,
            FleetConfig::default(),
            FleetPaths::new(temp.path()),
            runtime.clone(),
            vcs.clone(),
            NoContext,
            RecordingAlertSink::default(),
        )
        .expect("daemon");
        (daemon, runtime, vcs, state)
    }

    #[test]
    fn manual_launch_bypasses_dependency_gate() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (daemon, runtime, _vcs, mut state) = setup(&temp);

        let report = launch_phase(&daemon, &mut state, 2, Utc::now()).expect("launch");
        assert!(report.newly_launched);
        assert_eq!(report.started, vec!["web".to_string()]);
        assert_eq!(runtime.start_count("web"), 1);
        assert!(state.is_phase_launched(2));
        assert!(daemon.paths().state_path.is_file());

        let again = launch_phase(&daemon, &mut state, 2, Utc::now()).expect("relaunch");
        assert!(!again.newly_launched);
        assert!(again.started.is_empty());
        assert_eq!(runtime.start_count("web"), 1);
    }

    #[test]
    fn manual_launch_surfaces_conflict_after_persisting() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (daemon, runtime, vcs, mut state) = setup(&temp);
        vcs.conflict("fleet/api", "held elsewhere");

        let err = launch_phase(&daemon, &mut state, 1, Utc::now()).unwrap_err();
        assert!(err.downcast_ref::<WorkspaceConflictError>().is_some());
        assert_eq!(runtime.start_count("docs"), 1);
        assert_eq!(state.status("docs"), WorkerStatus::Launched);
        assert!(daemon.paths().state_path.is_file());
    }

    #[test]
    fn empty_phase_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (daemon, _runtime, _vcs, mut state) = setup(&temp);
        assert!(launch_phase(&daemon, &mut state, 7, Utc::now()).is_err());
        assert!(close_phase(&daemon, &mut state, 7, true, Utc::now()).is_err());
    }

    #[test]
    fn close_requires_complete_phase_unless_forced() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (daemon, _runtime, _vcs, mut state) = setup(&temp);
        launch_phase(&daemon, &mut state, 1, Utc::now()).expect("launch");

        let err = close_phase(&daemon, &mut state, 1, false, Utc::now()).unwrap_err();
        assert!(err.to_string().contains("not complete"));

        let report = close_phase(&daemon, &mut state, 1, true, Utc::now()).expect("close");
        assert_eq!(report.removed, vec!["api".to_string(), "docs".to_string()]);
        assert_eq!(
            state.workers["api"].workspace,
            Some(WorkspaceDisposition::Reclaimed)
        );
    }

    #[test]
    fn dirty_workspace_is_retained_and_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (daemon, _runtime, vcs, mut state) = setup(&temp);
        launch_phase(&daemon, &mut state, 1, Utc::now()).expect("launch");
        for id in ["api", "docs"] {
            state.worker_mut(id).status = WorkerStatus::Completed;
        }
        state.phases.entry(1).or_default().complete = true;
        let api_path = state.workers["api"].workspace_path.clone().expect("path");
        vcs.mark_dirty(&api_path);

        let err = close_phase(&daemon, &mut state, 1, false, Utc::now()).unwrap_err();
        let retained = err.downcast_ref::<WorkspacesRetained>().expect("retained");
        assert_eq!(retained.workers, vec!["api".to_string()]);
        assert!(api_path.is_dir());
        assert_eq!(
            state.workers["api"].workspace,
            Some(WorkspaceDisposition::Retained)
        );
        assert_eq!(
            state.workers["docs"].workspace,
            Some(WorkspaceDisposition::Reclaimed)
        );
        assert_eq!(vcs.removed().len(), 1);
    }
}
