//! One monitoring iteration of the orchestration daemon.
//!
//! An iteration observes every live worker, applies bounded corrective action
//! to confirmation prompts, maps observations to statuses, runs the phase
//! scheduler, materializes workers of launched phases and persists the state
//! when anything changed. Failures for one worker are recorded in the
//! [`IterationReport`] and never abort the iteration; only failing to persist
//! state is fatal.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::thread;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::core::classifier::{Classification, classify_detail, strip_ansi};
use crate::core::graph::{Graph, Worker};
use crate::core::scheduler::{SchedulerOutcome, evaluate_phases, workers_to_materialize};
use crate::core::state::{OrchestrationState, WorkspaceDisposition};
use crate::core::transitions::{AlertCause, next_status, stale_for};
use crate::core::types::{WorkerState, WorkerStatus};
use crate::io::alerts::{Alert, AlertSink};
use crate::io::brief::BriefComposer;
use crate::io::config::FleetConfig;
use crate::io::init::FleetPaths;
use crate::io::journal::{Journal, JournalEvent};
use crate::io::memory::ContextSource;
use crate::io::session::{AgentRuntime, LaunchOutcome, Launcher, Signal};
use crate::io::state_store::write_state;
use crate::io::workspace::{Vcs, WorkspaceManager};

/// A worker whose status moved during an iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub worker_id: String,
    pub from: WorkerStatus,
    pub to: WorkerStatus,
}

/// Per-worker failure isolated from the rest of the iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerFailure {
    pub worker_id: String,
    pub error: String,
}

/// What one iteration did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationReport {
    pub iteration: u64,
    pub observed: Vec<String>,
    pub changes: Vec<StatusChange>,
    pub alerts: Vec<String>,
    pub phases: SchedulerOutcome,
    pub launched: Vec<String>,
    pub reused: Vec<String>,
    pub failures: Vec<WorkerFailure>,
    pub persisted: bool,
}

/// How a pending worker was brought up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Materialized {
    Started,
    Reused,
}

/// The monitoring daemon and its collaborators.
pub struct Daemon<R, V, C, S> {
    graph: Graph,
    config: FleetConfig,
    paths: FleetPaths,
    launcher: Launcher<R>,
    workspaces: WorkspaceManager<V>,
    briefs: BriefComposer<C>,
    alerts: S,
    journal: Journal,
}

impl<R, V, C, S> Daemon<R, V, C, S>
where
    R: AgentRuntime,
    V: Vcs,
    C: ContextSource,
    S: AlertSink,
{
    pub fn new(
        graph: Graph,
        config: FleetConfig,
        paths: FleetPaths,
        runtime: R,
        vcs: V,
        memory: C,
        alerts: S,
    ) -> Result<Self> {
        let workspaces = WorkspaceManager::new(
            vcs,
            paths.worktree_dir(&config),
            graph.project().base_branch.clone(),
        );
        let briefs = BriefComposer::new(
            memory,
            &paths.workers_dir,
            &paths.briefs_dir,
            config.brief_budget_bytes,
        )?;
        let journal = Journal::new(&paths.journal_path);
        Ok(Self {
            graph,
            config,
            paths,
            launcher: Launcher::new(runtime),
            workspaces,
            briefs,
            alerts,
            journal,
        })
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn paths(&self) -> &FleetPaths {
        &self.paths
    }

    pub fn launcher(&self) -> &Launcher<R> {
        &self.launcher
    }

    pub fn workspaces(&self) -> &WorkspaceManager<V> {
        &self.workspaces
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Run one iteration against `state` and persist it if it changed.
    #[instrument(skip_all, fields(iteration = state.iteration + 1))]
    pub fn run_iteration(
        &self,
        state: &mut OrchestrationState,
        now: DateTime<Utc>,
    ) -> Result<IterationReport> {
        let before = state.clone();
        let mut report = IterationReport {
            iteration: state.iteration + 1,
            ..IterationReport::default()
        };

        for worker in self.graph.workers() {
            let status = state.status(&worker.id);
            if status == WorkerStatus::Pending || status.is_terminal() {
                continue;
            }
            if let Err(err) = self.observe(worker, state, now, &mut report) {
                warn!(worker = %worker.id, error = %format!("{err:#}"), "observation failed");
                report.failures.push(WorkerFailure {
                    worker_id: worker.id.clone(),
                    error: format!("{err:#}"),
                });
            }
        }

        report.phases = evaluate_phases(&self.graph, state, now, self.config.grace_period());
        self.journal_phases(&report.phases, now);

        if !state.orchestration_complete {
            let pending: Vec<&Worker> = workers_to_materialize(&self.graph, state);
            for worker in pending {
                match self.materialize(worker, state, now) {
                    Ok(Materialized::Started) => report.launched.push(worker.id.clone()),
                    Ok(Materialized::Reused) => report.reused.push(worker.id.clone()),
                    Err(err) => {
                        warn!(worker = %worker.id, error = %format!("{err:#}"), "materialize failed");
                        report.failures.push(WorkerFailure {
                            worker_id: worker.id.clone(),
                            error: format!("{err:#}"),
                        });
                    }
                }
            }
        }

        state.iteration = report.iteration;
        if progress_changed(&before, state) {
            state.updated_at = Some(now);
            self.persist(state)?;
            report.persisted = true;
        }
        debug!(
            observed = report.observed.len(),
            changes = report.changes.len(),
            launched = report.launched.len(),
            failures = report.failures.len(),
            persisted = report.persisted,
            "iteration finished"
        );
        Ok(report)
    }

    /// Write `state` to the state store.
    pub fn persist(&self, state: &OrchestrationState) -> Result<()> {
        write_state(&self.paths.state_path, state)
            .with_context(|| format!("persist {}", self.paths.state_path.display()))
    }

    /// Observe one live worker and apply the resulting transition.
    fn observe(
        &self,
        worker: &Worker,
        state: &mut OrchestrationState,
        now: DateTime<Utc>,
        report: &mut IterationReport,
    ) -> Result<()> {
        if !self.launcher.is_alive(&worker.id)? {
            debug!(worker = %worker.id, "session not alive, skipping");
            return Ok(());
        }
        let current = state.status(&worker.id);
        let snapshot = self.launcher.read_snapshot(&worker.id)?;
        let digest = output_digest(&snapshot);
        let mut observed = classify_detail(&snapshot);
        report.observed.push(worker.id.clone());

        if observed.state == WorkerState::AwaitingConfirmation && current != WorkerStatus::Escalated
        {
            observed = self.resolve_confirmation(worker, observed, now)?;
        }

        let dependencies_met = self.graph.dependencies_met(worker, &state.statuses());
        let transition = next_status(current, observed.state, dependencies_met);
        let changed = transition.changed_from(current);
        let record = state.worker_mut(&worker.id);
        record.last_observed_at = Some(now);
        if changed || record.output_digest != Some(digest) || record.last_activity_at.is_none() {
            record.output_digest = Some(digest);
            record.last_activity_at = Some(now);
            record.stale = false;
        } else if let Some(threshold) = self.config.stale_after()
            && let Some(idle) = stale_for(record, current, now, threshold)
        {
            record.stale = true;
            self.flag_stale(worker, current, idle, now, report);
        }
        if !changed {
            return Ok(());
        }

        record.status = transition.status;
        record.reason = transition
            .alert
            .map(|cause| alert_reason(cause, observed.evidence.as_deref()));
        info!(worker = %worker.id, from = %current, to = %transition.status, "status changed");
        report.changes.push(StatusChange {
            worker_id: worker.id.clone(),
            from: current,
            to: transition.status,
        });
        self.record(
            now,
            JournalEvent::StatusChanged {
                worker_id: worker.id.clone(),
                from: current,
                to: transition.status,
                evidence: observed.evidence.clone(),
            },
        );

        if let Some(cause) = transition.alert {
            let alert = Alert {
                severity: cause.severity(),
                worker_id: worker.id.clone(),
                reason: alert_reason(cause, observed.evidence.as_deref()),
                timestamp: now,
            };
            if let Err(err) = self.alerts.emit(&alert) {
                warn!(worker = %worker.id, error = %format!("{err:#}"), "alert delivery failed");
            }
            report.alerts.push(worker.id.clone());
        }
        Ok(())
    }

    /// Warn once about a worker whose output stopped changing.
    fn flag_stale(
        &self,
        worker: &Worker,
        status: WorkerStatus,
        idle: chrono::Duration,
        now: DateTime<Utc>,
        report: &mut IterationReport,
    ) {
        let idle_secs = idle.num_seconds();
        warn!(worker = %worker.id, %status, idle_secs, "worker stale");
        self.record(
            now,
            JournalEvent::WorkerStale {
                worker_id: worker.id.clone(),
                status,
                idle_secs,
            },
        );
        let alert = Alert {
            severity: AlertCause::Stale.severity(),
            worker_id: worker.id.clone(),
            reason: format!("{} ({status} for {idle_secs}s)", AlertCause::Stale.describe()),
            timestamp: now,
        };
        if let Err(err) = self.alerts.emit(&alert) {
            warn!(worker = %worker.id, error = %format!("{err:#}"), "alert delivery failed");
        }
        report.alerts.push(worker.id.clone());
    }

    /// Acknowledge a confirmation prompt up to `max_attempts` times, re-reading
    /// the session after each attempt. Returns the last classification.
    fn resolve_confirmation(
        &self,
        worker: &Worker,
        mut observed: Classification,
        now: DateTime<Utc>,
    ) -> Result<Classification> {
        let max_attempts = self.config.confirmation.max_attempts;
        for attempt in 1..=max_attempts {
            let delivered = match self.launcher.send(&worker.id, &Signal::Acknowledge) {
                Ok(()) => true,
                Err(err) => {
                    warn!(worker = %worker.id, attempt, error = %format!("{err:#}"), "acknowledge failed");
                    false
                }
            };
            self.record(
                now,
                JournalEvent::ConfirmationSent {
                    worker_id: worker.id.clone(),
                    attempt,
                    delivered,
                },
            );
            thread::sleep(self.config.confirmation_delay());
            observed = classify_detail(&self.launcher.read_snapshot(&worker.id)?);
            if observed.state != WorkerState::AwaitingConfirmation {
                debug!(worker = %worker.id, attempt, state = %observed.state, "confirmation resolved");
                return Ok(observed);
            }
        }
        warn!(worker = %worker.id, max_attempts, "confirmation unresolved");
        Ok(observed)
    }

    /// Bring a pending worker up: workspace, brief, session.
    ///
    /// Conflicts and launch failures are journaled and returned as
    /// `WorkspaceConflictError` / `LaunchError` inside the `anyhow::Error`.
    pub fn materialize(
        &self,
        worker: &Worker,
        state: &mut OrchestrationState,
        now: DateTime<Utc>,
    ) -> Result<Materialized> {
        let handle = match self.workspaces.ensure_workspace(worker) {
            Ok(handle) => handle,
            Err(err) => {
                self.record(
                    now,
                    JournalEvent::WorkspaceConflict {
                        worker_id: err.worker_id.clone(),
                        branch: err.branch.clone(),
                        cause: err.cause.clone(),
                    },
                );
                return Err(err.into());
            }
        };
        {
            let record = state.worker_mut(&worker.id);
            record.workspace_path = Some(handle.path.clone());
            record.workspace = Some(WorkspaceDisposition::Active);
        }

        let brief = self
            .briefs
            .compose(&self.graph, worker, &handle.path)
            .with_context(|| format!("compose brief for {}", worker.id))?;

        let outcome = match self.launcher.launch(worker, &handle.path, &brief.path) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.record(
                    now,
                    JournalEvent::LaunchFailed {
                        worker_id: err.worker_id.clone(),
                        cause: err.cause.clone(),
                    },
                );
                return Err(err.into());
            }
        };

        let record = state.worker_mut(&worker.id);
        record.status = WorkerStatus::Launched;
        record.launched_at = Some(now);
        record.last_activity_at = Some(now);
        record.output_digest = None;
        record.stale = false;
        record.reason = None;
        match outcome {
            LaunchOutcome::Started(session) => {
                self.record(
                    now,
                    JournalEvent::WorkerLaunched {
                        worker_id: worker.id.clone(),
                        session: session.0,
                        workspace: handle.path,
                    },
                );
                Ok(Materialized::Started)
            }
            LaunchOutcome::Reused(session) => {
                self.record(
                    now,
                    JournalEvent::WorkerReused {
                        worker_id: worker.id.clone(),
                        session: session.0,
                    },
                );
                Ok(Materialized::Reused)
            }
        }
    }

    fn journal_phases(&self, outcome: &SchedulerOutcome, now: DateTime<Utc>) {
        for &phase in &outcome.completed {
            info!(phase, "phase complete");
            self.record(now, JournalEvent::PhaseCompleted { phase });
        }
        for &phase in &outcome.launched {
            info!(phase, "phase launched");
            self.record(now, JournalEvent::PhaseLaunched { phase, manual: false });
        }
        if outcome.orchestration_completed {
            info!("orchestration complete");
            self.record(now, JournalEvent::OrchestrationComplete);
        }
    }

    /// Journal writes are best effort; the state file is the checkpoint.
    pub(crate) fn record(&self, now: DateTime<Utc>, event: JournalEvent) {
        if let Err(err) = self.journal.record(now, event) {
            warn!(error = %format!("{err:#}"), "journal write failed");
        }
    }
}

fn alert_reason(cause: AlertCause, evidence: Option<&str>) -> String {
    match evidence {
        Some(line) => format!("{}: {line}", cause.describe()),
        None => cause.describe().to_string(),
    }
}

/// Fingerprint of the visible output, ignoring terminal escapes.
fn output_digest(snapshot: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    strip_ansi(snapshot).trim_end().hash(&mut hasher);
    hasher.finish()
}

/// True if anything other than observation timestamps and counters moved.
fn progress_changed(before: &OrchestrationState, after: &OrchestrationState) -> bool {
    if before.phases != after.phases
        || before.orchestration_complete != after.orchestration_complete
        || before.current_phase != after.current_phase
        || before.workers.len() != after.workers.len()
    {
        return true;
    }
    before.workers.iter().any(|(id, old)| {
        after.workers.get(id).is_none_or(|new| {
            old.status != new.status
                || old.workspace != new.workspace
                || old.workspace_path != new.workspace_path
                || old.reason != new.reason
                || old.stale != new.stale
        })
    })
}
