//! Phase scheduling decisions.
//!
//! Each populated phase moves `NotLaunched -> Launched -> Complete`. The
//! scheduler is a pure function of the graph, the persisted state and the
//! clock; it only flips phase flags and reports what it flipped. Starting
//! sessions for a launched phase is the daemon's job.

use chrono::{DateTime, Duration, Utc};

use crate::core::graph::{Graph, Worker};
use crate::core::state::OrchestrationState;
use crate::core::types::WorkerStatus;

/// Phase transitions applied by one [`evaluate_phases`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerOutcome {
    pub completed: Vec<u32>,
    pub launched: Vec<u32>,
    pub orchestration_completed: bool,
}

impl SchedulerOutcome {
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty() && self.launched.is_empty() && !self.orchestration_completed
    }
}

/// Evaluate every populated phase in ascending order.
///
/// A launched phase completes once all its workers are `Completed`. A phase
/// that has not launched becomes eligible when the previous populated phase
/// has been complete for at least `grace` (or there is none) and every
/// dependency it has on other phases is `Completed`. Once every phase is
/// complete the run is marked complete and nothing further changes.
pub fn evaluate_phases(
    graph: &Graph,
    state: &mut OrchestrationState,
    now: DateTime<Utc>,
    grace: Duration,
) -> SchedulerOutcome {
    let mut outcome = SchedulerOutcome::default();
    if state.orchestration_complete {
        return outcome;
    }
    let statuses = state.statuses();

    for phase in graph.phase_numbers() {
        let record = state.phases.entry(phase).or_default();
        if record.complete {
            continue;
        }
        if record.launched {
            if graph.is_phase_complete(phase, &statuses) {
                record.complete = true;
                record.completed_at = Some(now);
                outcome.completed.push(phase);
            }
            continue;
        }

        if previous_phase_settled(graph, state, phase, now, grace)
            && graph.phase_dependencies_satisfied(phase, &statuses)
            && state.mark_phase_launched(phase, now)
        {
            outcome.launched.push(phase);
        }
    }

    let all_complete = graph
        .phase_numbers()
        .into_iter()
        .all(|phase| state.is_phase_complete(phase));
    if all_complete {
        state.orchestration_complete = true;
        state.completed_at = Some(now);
        outcome.orchestration_completed = true;
    }
    outcome
}

fn previous_phase_settled(
    graph: &Graph,
    state: &OrchestrationState,
    phase: u32,
    now: DateTime<Utc>,
    grace: Duration,
) -> bool {
    let Some(previous) = graph.previous_phase_before(phase) else {
        return true;
    };
    match state.phase(previous) {
        Some(record) if record.complete => record
            .completed_at
            .is_none_or(|completed_at| completed_at + grace <= now),
        _ => false,
    }
}

/// Workers in launched, incomplete phases that still need a session.
pub fn workers_to_materialize<'g>(graph: &'g Graph, state: &OrchestrationState) -> Vec<&'g Worker> {
    graph
        .workers()
        .iter()
        .filter(|w| state.is_phase_launched(w.phase) && !state.is_phase_complete(w.phase))
        .filter(|w| state.status(&w.id) == WorkerStatus::Pending)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{contributor, definition};

    fn complete(state: &mut OrchestrationState, ids: &[&str]) {
        for id in ids {
            state.worker_mut(id).status = WorkerStatus::Completed;
        }
    }

    #[test]
    fn first_phase_launches_immediately() {
        let graph = Graph::load(definition(vec![contributor("a", 2, &[])])).expect("load");
        let mut state = OrchestrationState::initialize(&graph);
        let outcome = evaluate_phases(&graph, &mut state, Utc::now(), Duration::seconds(60));
        assert_eq!(outcome.launched, vec![2]);
        assert_eq!(state.current_phase, 2);
        assert_eq!(
            workers_to_materialize(&graph, &state)
                .iter()
                .map(|w| w.id.as_str())
                .collect::<Vec<_>>(),
            vec!["a"]
        );
    }

    #[test]
    fn next_phase_waits_for_grace_period() {
        let graph = Graph::load(definition(vec![
            contributor("a", 1, &[]),
            contributor("b", 1, &[]),
            contributor("c", 2, &["a", "b"]),
        ]))
        .expect("load");
        let mut state = OrchestrationState::initialize(&graph);
        let grace = Duration::seconds(60);
        let t0 = Utc::now();
        evaluate_phases(&graph, &mut state, t0, grace);

        complete(&mut state, &["a"]);
        let outcome = evaluate_phases(&graph, &mut state, t0, grace);
        assert!(outcome.is_empty());

        complete(&mut state, &["b"]);
        let outcome = evaluate_phases(&graph, &mut state, t0, grace);
        assert_eq!(outcome.completed, vec![1]);
        assert!(outcome.launched.is_empty());

        let outcome = evaluate_phases(&graph, &mut state, t0 + Duration::seconds(30), grace);
        assert!(outcome.is_empty());

        let outcome = evaluate_phases(&graph, &mut state, t0 + grace, grace);
        assert_eq!(outcome.launched, vec![2]);

        let outcome = evaluate_phases(&graph, &mut state, t0 + grace * 2, grace);
        assert!(outcome.is_empty());
    }

    #[test]
    fn sparse_phases_advance_directly() {
        let graph = Graph::load(definition(vec![
            contributor("a", 1, &[]),
            contributor("b", 3, &[]),
            contributor("c", 5, &[]),
        ]))
        .expect("load");
        let mut state = OrchestrationState::initialize(&graph);
        let now = Utc::now();
        evaluate_phases(&graph, &mut state, now, Duration::zero());
        complete(&mut state, &["a"]);
        let outcome = evaluate_phases(&graph, &mut state, now, Duration::zero());
        assert_eq!(outcome.completed, vec![1]);
        assert_eq!(outcome.launched, vec![3]);
        assert!(!state.phases.contains_key(&2));
    }

    #[test]
    fn orchestration_completes_after_last_phase() {
        let graph = Graph::load(definition(vec![
            contributor("a", 1, &[]),
            contributor("b", 2, &["a"]),
        ]))
        .expect("load");
        let mut state = OrchestrationState::initialize(&graph);
        let now = Utc::now();
        evaluate_phases(&graph, &mut state, now, Duration::zero());
        complete(&mut state, &["a"]);
        evaluate_phases(&graph, &mut state, now, Duration::zero());
        assert!(!state.orchestration_complete);

        complete(&mut state, &["b"]);
        let outcome = evaluate_phases(&graph, &mut state, now, Duration::zero());
        assert_eq!(outcome.completed, vec![2]);
        assert!(outcome.orchestration_completed);
        assert!(state.orchestration_complete);
        assert_eq!(state.completed_at, Some(now));

        let again = evaluate_phases(&graph, &mut state, now, Duration::zero());
        assert!(again.is_empty());
        assert!(state.orchestration_complete);
    }

    #[test]
    fn complete_phase_is_not_reevaluated() {
        let graph = Graph::load(definition(vec![
            contributor("a", 1, &[]),
            contributor("b", 2, &["a"]),
        ]))
        .expect("load");
        let mut state = OrchestrationState::initialize(&graph);
        let now = Utc::now();
        evaluate_phases(&graph, &mut state, now, Duration::zero());
        complete(&mut state, &["a"]);
        evaluate_phases(&graph, &mut state, now, Duration::zero());

        state.worker_mut("a").status = WorkerStatus::Error;
        let outcome = evaluate_phases(&graph, &mut state, now, Duration::zero());
        assert!(outcome.completed.is_empty());
        assert!(state.is_phase_complete(1));
        assert!(state.is_phase_launched(2));
    }
}
