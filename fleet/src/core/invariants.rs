//! Consistency checks between a persisted state and the graph it claims to
//! describe.

use crate::core::graph::Graph;
use crate::core::state::{OrchestrationState, STATE_VERSION};
use crate::core::types::WorkerStatus;

/// Check that a loaded state can be resumed against `graph`:
/// - known format version and matching project slug
/// - exactly the graph's worker ids
/// - phase records only for populated phases, `complete` implies `launched`
/// - a complete phase has only completed workers
/// - `orchestration_complete` implies every phase complete
/// - a worker with a session belongs to a launched phase
pub fn validate_state(graph: &Graph, state: &OrchestrationState) -> Vec<String> {
    let mut errors = Vec::new();

    if state.version != STATE_VERSION {
        errors.push(format!(
            "unsupported state version {} (expected {STATE_VERSION})",
            state.version
        ));
    }
    if state.project != graph.project().slug {
        errors.push(format!(
            "state belongs to project '{}', graph is '{}'",
            state.project,
            graph.project().slug
        ));
    }
    if state.max_phase != graph.max_phase() {
        errors.push(format!(
            "max_phase {} does not match graph max phase {}",
            state.max_phase,
            graph.max_phase()
        ));
    }

    for worker in graph.workers() {
        if !state.workers.contains_key(&worker.id) {
            errors.push(format!("worker '{}' missing from state", worker.id));
        }
    }
    for id in state.workers.keys() {
        if graph.worker(id).is_none() {
            errors.push(format!("state has unknown worker '{id}'"));
        }
    }

    let populated = graph.phase_numbers();
    for (&phase, record) in &state.phases {
        if !populated.contains(&phase) {
            errors.push(format!("state has record for empty phase {phase}"));
            continue;
        }
        if record.complete && !record.launched {
            errors.push(format!("phase {phase} complete but never launched"));
        }
        if record.complete {
            for worker in graph.workers_in_phase(phase) {
                let status = state.status(&worker.id);
                if status != WorkerStatus::Completed {
                    errors.push(format!(
                        "phase {phase} complete but worker '{}' is {status}",
                        worker.id
                    ));
                }
            }
        }
    }

    if state.orchestration_complete
        && populated.iter().any(|&phase| !state.is_phase_complete(phase))
    {
        errors.push("orchestration complete but a phase is not".to_string());
    }

    for worker in graph.workers() {
        let status = state.status(&worker.id);
        if status.has_session() && !state.is_phase_launched(worker.phase) {
            errors.push(format!(
                "worker '{}' is {status} but phase {} never launched",
                worker.id, worker.phase
            ));
        }
    }

    errors
}
