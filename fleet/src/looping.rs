//! Multi-iteration driver for `fleet run`.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::info;

use crate::core::state::OrchestrationState;
use crate::daemon::{Daemon, IterationReport};
use crate::io::alerts::AlertSink;
use crate::io::memory::ContextSource;
use crate::io::session::AgentRuntime;
use crate::io::workspace::Vcs;

/// Bounds for [`run_loop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOptions {
    /// Stop after this many iterations; `None` runs until an error.
    pub max_iterations: Option<u64>,
    /// Sleep between iterations.
    pub poll_interval: Duration,
}

impl LoopOptions {
    pub fn once() -> Self {
        Self {
            max_iterations: Some(1),
            poll_interval: Duration::ZERO,
        }
    }
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub iterations: u64,
    pub orchestration_complete: bool,
}

/// Run daemon iterations until the iteration bound is reached.
///
/// The loop keeps observing after orchestration completes; it only stops on
/// `max_iterations` or on a fatal error (failing to persist state).
pub fn run_loop<R, V, C, S, F>(
    daemon: &Daemon<R, V, C, S>,
    state: &mut OrchestrationState,
    options: &LoopOptions,
    mut on_iteration: F,
) -> Result<LoopOutcome>
where
    R: AgentRuntime,
    V: Vcs,
    C: ContextSource,
    S: AlertSink,
    F: FnMut(&IterationReport),
{
    let mut iterations = 0u64;
    let mut announced_complete = state.orchestration_complete;
    loop {
        let report = daemon.run_iteration(state, Utc::now())?;
        iterations += 1;
        on_iteration(&report);

        if state.orchestration_complete && !announced_complete {
            info!(iterations, "all phases complete; still observing");
            announced_complete = true;
        }
        if options.max_iterations.is_some_and(|max| iterations >= max) {
            return Ok(LoopOutcome {
                iterations,
                orchestration_complete: state.orchestration_complete,
            });
        }
        if !options.poll_interval.is_zero() {
            thread::sleep(options.poll_interval);
        }
    }
}
