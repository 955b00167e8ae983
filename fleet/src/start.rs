//! Loading a run: config, graph and persisted state.
//!
//! Every command that touches orchestration state goes through [`open_run`],
//! so a state file that no longer matches the graph is rejected before the
//! daemon or a manual operation can act on it.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info};

use crate::core::graph::Graph;
use crate::core::invariants::validate_state;
use crate::core::state::OrchestrationState;
use crate::io::config::{FleetConfig, load_config};
use crate::io::graph_store::load_graph;
use crate::io::init::FleetPaths;
use crate::io::state_store::{StateStoreCorruption, load_state};

/// Everything a command needs to act on a run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub paths: FleetPaths,
    pub config: FleetConfig,
    pub graph: Graph,
    pub state: OrchestrationState,
    /// True when no state file existed and `state` was initialized from the graph.
    pub fresh: bool,
}

/// Load config, graph and state for the project at `root`.
pub fn open_run(root: &Path) -> Result<RunContext> {
    let paths = FleetPaths::new(root);
    if !paths.graph_path.is_file() {
        return Err(anyhow!(
            "missing {} (run `fleet init` first)",
            paths.graph_path.display()
        ));
    }
    let config = load_config(&paths.config_path).context("load config.toml")?;
    let graph = load_graph(&paths.graph_path)?;
    config.validate_agents(&graph)?;

    let (state, fresh) = match load_state(&paths.state_path)? {
        Some(state) => {
            let violations = validate_state(&graph, &state);
            if !violations.is_empty() {
                return Err(StateStoreCorruption {
                    path: paths.state_path.clone(),
                    detail: violations.join("; "),
                }
                .into());
            }
            debug!(iteration = state.iteration, "resuming persisted state");
            (state, false)
        }
        None => {
            info!(project = %graph.project().slug, "initializing orchestration state");
            (OrchestrationState::initialize(&graph), true)
        }
    };

    Ok(RunContext {
        paths,
        config,
        graph,
        state,
        fresh,
    })
}
