//! Orchestration state persistence (`.fleet/state/orchestration.json`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::debug;

use crate::core::state::OrchestrationState;

/// The persisted state cannot be trusted; the operator must resolve it.
#[derive(Debug, Error)]
#[error("state store {} is corrupt: {detail}", .path.display())]
pub struct StateStoreCorruption {
    pub path: PathBuf,
    pub detail: String,
}

/// Load the persisted state. A missing file means no prior run.
pub fn load_state(path: &Path) -> Result<Option<OrchestrationState>> {
    if !path.exists() {
        debug!(path = %path.display(), "no persisted state");
        return Ok(None);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read state {}", path.display()))?;
    let state: OrchestrationState =
        serde_json::from_str(&contents).map_err(|err| StateStoreCorruption {
            path: path.to_path_buf(),
            detail: err.to_string(),
        })?;
    debug!(
        iteration = state.iteration,
        current_phase = state.current_phase,
        "state loaded"
    );
    Ok(Some(state))
}

/// Atomically write state to disk (temp file + rename).
pub fn write_state(path: &Path, state: &OrchestrationState) -> Result<()> {
    debug!(path = %path.display(), iteration = state.iteration, "writing state");
    let mut buf = serde_json::to_string_pretty(state).context("serialize state")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::Graph;
    use crate::core::types::WorkerStatus;
    use crate::test_support::{contributor, definition};
    use chrono::Utc;

    fn state() -> OrchestrationState {
        let graph = Graph::load(definition(vec![
            contributor("a", 1, &[]),
            contributor("b", 2, &["a"]),
        ]))
        .expect("load");
        OrchestrationState::initialize(&graph)
    }

    #[test]
    fn state_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state/orchestration.json");
        let mut state = state();
        state.mark_phase_launched(1, Utc::now());
        state.worker_mut("a").status = WorkerStatus::Working;
        state.iteration = 7;

        write_state(&path, &state).expect("write");
        let loaded = load_state(&path).expect("load").expect("present");
        assert_eq!(loaded, state);
    }

    #[test]
    fn missing_state_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let loaded = load_state(&temp.path().join("orchestration.json")).expect("load");
        assert!(loaded.is_none());
    }

    #[test]
    fn unparsable_state_is_corruption() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("orchestration.json");
        fs::write(&path, "{\"version\": 1, \"workers\": ").expect("write");
        let err = load_state(&path).unwrap_err();
        let corruption = err
            .downcast_ref::<StateStoreCorruption>()
            .expect("corruption error");
        assert_eq!(corruption.path, path);
    }

    #[test]
    fn abandoned_temp_file_leaves_previous_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("orchestration.json");
        let state = state();
        write_state(&path, &state).expect("write");

        fs::write(temp.path().join("orchestration.json.tmp"), "{ half written").expect("write");
        let loaded = load_state(&path).expect("load").expect("present");
        assert_eq!(loaded, state);
    }
}
