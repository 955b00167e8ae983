//! `fleet validate`: check config, graph and persisted state without acting.

use std::path::Path;

use anyhow::{Result, anyhow};

use crate::start::open_run;

/// Persisted-state part of a validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateValidation {
    /// No state file yet; the daemon has not run.
    NotStarted,
    /// State file matches the graph.
    Consistent { iteration: u64, current_phase: u32 },
}

/// High-level validation outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateOutcome {
    pub workers: usize,
    pub phases: Vec<u32>,
    pub state: StateValidation,
}

/// Validate `.fleet/` under `root`.
///
/// Graph and config problems surface as `ConfigurationError`, a state file
/// that does not match the graph as `StateStoreCorruption`.
pub fn validate_fleet(root: &Path) -> Result<ValidateOutcome> {
    let fleet_dir = root.join(".fleet");
    if !fleet_dir.is_dir() {
        return Err(anyhow!("missing directory {}", fleet_dir.display()));
    }
    let run = open_run(root)?;
    let state = if run.fresh {
        StateValidation::NotStarted
    } else {
        StateValidation::Consistent {
            iteration: run.state.iteration,
            current_phase: run.state.current_phase,
        }
    };
    Ok(ValidateOutcome {
        workers: run.graph.workers().len(),
        phases: run.graph.phase_numbers(),
        state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::ConfigurationError;
    use crate::io::init::{InitOptions, init_fleet};
    use std::fs;

    #[test]
    fn fresh_scaffold_validates() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_fleet(temp.path(), &InitOptions { force: false }).expect("init");
        let outcome = validate_fleet(temp.path()).expect("validate");
        assert_eq!(outcome.workers, 3);
        assert_eq!(outcome.phases, vec![1, 2]);
        assert_eq!(outcome.state, StateValidation::NotStarted);
    }

    #[test]
    fn cyclic_graph_is_configuration_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_fleet(temp.path(), &InitOptions { force: false }).expect("init");
        fs::write(
            &paths.graph_path,
            r#"{"project": {"name": "x", "slug": "x"},
               "workers": [
                 {"id": "a", "branch": "fleet/a", "dependencies": ["b"]},
                 {"id": "b", "branch": "fleet/b", "dependencies": ["a"]}
               ]}"#,
        )
        .expect("write graph");

        let err = validate_fleet(temp.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigurationError>(),
            Some(ConfigurationError::Cycle { .. })
        ));
    }

    #[test]
    fn missing_fleet_dir_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(validate_fleet(temp.path()).is_err());
    }
}
