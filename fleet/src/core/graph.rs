//! Worker/phase dependency graph.
//!
//! A [`Graph`] is built once per run from a [`GraphDefinition`] and never
//! mutated afterwards. All queries are pure functions of the graph and a
//! [`StatusMap`] snapshot.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::{Role, StatusMap, WorkerStatus, status_of};

/// Structural problems found while loading a graph definition or config.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("graph has no workers")]
    EmptyGraph,

    #[error("invalid {kind} '{value}': {reason}")]
    InvalidName {
        kind: &'static str,
        value: String,
        reason: String,
    },

    #[error("worker '{0}': phase must be >= 1")]
    InvalidPhase(String),

    #[error("duplicate worker id '{0}'")]
    DuplicateWorker(String),

    #[error("worker '{worker}' depends on unknown worker '{dependency}'")]
    UnknownDependency { worker: String, dependency: String },

    #[error("worker '{0}' depends on itself")]
    SelfDependency(String),

    #[error("dependency cycle detected: {}", .members.join(" -> "))]
    Cycle { members: Vec<String> },

    #[error(
        "worker '{worker}' (phase {phase}) depends on '{dependency}' in later phase {dependency_phase}"
    )]
    ForwardDependency {
        worker: String,
        phase: u32,
        dependency: String,
        dependency_phase: u32,
    },

    #[error("worker '{worker}' targets protected branch '{branch}' but is not an integrator")]
    ProtectedBranch { worker: String, branch: String },

    #[error("workers '{first}' and '{second}' both target branch '{branch}'")]
    SharedBranch {
        branch: String,
        first: String,
        second: String,
    },

    #[error("graph definition does not match schema: {0}")]
    Schema(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("worker '{worker}' uses unknown agent profile '{profile}' (known: {})", .known.join(", "))]
    UnknownAgentProfile {
        worker: String,
        profile: String,
        known: Vec<String>,
    },
}

/// Project-level settings of a graph definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub slug: String,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    /// Branches only integrators may target.
    #[serde(default = "default_protected_branches")]
    pub protected_branches: Vec<String>,
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_protected_branches() -> Vec<String> {
    vec!["main".to_string(), "master".to_string()]
}

/// Static description of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub id: String,
    #[serde(default)]
    pub role: Role,
    pub branch: String,
    #[serde(default = "default_phase")]
    pub phase: u32,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Agent profile label (e.g. `claude`); selects `[agent.profiles.<label>]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_phase() -> u32 {
    1
}

impl Worker {
    pub fn is_integrator(&self) -> bool {
        self.role == Role::Integrator
    }
}

/// Serialized graph input (`.fleet/graph.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDefinition {
    pub project: Project,
    pub workers: Vec<Worker>,
}

/// Validated, immutable worker graph.
#[derive(Debug, Clone)]
pub struct Graph {
    project: Project,
    workers: Vec<Worker>,
    index: BTreeMap<String, usize>,
    order: Vec<usize>,
}

impl Graph {
    /// Validate a definition and build the graph.
    pub fn load(definition: GraphDefinition) -> Result<Self, ConfigurationError> {
        let GraphDefinition { project, workers } = definition;
        if workers.is_empty() {
            return Err(ConfigurationError::EmptyGraph);
        }
        validate_name("project slug", &project.slug, false)?;
        validate_name("base branch", &project.base_branch, true)?;

        let mut workers = workers;
        let mut index = BTreeMap::new();
        for (pos, worker) in workers.iter_mut().enumerate() {
            validate_name("worker id", &worker.id, false)?;
            validate_name("branch", &worker.branch, true)?;
            if worker.phase == 0 {
                return Err(ConfigurationError::InvalidPhase(worker.id.clone()));
            }
            if index.insert(worker.id.clone(), pos).is_some() {
                return Err(ConfigurationError::DuplicateWorker(worker.id.clone()));
            }
            let mut seen = HashSet::new();
            worker.dependencies.retain(|dep| seen.insert(dep.clone()));
        }

        for worker in &workers {
            for dep in &worker.dependencies {
                if dep == &worker.id {
                    return Err(ConfigurationError::SelfDependency(worker.id.clone()));
                }
                if !index.contains_key(dep) {
                    return Err(ConfigurationError::UnknownDependency {
                        worker: worker.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let order = topological_order(&workers, &index)?;

        for worker in &workers {
            for dep in &worker.dependencies {
                let dep_phase = workers[index[dep]].phase;
                if dep_phase > worker.phase {
                    return Err(ConfigurationError::ForwardDependency {
                        worker: worker.id.clone(),
                        phase: worker.phase,
                        dependency: dep.clone(),
                        dependency_phase: dep_phase,
                    });
                }
            }
        }

        validate_branches(&project, &workers)?;

        Ok(Self {
            project,
            workers,
            index,
            order,
        })
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    /// Workers in declaration order.
    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn worker(&self, id: &str) -> Option<&Worker> {
        self.index.get(id).map(|&pos| &self.workers[pos])
    }

    pub fn workers_in_phase(&self, phase: u32) -> Vec<&Worker> {
        self.workers.iter().filter(|w| w.phase == phase).collect()
    }

    /// Phase numbers that have at least one worker, ascending.
    pub fn phase_numbers(&self) -> Vec<u32> {
        let phases: BTreeSet<u32> = self.workers.iter().map(|w| w.phase).collect();
        phases.into_iter().collect()
    }

    pub fn max_phase(&self) -> u32 {
        self.workers.iter().map(|w| w.phase).max().unwrap_or(0)
    }

    /// Lowest populated phase strictly greater than `phase`.
    pub fn next_phase_after(&self, phase: u32) -> Option<u32> {
        self.workers
            .iter()
            .map(|w| w.phase)
            .filter(|&p| p > phase)
            .min()
    }

    /// Highest populated phase strictly lower than `phase`.
    pub fn previous_phase_before(&self, phase: u32) -> Option<u32> {
        self.workers
            .iter()
            .map(|w| w.phase)
            .filter(|&p| p < phase)
            .max()
    }

    /// True iff the phase has workers and every one of them is completed.
    pub fn is_phase_complete(&self, phase: u32, statuses: &StatusMap) -> bool {
        let members = self.workers_in_phase(phase);
        !members.is_empty()
            && members
                .iter()
                .all(|w| status_of(statuses, &w.id) == WorkerStatus::Completed)
    }

    pub fn dependencies_met(&self, worker: &Worker, statuses: &StatusMap) -> bool {
        worker
            .dependencies
            .iter()
            .all(|dep| status_of(statuses, dep) == WorkerStatus::Completed)
    }

    /// Workers with at least one dependency that is not completed.
    pub fn blocked_workers(&self, statuses: &StatusMap) -> Vec<&Worker> {
        self.workers
            .iter()
            .filter(|w| !self.dependencies_met(w, statuses))
            .collect()
    }

    /// True when every dependency a phase has on workers outside it is completed.
    pub fn phase_dependencies_satisfied(&self, phase: u32, statuses: &StatusMap) -> bool {
        self.workers_in_phase(phase).iter().all(|worker| {
            worker.dependencies.iter().all(|dep| {
                self.worker(dep).is_some_and(|d| d.phase == phase)
                    || status_of(statuses, dep) == WorkerStatus::Completed
            })
        })
    }

    /// Full topological order of workers; ties follow declaration order.
    pub fn integration_order(&self) -> Vec<&Worker> {
        self.order.iter().map(|&pos| &self.workers[pos]).collect()
    }
}

/// Kahn's algorithm over dependency edges, always taking the ready worker
/// declared first.
fn topological_order(
    workers: &[Worker],
    index: &BTreeMap<String, usize>,
) -> Result<Vec<usize>, ConfigurationError> {
    let mut in_degree: Vec<usize> = workers.iter().map(|w| w.dependencies.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); workers.len()];
    for (pos, worker) in workers.iter().enumerate() {
        for dep in &worker.dependencies {
            dependents[index[dep]].push(pos);
        }
    }

    let mut ready: BTreeSet<usize> = (0..workers.len()).filter(|&p| in_degree[p] == 0).collect();
    let mut order = Vec::with_capacity(workers.len());
    while let Some(pos) = ready.pop_first() {
        order.push(pos);
        for &next in &dependents[pos] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() == workers.len() {
        return Ok(order);
    }
    Err(ConfigurationError::Cycle {
        members: find_cycle(workers, index, &in_degree),
    })
}

/// Walk unresolved dependencies from the first stuck worker until a worker
/// repeats; the repeated segment is a cycle.
fn find_cycle(
    workers: &[Worker],
    index: &BTreeMap<String, usize>,
    in_degree: &[usize],
) -> Vec<String> {
    let Some(start) = (0..workers.len()).find(|&p| in_degree[p] > 0) else {
        return Vec::new();
    };
    let mut path: Vec<usize> = Vec::new();
    let mut current = start;
    loop {
        if let Some(at) = path.iter().position(|&p| p == current) {
            let mut members: Vec<String> = path[at..]
                .iter()
                .map(|&p| workers[p].id.clone())
                .collect();
            members.push(workers[current].id.clone());
            return members;
        }
        path.push(current);
        let next = workers[current]
            .dependencies
            .iter()
            .map(|dep| index[dep])
            .find(|&p| in_degree[p] > 0);
        match next {
            Some(p) => current = p,
            None => return vec![workers[current].id.clone()],
        }
    }
}

fn validate_branches(project: &Project, workers: &[Worker]) -> Result<(), ConfigurationError> {
    let mut owners: BTreeMap<&str, &str> = BTreeMap::new();
    for worker in workers {
        if worker.is_integrator() {
            continue;
        }
        if project.protected_branches.iter().any(|b| b == &worker.branch) {
            return Err(ConfigurationError::ProtectedBranch {
                worker: worker.id.clone(),
                branch: worker.branch.clone(),
            });
        }
        if let Some(first) = owners.insert(&worker.branch, &worker.id) {
            return Err(ConfigurationError::SharedBranch {
                branch: worker.branch.clone(),
                first: first.to_string(),
                second: worker.id.clone(),
            });
        }
    }
    Ok(())
}

/// Ids and branches: non-empty, ASCII alphanumerics plus `-_.`, branches may
/// also use `/`. No leading dash, no `..`.
fn validate_name(kind: &'static str, value: &str, allow_slash: bool) -> Result<(), ConfigurationError> {
    let invalid = |reason: &str| ConfigurationError::InvalidName {
        kind,
        value: value.to_string(),
        reason: reason.to_string(),
    };
    if value.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if value.starts_with('-') {
        return Err(invalid("must not start with '-'"));
    }
    if value.contains("..") {
        return Err(invalid("must not contain '..'"));
    }
    let allowed = |c: char| {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') || (allow_slash && c == '/')
    };
    if !value.chars().all(allowed) {
        return Err(invalid("contains unsupported characters"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{contributor, definition, integrator};

    fn ids(workers: &[&Worker]) -> Vec<String> {
        workers.iter().map(|w| w.id.clone()).collect()
    }

    #[test]
    fn integration_order_respects_edges_and_declaration_ties() {
        let graph = Graph::load(definition(vec![
            contributor("a", 1, &[]),
            contributor("b", 1, &["a"]),
            contributor("c", 1, &["b"]),
            contributor("d", 1, &["a"]),
        ]))
        .expect("load");
        assert_eq!(ids(&graph.integration_order()), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn integration_order_prefers_earlier_declared_ready_worker() {
        let graph = Graph::load(definition(vec![
            contributor("z", 1, &[]),
            contributor("y", 1, &["x"]),
            contributor("x", 1, &[]),
        ]))
        .expect("load");
        assert_eq!(ids(&graph.integration_order()), vec!["z", "x", "y"]);
    }

    #[test]
    fn cycle_is_reported_with_members() {
        let err = Graph::load(definition(vec![
            contributor("root", 1, &[]),
            contributor("a", 1, &["c"]),
            contributor("b", 1, &["a"]),
            contributor("c", 1, &["b"]),
        ]))
        .unwrap_err();
        let ConfigurationError::Cycle { members } = &err else {
            panic!("expected cycle, got {err:?}");
        };
        assert!(members.contains(&"a".to_string()));
        assert!(!members.contains(&"root".to_string()));
        assert_eq!(members.first(), members.last());
        assert!(err.to_string().contains("a"));
    }

    #[test]
    fn cycle_across_phases_is_still_a_cycle() {
        let err = Graph::load(definition(vec![
            contributor("a", 1, &["b"]),
            contributor("b", 2, &["a"]),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::Cycle { .. }));
    }

    #[test]
    fn rejects_structural_errors() {
        let dup = Graph::load(definition(vec![
            contributor("a", 1, &[]),
            contributor("a", 1, &[]),
        ]))
        .unwrap_err();
        assert_eq!(dup, ConfigurationError::DuplicateWorker("a".to_string()));

        let dangling = Graph::load(definition(vec![contributor("a", 1, &["ghost"])])).unwrap_err();
        assert!(matches!(
            dangling,
            ConfigurationError::UnknownDependency { .. }
        ));

        let selfdep = Graph::load(definition(vec![contributor("a", 1, &["a"])])).unwrap_err();
        assert_eq!(selfdep, ConfigurationError::SelfDependency("a".to_string()));

        let forward = Graph::load(definition(vec![
            contributor("a", 1, &["b"]),
            contributor("b", 2, &[]),
        ]))
        .unwrap_err();
        assert!(matches!(
            forward,
            ConfigurationError::ForwardDependency { .. }
        ));

        let empty = Graph::load(definition(Vec::new())).unwrap_err();
        assert_eq!(empty, ConfigurationError::EmptyGraph);

        let zero = Graph::load(definition(vec![contributor("a", 0, &[])])).unwrap_err();
        assert_eq!(zero, ConfigurationError::InvalidPhase("a".to_string()));

        let bad_id = Graph::load(definition(vec![contributor("../x", 1, &[])])).unwrap_err();
        assert!(matches!(bad_id, ConfigurationError::InvalidName { .. }));
    }

    #[test]
    fn protected_branch_requires_integrator() {
        let mut worker = contributor("a", 1, &[]);
        worker.branch = "main".to_string();
        let err = Graph::load(definition(vec![worker])).unwrap_err();
        assert!(matches!(err, ConfigurationError::ProtectedBranch { .. }));

        let graph = Graph::load(definition(vec![
            contributor("a", 1, &[]),
            integrator("merge", 2, &["a"]),
            integrator("release", 3, &["merge"]),
        ]))
        .expect("integrators may share protected branch");
        assert_eq!(graph.max_phase(), 3);
    }

    #[test]
    fn contributors_may_not_share_a_branch() {
        let mut b = contributor("b", 1, &[]);
        b.branch = "fleet/a".to_string();
        let err = Graph::load(definition(vec![contributor("a", 1, &[]), b])).unwrap_err();
        assert!(matches!(err, ConfigurationError::SharedBranch { .. }));
    }

    #[test]
    fn duplicate_dependencies_collapse() {
        let graph = Graph::load(definition(vec![
            contributor("a", 1, &[]),
            contributor("b", 1, &["a", "a"]),
        ]))
        .expect("load");
        assert_eq!(graph.worker("b").expect("b").dependencies, vec!["a"]);
    }

    #[test]
    fn phase_completion_requires_members() {
        let graph = Graph::load(definition(vec![
            contributor("a", 1, &[]),
            contributor("b", 1, &[]),
            contributor("c", 3, &["a"]),
        ]))
        .expect("load");
        let mut statuses = StatusMap::new();
        assert!(!graph.is_phase_complete(1, &statuses));
        statuses.insert("a".to_string(), WorkerStatus::Completed);
        assert!(!graph.is_phase_complete(1, &statuses));
        statuses.insert("b".to_string(), WorkerStatus::Completed);
        assert!(graph.is_phase_complete(1, &statuses));
        assert!(!graph.is_phase_complete(2, &statuses));
        assert!(!graph.is_phase_complete(3, &statuses));
    }

    #[test]
    fn sparse_phases_navigate_without_gaps() {
        let graph = Graph::load(definition(vec![
            contributor("a", 1, &[]),
            contributor("b", 3, &[]),
            contributor("c", 5, &[]),
        ]))
        .expect("load");
        assert_eq!(graph.max_phase(), 5);
        assert_eq!(graph.phase_numbers(), vec![1, 3, 5]);
        assert_eq!(graph.next_phase_after(1), Some(3));
        assert_eq!(graph.next_phase_after(5), None);
        assert_eq!(graph.previous_phase_before(5), Some(3));
        assert_eq!(graph.previous_phase_before(1), None);
    }

    #[test]
    fn blocked_workers_and_phase_dependencies() {
        let graph = Graph::load(definition(vec![
            contributor("a", 1, &[]),
            contributor("b", 1, &["a"]),
            contributor("c", 2, &["a", "b"]),
        ]))
        .expect("load");
        let mut statuses = StatusMap::new();
        assert_eq!(ids(&graph.blocked_workers(&statuses)), vec!["b", "c"]);
        assert!(graph.phase_dependencies_satisfied(1, &statuses));
        assert!(!graph.phase_dependencies_satisfied(2, &statuses));

        statuses.insert("a".to_string(), WorkerStatus::Completed);
        statuses.insert("b".to_string(), WorkerStatus::Working);
        assert_eq!(ids(&graph.blocked_workers(&statuses)), vec!["c"]);
        assert!(!graph.phase_dependencies_satisfied(2, &statuses));

        statuses.insert("b".to_string(), WorkerStatus::Completed);
        assert!(graph.blocked_workers(&statuses).is_empty());
        assert!(graph.phase_dependencies_satisfied(2, &statuses));
    }
}
