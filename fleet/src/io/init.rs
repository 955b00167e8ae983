//! `.fleet/` layout and scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{FleetConfig, write_config};
use super::graph_store::write_graph_definition;
use crate::core::graph::{GraphDefinition, Project, Worker};
use crate::core::types::Role;

/// All canonical paths within `.fleet/` for a project root.
#[derive(Debug, Clone)]
pub struct FleetPaths {
    pub root: PathBuf,
    pub fleet_dir: PathBuf,
    pub state_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub graph_path: PathBuf,
    pub state_path: PathBuf,
    pub alerts_path: PathBuf,
    pub journal_path: PathBuf,
    pub briefs_dir: PathBuf,
    pub workers_dir: PathBuf,
    pub memory_dir: PathBuf,
}

impl FleetPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let fleet_dir = root.join(".fleet");
        let state_dir = fleet_dir.join("state");
        Self {
            root: root.clone(),
            fleet_dir: fleet_dir.clone(),
            state_dir: state_dir.clone(),
            gitignore_path: fleet_dir.join(".gitignore"),
            config_path: fleet_dir.join("config.toml"),
            graph_path: fleet_dir.join("graph.json"),
            state_path: state_dir.join("orchestration.json"),
            alerts_path: fleet_dir.join("alerts.jsonl"),
            journal_path: fleet_dir.join("journal.jsonl"),
            briefs_dir: fleet_dir.join("briefs"),
            workers_dir: fleet_dir.join("workers"),
            memory_dir: fleet_dir.join("memory"),
        }
    }

    /// Absolute worktree directory for a config.
    pub fn worktree_dir(&self, config: &FleetConfig) -> PathBuf {
        self.root.join(&config.worktree_dir)
    }
}

/// Options for [`init_fleet`].
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing fleet-owned files.
    pub force: bool,
}

/// Create `.fleet/` scaffolding in `root`: a sample graph, the default
/// config, and empty instruction and memory directories.
///
/// Fails if `.fleet/` already exists unless `options.force` is set.
pub fn init_fleet(root: &Path, options: &InitOptions) -> Result<FleetPaths> {
    let paths = FleetPaths::new(root);
    if paths.fleet_dir.exists() && !paths.fleet_dir.is_dir() {
        return Err(anyhow!("fleet init: .fleet exists but is not a directory"));
    }
    if paths.fleet_dir.exists() && !options.force {
        return Err(anyhow!(
            "fleet init: .fleet already exists (use --force to overwrite)"
        ));
    }

    create_dir(&paths.fleet_dir)?;
    create_dir(&paths.state_dir)?;
    create_dir(&paths.workers_dir)?;
    create_dir(&paths.memory_dir)?;

    fs::write(&paths.gitignore_path, FLEET_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &FleetConfig::default())?;
    write_graph_definition(&paths.graph_path, &sample_graph(root))?;

    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

/// Two contributors in phase 1 and an integrator on the base branch in phase 2.
fn sample_graph(root: &Path) -> GraphDefinition {
    let slug = slug_for(root);
    let worker = |id: &str, role: Role, branch: &str, phase: u32, deps: &[&str], what: &str| {
        Worker {
            id: id.to_string(),
            role,
            branch: branch.to_string(),
            phase,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            agent: Some("claude".to_string()),
            description: Some(what.to_string()),
        }
    };
    GraphDefinition {
        project: Project {
            name: slug.clone(),
            slug,
            base_branch: "main".to_string(),
            protected_branches: vec!["main".to_string(), "master".to_string()],
        },
        workers: vec![
            worker("backend", Role::Contributor, "fleet/backend", 1, &[], "Implement the server side."),
            worker("frontend", Role::Contributor, "fleet/frontend", 1, &[], "Implement the user interface."),
            worker(
                "integrate",
                Role::Integrator,
                "main",
                2,
                &["backend", "frontend"],
                "Merge the phase 1 branches into main and fix conflicts.",
            ),
        ],
    }
}

/// Project slug derived from the directory name, `project` if nothing usable remains.
fn slug_for(root: &Path) -> String {
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let slug: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '-' })
        .collect();
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() { "project".to_string() } else { slug }
}

const FLEET_GITIGNORE: &str = "state/\nbriefs/\nworktrees/\n*.jsonl\n";
