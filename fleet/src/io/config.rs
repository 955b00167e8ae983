//! Daemon configuration stored under `.fleet/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::graph::{ConfigurationError, Graph};

/// Fleet configuration (TOML).
///
/// Edited by humans; every field has a default so a missing file or a
/// partial file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FleetConfig {
    /// Sleep between daemon iterations.
    pub poll_interval_secs: u64,

    /// Delay between a phase completing and the next phase launching.
    pub grace_period_secs: u64,

    /// Lines of session output captured per observation.
    pub snapshot_lines: usize,

    /// Upper bound for each session runtime command.
    pub command_timeout_secs: u64,

    /// Directory (relative to the project root) holding worker worktrees.
    pub worktree_dir: PathBuf,

    /// Launch briefs larger than this drop optional sections.
    pub brief_budget_bytes: usize,

    /// A live worker whose output has not changed for this long raises one
    /// warning. 0 disables the check.
    pub stale_after_secs: u64,

    pub confirmation: ConfirmationConfig,

    pub agent: AgentConfig,
}

/// Bounded corrective action for confirmation prompts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConfirmationConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 2_000,
        }
    }
}

/// How agent sessions are started and addressed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent command; `{brief_file}`, `{workspace}` and `{worker}` are substituted.
    pub command: Vec<String>,
    /// Session name prefix; the project slug is appended.
    pub session_prefix: String,
    /// Keys sent to acknowledge a confirmation prompt.
    pub acknowledge_keys: Vec<String>,
    /// Named command templates selected by a worker's `agent` label.
    pub profiles: BTreeMap<String, AgentProfile>,
}

/// `[agent.profiles.<name>]`: how to start one kind of agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentProfile {
    /// Same placeholders as `agent.command`.
    pub command: Vec<String>,
}

fn claude_command() -> Vec<String> {
    vec![
        "claude".to_string(),
        "Read the launch brief at {brief_file} and follow it.".to_string(),
    ]
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: claude_command(),
            session_prefix: "fleet".to_string(),
            acknowledge_keys: vec!["Enter".to_string()],
            profiles: BTreeMap::from([(
                "claude".to_string(),
                AgentProfile {
                    command: claude_command(),
                },
            )]),
        }
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            grace_period_secs: 60,
            snapshot_lines: 100,
            command_timeout_secs: 10,
            worktree_dir: PathBuf::from(".fleet/worktrees"),
            brief_budget_bytes: 40_000,
            stale_after_secs: 300,
            confirmation: ConfirmationConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

impl FleetConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |msg: &str| Err(ConfigurationError::InvalidConfig(msg.to_string()));
        if self.poll_interval_secs == 0 {
            return invalid("poll_interval_secs must be > 0");
        }
        if self.snapshot_lines == 0 {
            return invalid("snapshot_lines must be > 0");
        }
        if self.command_timeout_secs == 0 {
            return invalid("command_timeout_secs must be > 0");
        }
        if self.brief_budget_bytes == 0 {
            return invalid("brief_budget_bytes must be > 0");
        }
        if self.worktree_dir.as_os_str().is_empty() || self.worktree_dir.is_absolute() {
            return invalid("worktree_dir must be a non-empty relative path");
        }
        if self.confirmation.max_attempts == 0 {
            return invalid("confirmation.max_attempts must be > 0");
        }
        if self.agent.command.first().is_none_or(|c| c.trim().is_empty()) {
            return invalid("agent.command must be a non-empty array");
        }
        if self.agent.session_prefix.trim().is_empty() {
            return invalid("agent.session_prefix must not be empty");
        }
        if self.agent.acknowledge_keys.is_empty() {
            return invalid("agent.acknowledge_keys must not be empty");
        }
        for (name, profile) in &self.agent.profiles {
            if profile.command.first().is_none_or(|c| c.trim().is_empty()) {
                return invalid(&format!(
                    "agent.profiles.{name}.command must be a non-empty array"
                ));
            }
        }
        Ok(())
    }

    /// Every worker `agent` label must name a configured profile.
    pub fn validate_agents(&self, graph: &Graph) -> Result<(), ConfigurationError> {
        for worker in graph.workers() {
            if let Some(agent) = &worker.agent
                && !self.agent.profiles.contains_key(agent)
            {
                return Err(ConfigurationError::UnknownAgentProfile {
                    worker: worker.id.clone(),
                    profile: agent.clone(),
                    known: self.agent.profiles.keys().cloned().collect(),
                });
            }
        }
        Ok(())
    }

    pub fn stale_after(&self) -> Option<chrono::Duration> {
        if self.stale_after_secs == 0 {
            return None;
        }
        i64::try_from(self.stale_after_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn grace_period(&self) -> chrono::Duration {
        i64::try_from(self.grace_period_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn confirmation_delay(&self) -> Duration {
        Duration::from_millis(self.confirmation.delay_ms)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `FleetConfig::default()`.
pub fn load_config(path: &Path) -> Result<FleetConfig> {
    if !path.exists() {
        return Ok(FleetConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: FleetConfig = toml::from_str(&contents)
        .map_err(|err| ConfigurationError::InvalidConfig(format!("{}: {err}", path.display())))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &FleetConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
