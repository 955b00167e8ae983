//! tmux-backed [`AgentRuntime`].
//!
//! One tmux session per project (`<prefix>-<slug>`), one window per worker.
//! Windows are addressed with exact-match targets (`=name`) so a worker id
//! that prefixes another never aliases it.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument};

use crate::io::config::{AgentProfile, FleetConfig};
use crate::io::process::{CommandOutput, run_command_with_timeout};
use crate::io::session::{AgentRuntime, SessionHandle, Signal, StartRequest};

const OUTPUT_LIMIT_BYTES: usize = 512 * 1024;

/// Runs each worker's agent in a tmux window.
#[derive(Debug, Clone)]
pub struct TmuxRuntime {
    session: String,
    command: Vec<String>,
    profiles: BTreeMap<String, AgentProfile>,
    acknowledge_keys: Vec<String>,
    snapshot_lines: usize,
    timeout: Duration,
}

impl TmuxRuntime {
    pub fn new(project_slug: &str, config: &FleetConfig) -> Self {
        Self {
            session: format!("{}-{}", config.agent.session_prefix, project_slug),
            command: config.agent.command.clone(),
            profiles: config.agent.profiles.clone(),
            acknowledge_keys: config.agent.acknowledge_keys.clone(),
            snapshot_lines: config.snapshot_lines,
            timeout: config.command_timeout(),
        }
    }

    pub fn session_name(&self) -> &str {
        &self.session
    }

    /// Command template for a worker's agent label; unlabeled workers use
    /// `agent.command`.
    fn command_for(&self, agent: Option<&str>) -> Result<&[String]> {
        match agent {
            None => Ok(&self.command),
            Some(name) => self
                .profiles
                .get(name)
                .map(|profile| profile.command.as_slice())
                .ok_or_else(|| anyhow!("no agent profile named '{name}'")),
        }
    }

    fn tmux(&self, args: &[&str]) -> Result<CommandOutput> {
        let mut cmd = Command::new("tmux");
        cmd.args(args);
        run_command_with_timeout(cmd, self.timeout, OUTPUT_LIMIT_BYTES)
    }

    fn tmux_checked(&self, args: &[&str]) -> Result<CommandOutput> {
        let out = self.tmux(args)?;
        out.ensure_success(&format!("tmux {}", args.first().copied().unwrap_or_default()))?;
        Ok(out)
    }

    fn has_session(&self) -> Result<bool> {
        let target = format!("={}", self.session);
        let out = self.tmux(&["has-session", "-t", &target])?;
        Ok(out.status.success() && !out.timed_out)
    }
}

impl AgentRuntime for TmuxRuntime {
    fn handle_for(&self, worker_id: &str) -> SessionHandle {
        SessionHandle(format!("={}:={}", self.session, window_name(worker_id)))
    }

    #[instrument(skip_all, fields(worker = request.worker_id))]
    fn start(&self, request: &StartRequest<'_>) -> Result<SessionHandle> {
        let argv = render_command(self.command_for(request.agent)?, request);
        let shell = shell_join(&argv);
        let window = window_name(request.worker_id);
        let workspace = request.workspace.to_string_lossy();
        if self.has_session()? {
            let target = format!("={}:", self.session);
            self.tmux_checked(&[
                "new-window", "-d", "-t", &target, "-n", &window, "-c", &workspace, &shell,
            ])?;
        } else {
            self.tmux_checked(&[
                "new-session",
                "-d",
                "-s",
                &self.session,
                "-n",
                &window,
                "-c",
                &workspace,
                &shell,
            ])?;
        }
        debug!(session = %self.session, window = %window, "tmux window created");
        Ok(self.handle_for(request.worker_id))
    }

    fn is_alive(&self, handle: &SessionHandle) -> Result<bool> {
        let Some((_, window)) = handle.as_str().split_once(":=") else {
            return Err(anyhow!("malformed tmux handle '{}'", handle.as_str()));
        };
        let target = format!("={}", self.session);
        let out = self.tmux(&[
            "list-windows",
            "-t",
            &target,
            "-F",
            "#{window_name} #{pane_dead}",
        ])?;
        if out.timed_out || !out.status.success() {
            return Ok(false);
        }
        Ok(parse_window_list(&out.stdout_text())
            .iter()
            .any(|(name, dead)| name == window && !dead))
    }

    fn read_output(&self, handle: &SessionHandle) -> Result<String> {
        let start = format!("-{}", self.snapshot_lines);
        let out = self.tmux_checked(&[
            "capture-pane",
            "-p",
            "-J",
            "-t",
            handle.as_str(),
            "-S",
            &start,
        ])?;
        Ok(out.stdout_text())
    }

    fn send_signal(&self, handle: &SessionHandle, signal: &Signal) -> Result<()> {
        match signal {
            Signal::Acknowledge => {
                let mut args = vec!["send-keys", "-t", handle.as_str()];
                args.extend(self.acknowledge_keys.iter().map(String::as_str));
                self.tmux_checked(&args)?;
            }
        }
        Ok(())
    }
}

/// tmux treats `.` and `:` in targets as separators, so both are escaped
/// with `_`, which is itself doubled. Distinct ids give distinct names.
fn window_name(worker_id: &str) -> String {
    let mut name = String::with_capacity(worker_id.len());
    for c in worker_id.chars() {
        match c {
            '_' => name.push_str("__"),
            '.' => name.push_str("_d"),
            ':' => name.push_str("_c"),
            other => name.push(other),
        }
    }
    name
}

/// Substitute `{brief_file}`, `{workspace}` and `{worker}` in each argument.
fn render_command(template: &[String], request: &StartRequest<'_>) -> Vec<String> {
    let brief = path_text(request.brief_path);
    let workspace = path_text(request.workspace);
    template
        .iter()
        .map(|arg| {
            arg.replace("{brief_file}", &brief)
                .replace("{workspace}", &workspace)
                .replace("{worker}", request.worker_id)
        })
        .collect()
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '=' | ':' | ','));
    if plain {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Parse `#{window_name} #{pane_dead}` lines into `(name, dead)`.
fn parse_window_list(out: &str) -> Vec<(String, bool)> {
    out.lines()
        .filter_map(|line| {
            let (name, dead) = line.trim_end().rsplit_once(' ')?;
            Some((name.to_string(), dead == "1"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::Graph;
    use crate::test_support::{contributor, definition};
    use std::collections::BTreeSet;

    #[test]
    fn handles_are_exact_match_targets() {
        let runtime = TmuxRuntime::new("demo", &FleetConfig::default());
        assert_eq!(runtime.session_name(), "fleet-demo");
        assert_eq!(runtime.handle_for("api.v2").as_str(), "=fleet-demo:=api_dv2");
        assert_eq!(runtime.handle_for("api").as_str(), "=fleet-demo:=api");
    }

    #[test]
    fn distinct_worker_ids_never_share_a_window() {
        let graph = Graph::load(definition(vec![
            contributor("a.b", 1, &[]),
            contributor("a_b", 1, &[]),
            contributor("a_db", 1, &[]),
            contributor("a__b", 1, &[]),
        ]))
        .expect("ids are valid");
        let runtime = TmuxRuntime::new("demo", &FleetConfig::default());
        let handles: BTreeSet<SessionHandle> = graph
            .workers()
            .iter()
            .map(|w| runtime.handle_for(&w.id))
            .collect();
        assert_eq!(handles.len(), graph.workers().len());
        assert!(handles.iter().all(|h| !h.as_str()["=fleet-demo:=".len()..].contains('.')));
    }

    #[test]
    fn agent_label_selects_profile_command() {
        let mut config = FleetConfig::default();
        config.agent.profiles.insert(
            "codex".to_string(),
            AgentProfile {
                command: vec!["codex".to_string(), "{brief_file}".to_string()],
            },
        );
        let runtime = TmuxRuntime::new("demo", &config);
        assert_eq!(runtime.command_for(None).expect("default"), config.agent.command.as_slice());
        assert_eq!(runtime.command_for(Some("codex")).expect("codex")[0], "codex");
        assert!(runtime.command_for(Some("cursor")).is_err());
    }

    #[test]
    fn renders_and_quotes_agent_command() {
        let template = vec![
            "claude".to_string(),
            "Read {brief_file} and work in {workspace} as {worker}".to_string(),
        ];
        let request = StartRequest {
            worker_id: "api",
            agent: None,
            workspace: Path::new("/repo/.fleet/worktrees/api"),
            brief_path: Path::new("/repo/.fleet/briefs/api.md"),
        };
        let argv = render_command(&template, &request);
        assert_eq!(
            argv[1],
            "Read /repo/.fleet/briefs/api.md and work in /repo/.fleet/worktrees/api as api"
        );
        assert_eq!(
            shell_join(&argv),
            "claude 'Read /repo/.fleet/briefs/api.md and work in /repo/.fleet/worktrees/api as api'"
        );
    }

    #[test]
    fn quotes_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn parses_window_list() {
        let windows = parse_window_list("api 0\nweb ui 1\n");
        assert_eq!(
            windows,
            vec![("api".to_string(), false), ("web ui".to_string(), true)]
        );
    }
}
