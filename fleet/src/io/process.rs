//! Bounded child processes: a deadline plus a cap on captured output.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Captured output of a finished (or killed) child.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes discarded beyond the capture limit, stdout plus stderr.
    pub truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Error unless the command exited zero before its deadline.
    pub fn ensure_success(&self, label: &str) -> Result<()> {
        if self.timed_out {
            return Err(anyhow!("{label} timed out"));
        }
        if !self.status.success() {
            let stderr = String::from_utf8_lossy(&self.stderr);
            return Err(anyhow!(
                "{label} exited with {:?}: {}",
                self.status.code(),
                stderr.trim()
            ));
        }
        Ok(())
    }
}

/// Run `cmd` with stdin closed, killing it after `timeout`.
///
/// Both pipes are drained on reader threads while the child runs so a chatty
/// child cannot block on a full pipe; bytes past `output_limit_bytes` are
/// counted and dropped.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs()))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let program = cmd.get_program().to_string_lossy().into_owned();
    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawn {program}"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_reader = thread::spawn(move || read_limited(stdout, output_limit_bytes));
    let stderr_reader = thread::spawn(move || read_limited(stderr, output_limit_bytes));

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for child")? {
        Some(status) => (status, false),
        None => {
            warn!(program = %program, "child timed out, killing");
            child.kill().context("kill child")?;
            (child.wait().context("reap child")?, true)
        }
    };

    let (stdout, stdout_dropped) = join_reader(stdout_reader)?;
    let (stderr, stderr_dropped) = join_reader(stderr_reader)?;
    debug!(program = %program, exit_code = ?status.code(), timed_out, "child finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        truncated: stdout_dropped + stderr_dropped,
        timed_out,
    })
}

fn join_reader(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read child output")?;
        if n == 0 {
            return Ok((kept, dropped));
        }
        let room = limit.saturating_sub(kept.len()).min(n);
        kept.extend_from_slice(&chunk[..room]);
        dropped += n - room;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_status() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "printf hello; exit 3"]);
        let out = run_command_with_timeout(cmd, Duration::from_secs(5), 1024).expect("run");
        assert_eq!(out.stdout_text(), "hello");
        assert_eq!(out.status.code(), Some(3));
        assert!(out.ensure_success("sh").is_err());
    }

    #[test]
    fn truncates_beyond_limit() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "printf 0123456789"]);
        let out = run_command_with_timeout(cmd, Duration::from_secs(5), 4).expect("run");
        assert_eq!(out.stdout, b"0123");
        assert_eq!(out.truncated, 6);
    }

    #[test]
    fn kills_on_timeout() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 5"]);
        let out = run_command_with_timeout(cmd, Duration::from_millis(100), 1024).expect("run");
        assert!(out.timed_out);
        assert!(out.ensure_success("sleep").is_err());
    }
}
