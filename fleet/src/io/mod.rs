//! Side-effecting adapters: filesystem, git, tmux and child processes.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

pub mod alerts;
pub mod brief;
pub mod config;
pub mod git;
pub mod graph_store;
pub mod init;
pub mod journal;
pub mod memory;
pub mod process;
pub mod session;
pub mod state_store;
pub mod tmux;
pub mod workspace;

/// Write `contents` next to `path` and rename it into place, so readers see
/// either the old file or the new one.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents).with_context(|| format!("write temp {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
