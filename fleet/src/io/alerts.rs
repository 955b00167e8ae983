//! Operator alerts.
//!
//! Alerts are the product signal that a human has to look at a worker. The
//! daemon emits one when a worker enters `Escalated` or `Error`; the default
//! sink appends them to `.fleet/alerts.jsonl` and mirrors them to the log.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::core::types::Severity;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: Severity,
    pub worker_id: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Destination for alerts.
pub trait AlertSink {
    fn emit(&self, alert: &Alert) -> Result<()>;
}

/// Appends one JSON object per line.
#[derive(Debug, Clone)]
pub struct JsonlAlertSink {
    path: PathBuf,
}

impl JsonlAlertSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AlertSink for JsonlAlertSink {
    fn emit(&self, alert: &Alert) -> Result<()> {
        match alert.severity {
            Severity::Critical => error!(
                worker = %alert.worker_id,
                reason = %alert.reason,
                "critical alert"
            ),
            Severity::Warning | Severity::Info => warn!(
                worker = %alert.worker_id,
                severity = %alert.severity,
                reason = %alert.reason,
                "alert"
            ),
        }
        append_json_line(&self.path, alert)
    }
}

/// Append `value` as a single JSON line, creating parent directories.
pub(crate) fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut line = serde_json::to_string(value).context("serialize json line")?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("append {}", path.display()))
}

/// Read every alert in a JSONL file; a missing file is empty.
pub fn read_alerts(path: &Path) -> Result<Vec<Alert>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("parse {} line {}", path.display(), idx + 1))
        })
        .collect()
}
