//! Opaque project-memory context handed to workers in their launch brief.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::graph::Worker;

/// Source of a free-form context blob for a worker.
pub trait ContextSource {
    fn context_for(&self, worker: &Worker) -> Result<Option<String>>;
}

/// Reads `<dir>/<worker-id>.md` followed by `<dir>/shared.md`.
#[derive(Debug, Clone)]
pub struct FileContextSource {
    dir: PathBuf,
}

impl FileContextSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ContextSource for FileContextSource {
    fn context_for(&self, worker: &Worker) -> Result<Option<String>> {
        let parts = [
            read_optional(&self.dir.join(format!("{}.md", worker.id)))?,
            read_optional(&self.dir.join("shared.md"))?,
        ];
        let joined = parts.into_iter().flatten().collect::<Vec<_>>().join("\n\n");
        Ok((!joined.is_empty()).then_some(joined))
    }
}

/// No project memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContext;

impl ContextSource for NoContext {
    fn context_for(&self, _worker: &Worker) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Trimmed file contents, `None` when missing or blank.
pub(crate) fn read_optional(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let trimmed = raw.trim();
    Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
}
