//! Launch brief composition.
//!
//! A brief tells an agent who it is, where it works and how to report back.
//! It is rendered from `prompts/brief.md` with minijinja, then trimmed to the
//! configured byte budget by dropping optional sections, and finally written
//! to `.fleet/briefs/<worker-id>.md` for the agent to read.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::graph::{Graph, Worker};
use crate::io::memory::{ContextSource, read_optional};

const BRIEF_TEMPLATE: &str = include_str!("prompts/brief.md");

/// Optional sections, dropped first to last when over budget.
const DROP_ORDER: [&str; 2] = ["memory", "dependencies"];

static SECTION_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").ok()
});

/// A rendered brief and where it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Brief {
    pub path: PathBuf,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
struct WorkerView<'a> {
    id: &'a str,
    role: &'a str,
    branch: &'a str,
    phase: u32,
    description: Option<&'a str>,
}

impl<'a> WorkerView<'a> {
    fn from_worker(worker: &'a Worker) -> Self {
        Self {
            id: &worker.id,
            role: worker.role.as_str(),
            branch: &worker.branch,
            phase: worker.phase,
            description: worker.description.as_deref(),
        }
    }
}

/// Renders and stores launch briefs.
pub struct BriefComposer<C> {
    env: Environment<'static>,
    memory: C,
    instructions_dir: PathBuf,
    briefs_dir: PathBuf,
    budget_bytes: usize,
}

impl<C: ContextSource> BriefComposer<C> {
    pub fn new(
        memory: C,
        instructions_dir: impl Into<PathBuf>,
        briefs_dir: impl Into<PathBuf>,
        budget_bytes: usize,
    ) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("brief", BRIEF_TEMPLATE)
            .context("load brief template")?;
        Ok(Self {
            env,
            memory,
            instructions_dir: instructions_dir.into(),
            briefs_dir: briefs_dir.into(),
            budget_bytes,
        })
    }

    /// Render the brief for `worker`, budget it and write it to disk.
    pub fn compose(&self, graph: &Graph, worker: &Worker, workspace: &Path) -> Result<Brief> {
        let rendered = self.render(graph, worker, workspace)?;
        let mut sections = parse_sections(&rendered);
        apply_budget(&mut sections, self.budget_bytes);
        let mut text = join_sections(&sections);
        text.push('\n');

        let path = self.briefs_dir.join(format!("{}.md", worker.id));
        super::write_atomic(&path, &text)?;
        debug!(worker = %worker.id, bytes = text.len(), path = %path.display(), "brief written");
        Ok(Brief { path, text })
    }

    fn render(&self, graph: &Graph, worker: &Worker, workspace: &Path) -> Result<String> {
        let instructions =
            read_optional(&self.instructions_dir.join(format!("{}.md", worker.id)))?;
        let memory = self
            .memory
            .context_for(worker)
            .with_context(|| format!("memory context for {}", worker.id))?;
        let dependencies: Vec<WorkerView<'_>> = worker
            .dependencies
            .iter()
            .filter_map(|id| graph.worker(id))
            .map(WorkerView::from_worker)
            .collect();

        let template = self.env.get_template("brief")?;
        let rendered = template.render(context! {
            project => graph.project(),
            worker => WorkerView::from_worker(worker),
            workspace => workspace.display().to_string(),
            instructions => instructions,
            dependencies => dependencies,
            memory => memory,
        })?;
        Ok(rendered)
    }
}

#[derive(Debug, Clone)]
struct Section {
    key: String,
    required: bool,
    content: String,
}

/// Split rendered output on `<!-- section:KEY required|droppable -->` markers.
/// Empty droppable sections are discarded.
fn parse_sections(rendered: &str) -> Vec<Section> {
    let Some(re) = SECTION_RE.as_ref() else {
        return vec![Section {
            key: "all".to_string(),
            required: true,
            content: rendered.trim().to_string(),
        }];
    };
    let markers: Vec<(usize, usize, String, bool)> = re
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let key = caps.get(1)?.as_str().to_string();
            let required = caps.get(2)?.as_str() == "required";
            Some((whole.start(), whole.end(), key, required))
        })
        .collect();

    markers
        .iter()
        .enumerate()
        .filter_map(|(i, (_, body_start, key, required))| {
            let body_end = markers
                .get(i + 1)
                .map_or(rendered.len(), |(next_start, ..)| *next_start);
            let content = rendered[*body_start..body_end].trim().to_string();
            (!content.is_empty() || *required).then(|| Section {
                key: key.clone(),
                required: *required,
                content,
            })
        })
        .collect()
}

fn total_len(sections: &[Section]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

/// Drop optional sections in [`DROP_ORDER`], then truncate the longest
/// remaining section if the brief is still too large.
fn apply_budget(sections: &mut Vec<Section>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            let dropped = sections.remove(idx);
            debug!(section = key, bytes_dropped = dropped.content.len(), "dropped brief section");
        }
    }

    let total = total_len(sections);
    if total <= budget {
        return;
    }
    let Some(longest) = sections.iter_mut().max_by_key(|s| s.content.len()) else {
        return;
    };
    const NOTICE: &str = "\n[truncated]";
    let keep = longest
        .content
        .len()
        .saturating_sub(total - budget)
        .saturating_sub(NOTICE.len());
    let cut = floor_char_boundary(&longest.content, keep);
    longest.content.truncate(cut);
    longest.content.push_str(NOTICE);
    debug!(section = %longest.key, kept_bytes = cut, "truncated brief section");
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    (0..=index).rev().find(|&i| text.is_char_boundary(i)).unwrap_or(0)
}

fn join_sections(sections: &[Section]) -> String {
    sections
        .iter()
        .filter(|s| !s.content.is_empty())
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
