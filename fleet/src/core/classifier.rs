//! Classification of worker output snapshots into [`WorkerState`].
//!
//! Every marker lives in [`MARKERS`]. Rules, applied to the last
//! [`TAIL_LINES`] non-empty lines after stripping terminal escapes:
//!
//! - an explicit `WORKER_ERROR` report anywhere in the window yields
//!   `ErrorDetected`;
//! - otherwise the lowest line carrying a marker decides, with table order
//!   breaking ties on that line. Tool failures such as `fatal:` only count
//!   while they are the latest thing on screen, since agents often recover;
//! - text with no marker is `Idle`.
//!
//! `Completed` is only ever produced by an explicit completion marker on a
//! line of its own, so text that merely quotes the marker does not count.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::WorkerState;

/// Number of trailing non-empty lines considered.
pub const TAIL_LINES: usize = 40;

/// Explicit error report from the worker.
const ERROR_REPORT: &str = r"^\s*(?:[⏺●•]\s*)?WORKER_ERROR\b";

/// Marker table: `(state, pattern)`. Order matters for same-line ties.
pub const MARKERS: &[(WorkerState, &str)] = &[
    (WorkerState::ErrorDetected, ERROR_REPORT),
    (WorkerState::ErrorDetected, r"(?i)\bfatal:"),
    (WorkerState::ErrorDetected, r"(?i)\bpanicked at\b"),
    (WorkerState::ErrorDetected, r"(?i)\bsegmentation fault\b"),
    (
        WorkerState::ErrorDetected,
        r"(?i)\b(?:api|authentication|overloaded|rate[ -]limit) error\b",
    ),
    (WorkerState::ErrorDetected, r"(?i)\bcommand not found\b"),
    (
        WorkerState::QuestionForOperator,
        r"^\s*(?:[⏺●•]\s*)?QUESTION_FOR_OPERATOR\b",
    ),
    (
        WorkerState::QuestionForOperator,
        r"(?i)\b(?:need|needs|require|requires) (?:human|operator|your) (?:input|decision|guidance|judg(?:e)?ment)\b",
    ),
    (
        WorkerState::QuestionForOperator,
        r"(?i)\bwhich (?:option|approach) (?:do|would) you (?:prefer|like)\b",
    ),
    (WorkerState::QuestionForOperator, r"(?i)^\s*should i\b.*\?\s*$"),
    (WorkerState::AwaitingConfirmation, r"(?i)[\[(]y/n[\])]"),
    (
        WorkerState::AwaitingConfirmation,
        r"(?i)\bdo you want to (?:proceed|continue|make this edit|create|run|allow)\b",
    ),
    (
        WorkerState::AwaitingConfirmation,
        r"(?i)\bpress enter to (?:continue|confirm)\b",
    ),
    (
        WorkerState::AwaitingConfirmation,
        r"(?i)^\s*❯\s*1\.\s*yes\b",
    ),
    (
        WorkerState::Completed,
        r"^\s*(?:[⏺●•]\s*)?WORKER_COMPLETE\s*$",
    ),
    (WorkerState::Completed, r"(?i)^\s*status:\s*complete\s*$"),
    (WorkerState::Working, r"(?i)\b(?:esc|ctrl\+c) to interrupt\b"),
    (WorkerState::Working, r"[⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏]"),
    (WorkerState::Working, r"^\s*[✻✽✢✶·*]\s+\w+(?:…|\.\.\.)"),
    (WorkerState::Working, r"\bWORKER_PROGRESS\b"),
];

static COMPILED: LazyLock<Vec<(WorkerState, Regex)>> = LazyLock::new(|| {
    MARKERS
        .iter()
        .filter_map(|(state, pattern)| Regex::new(pattern).ok().map(|re| (*state, re)))
        .collect()
});

static ERROR_REPORT_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(ERROR_REPORT).ok());

static ANSI_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]").ok()
});

/// Classification result with the line that decided it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub state: WorkerState,
    /// The marker line, `None` when no marker matched.
    pub evidence: Option<String>,
}

/// Classify a snapshot, returning only the state.
pub fn classify(snapshot: &str) -> WorkerState {
    classify_detail(snapshot).state
}

/// Classify a snapshot and keep the deciding line.
pub fn classify_detail(snapshot: &str) -> Classification {
    let cleaned = strip_ansi(snapshot);
    let lines = tail_lines(&cleaned, TAIL_LINES);

    let reported = ERROR_REPORT_RE.as_ref();
    for line in &lines {
        if reported.is_some_and(|re| re.is_match(line)) {
            return Classification {
                state: WorkerState::ErrorDetected,
                evidence: Some(line.trim().to_string()),
            };
        }
    }

    for line in lines.iter().rev() {
        if let Some(state) = line_state(line) {
            return Classification {
                state,
                evidence: Some(line.trim().to_string()),
            };
        }
    }

    Classification {
        state: WorkerState::Idle,
        evidence: None,
    }
}

/// First matching marker for a line, in table order.
fn line_state(line: &str) -> Option<WorkerState> {
    COMPILED
        .iter()
        .find(|(_, re)| re.is_match(line))
        .map(|(state, _)| *state)
}

/// Remove terminal escape sequences and carriage returns.
pub fn strip_ansi(text: &str) -> String {
    let stripped = match ANSI_RE.as_ref() {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_string(),
    };
    stripped.replace('\r', "")
}

fn tail_lines(text: &str, limit: usize) -> Vec<&str> {
    let mut lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() > limit {
        lines.drain(..lines.len() - limit);
    }
    lines
}
