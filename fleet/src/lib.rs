//! Phased multi-agent orchestration daemon.
//!
//! `fleet` runs a graph of AI coding agents ("workers") against one git
//! repository. Each worker gets its own branch and worktree, runs in its own
//! terminal session, and is observed by polling its output. Workers are
//! grouped into phases; a phase launches once the previous one completes and
//! a grace period passes. The architecture keeps a strict separation:
//!
//! - **[`core`]**: pure, deterministic logic (graph validation, output
//!   classification, status transitions, phase scheduling). No I/O.
//! - **[`io`]**: side effects (filesystem, git, tmux, child processes) behind
//!   the [`io::session::AgentRuntime`], [`io::workspace::Vcs`],
//!   [`io::memory::ContextSource`] and [`io::alerts::AlertSink`] seams.
//!
//! Orchestration modules ([`daemon`], [`looping`], [`phase_ops`], [`start`],
//! [`status`], [`validate`]) coordinate the two to implement CLI commands.

pub mod core;
pub mod daemon;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod phase_ops;
pub mod start;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
