//! Stable exit codes for fleet CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid configuration, graph or persisted state, or any other error.
pub const INVALID: i32 = 1;
/// A runtime conflict needs the operator: workspace collision, launch
/// failure, or workspaces retained when closing a phase.
pub const CONFLICT: i32 = 2;
