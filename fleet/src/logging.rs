//! Diagnostic tracing for the fleet daemon.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: diagnostics via `RUST_LOG`, output to stderr.
//!   Not persisted.
//!
//! - **Alerts and journal (`io/alerts`, `io/journal`)**: product artifacts in
//!   `.fleet/`. Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "fleet=info";

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, falling back to [`DEFAULT_FILTER`]. Output: stderr,
/// compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=fleet=debug fleet run --once
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
