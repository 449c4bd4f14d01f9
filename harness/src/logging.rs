//! Diagnostic tracing for the harness.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`. Product output
//! (progress lines, verdicts) is printed to stdout by [`crate::cli`], and the
//! per-run artifacts under `<results>/<run_id>/` are written regardless of
//! the log level.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; defaults to `warn`. Compact format on stderr.
///
/// # Example
/// ```bash
/// RUST_LOG=harness=debug harness run weechess.001-ash target/release/weechess
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
