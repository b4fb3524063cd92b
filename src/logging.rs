//! Diagnostic tracing for the installer.
//!
//! The operator transcript (questions, `[RUN]` lines, summaries) goes to
//! stdout through the console. Tracing events go to stderr and are filtered
//! by `RUST_LOG`, so they can be captured separately with `2>install.log`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn`, or `info` with `--verbose`.
///
/// # Example
/// ```bash
/// RUST_LOG=gentinstall=debug gentinstall install 2>install.log
/// ```
pub fn init(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
