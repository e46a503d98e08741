//! Log output setup for binaries embedding the supervisor.
//!
//! Logs go to stderr so that JSON snapshots written to stdout stay parseable.

use tracing_subscriber::EnvFilter;

/// Installs a fmt subscriber filtered by `RUST_LOG`, else by `default_directive`.
///
/// Returns `false` if a global subscriber was already installed.
///
/// ```
/// devvisor::init_tracing("devvisor=info");
/// assert!(!devvisor::init_tracing("debug"));
/// ```
pub fn init_tracing(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .is_ok()
}
