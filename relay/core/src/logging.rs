//! Logging setup for binaries built on relay-core

use tracing_subscriber::EnvFilter;

/// Directive used when `RUST_LOG` is not set
#[must_use]
pub fn default_filter(level: &str) -> String {
    format!("relay_core={level},relay_cli={level}")
}

/// Install a stderr `fmt` subscriber
///
/// `RUST_LOG` wins over `level`. Returns `false` if a global subscriber was
/// already installed, which leaves the existing one in place.
pub fn init_logging(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
