//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Installs a fmt subscriber filtered at `level`.
///
/// `RUST_LOG`, when set, takes precedence over `level`. Returns false if a
/// global subscriber was already installed, which leaves the existing one in
/// place.
pub fn init(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}

/// Installs a subscriber using the configured log level.
pub fn init_from_config(config: &LoggingConfig) -> bool {
    init(&config.log_level)
}
