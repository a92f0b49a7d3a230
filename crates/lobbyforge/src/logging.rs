//! Tracing bootstrap for binaries and demos.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "lobbyforge=info";

/// Installs a formatted `tracing` subscriber filtered by `RUST_LOG`,
/// falling back to [`DEFAULT_FILTER`].
///
/// Safe to call more than once; returns `false` if a global subscriber
/// was already installed.
pub fn init() -> bool {
    init_with_default(DEFAULT_FILTER)
}

/// Like [`init`] with a caller-chosen fallback filter.
pub fn init_with_default(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
