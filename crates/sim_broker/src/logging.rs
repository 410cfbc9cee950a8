//! Logging bootstrap for binaries and tests.

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber once; respects `RUST_LOG`, defaulting to
/// `info`. Safe to call repeatedly.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
