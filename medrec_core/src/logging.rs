//! Tracing setup shared by the `medrec` binary and the test suites.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Directives used when `RUST_LOG` is unset. sqlx logs every statement at
/// info, which drowns request logs.
pub const DEFAULT_DIRECTIVES: &str = "info,sqlx=warn";

/// Initialize logging with the default directives
///
/// `RUST_LOG` takes precedence when set.
pub fn init() {
    init_with_filter(DEFAULT_DIRECTIVES)
}

/// Initialize logging with specific fallback directives (e.g. `"debug"`)
///
/// Writes compact lines to stderr so command output on stdout stays clean.
pub fn init_with_filter(directives: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();
}

/// Initialize logging for tests; safe to call from every test
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("debug,sqlx=warn"))
        .try_init();
}
