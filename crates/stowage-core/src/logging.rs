//! Logging setup for binaries, tests and embedders of stowage.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a global subscriber that logs stowage events at `info` and above.
///
/// `RUST_LOG` overrides the level, e.g. `RUST_LOG=stowage::notice=warn`.
/// Panics if a global subscriber is already installed.
pub fn init() {
    init_with_filter("info");
}

/// [`init`] with `default_filter` used when `RUST_LOG` is unset.
pub fn init_with_filter(default_filter: &str) {
    tracing_subscriber::registry()
        .with(env_filter(default_filter))
        .with(fmt::layer().compact())
        .init();
}

/// Like [`init_with_filter`], but returns `false` instead of panicking when a
/// global subscriber is already set. Output goes through the test writer.
pub fn try_init_for_tests(default_filter: &str) -> bool {
    tracing_subscriber::registry()
        .with(env_filter(default_filter))
        .with(fmt::layer().compact().with_test_writer())
        .try_init()
        .is_ok()
}

fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}
