//! Tracing subscriber setup for cumulus.
//!
//! The VFS core only emits `tracing` events and spans. Hosts decide where they
//! go by calling [`init_tracing`] once at startup; test binaries call
//! [`init_test_tracing`] so `RUST_LOG=cumulus_vfs=debug cargo test` shows the
//! setup and locking chatter next to the failing assertion.
//!
//! Both are safe to call more than once: a second call is a no-op.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a stderr subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` (e.g. `"info"` or `"cumulus_vfs=debug"`).
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_tracing(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .is_ok()
}

/// Install a subscriber that writes through the test harness capture.
pub fn init_test_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_test_writer())
        .try_init();
}
