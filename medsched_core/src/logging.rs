//! Logging setup for hosts embedding the rescheduling engine.
//!
//! The engine itself only emits `tracing` events; installing a subscriber is
//! left to whoever drives it.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a compact subscriber at `info`, overridable with `RUST_LOG`
pub fn init() {
    init_with_level("info")
}

/// Install a compact subscriber with the given default filter
///
/// `RUST_LOG` still wins when set, e.g. `RUST_LOG=medsched_core::evaluator=debug`
/// to trace every candidate check.
pub fn init_with_level(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_target(true))
        .init();
}

/// Route engine logs into the test harness output
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("medsched_core=debug"))
        .try_init();
}
