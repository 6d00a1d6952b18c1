//! Tracing setup shared by the dosewise binaries.
//!
//! The engine logs through `tracing`; nothing here is required for the
//! core logic, only for surfacing it.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber at the default `info` level
///
/// `RUST_LOG` takes precedence when set, so a deployment can dial any
/// module up or down without a rebuild.
pub fn init() {
    init_with_level("info")
}

/// Install the global subscriber with an explicit default level
///
/// `default_level` is an `EnvFilter` directive (`debug`,
/// `dosewise_core=trace`, ...); `RUST_LOG` still wins when present.
/// Output uses the compact fmt layer.
pub fn init_with_level(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

/// Debug-level subscriber routed to the test writer; repeated calls
/// are harmless
#[cfg(test)]
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("debug"))
        .try_init();
}
