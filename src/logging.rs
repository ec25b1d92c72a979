//! Tracing setup for embedding hosts
//!
//! The engine only emits `tracing` events; hosts that do not bring
//! their own subscriber can call `init` once at startup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a formatted subscriber. `RUST_LOG` wins over the supplied
/// default filter. Safe to call more than once; later calls are
/// no-ops.
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// `init` with the engine's usual default: quiet overall, debug for
/// this crate
pub fn init_default() {
    init("info,jubilee_core=debug");
}
