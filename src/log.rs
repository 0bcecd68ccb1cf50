//! Structured logging setup.
//!
//! The engine logs through `tracing` macros and never installs a subscriber
//! itself; binaries and tests call [`init`] or [`init_with_debug`].
//!
//! Log levels:
//! - ERROR: Failures that end a query without a usable answer
//! - WARN: Recoverable conditions (classifier fallback, tool failover, cancellation)
//! - INFO: Query lifecycle (admission, routing, completion)
//! - DEBUG: Node scheduling and capability attempts
//! - TRACE: Raw capability payloads
//!
//! Debug mode can be enabled with `init_with_debug(true)` or `SWARM_DEBUG=1`.
//! `RUST_LOG` overrides the level chosen here.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::EnvFilter;

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Environment variable that turns on debug logging.
pub const DEBUG_ENV: &str = "SWARM_DEBUG";

/// Initialize logging at INFO (or DEBUG when `SWARM_DEBUG` is set).
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging with explicit debug mode setting.
///
/// Safe to call more than once; only the first subscriber is installed.
pub fn init_with_debug(debug: bool) {
    let env_debug = std::env::var(DEBUG_ENV)
        .map(|v| parse_flag(&v))
        .unwrap_or(false);

    let debug_enabled = debug || env_debug;
    DEBUG_ENABLED.store(debug_enabled, Ordering::SeqCst);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug_enabled)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Check if debug mode is enabled.
pub fn is_debug() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "query_swarm=debug"
    } else {
        "query_swarm=info"
    }
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}
