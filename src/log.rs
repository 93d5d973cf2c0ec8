//! Structured logging for agentflow.
//!
//! Log levels:
//! - ERROR: Failures that end a run (stall, cancellation, fail-fast abort)
//! - WARN: Node failures and other recoverable conditions
//! - INFO: Run lifecycle (graph built, batch dispatched, run finished)
//! - DEBUG: Per-node transitions and configuration details
//! - TRACE: Agent routing decisions
//!
//! Debug mode can be enabled with `--debug` flag or `AGENTFLOW_DEBUG=1` env var.
//! `RUST_LOG` takes precedence over both when set.

use tracing_subscriber::EnvFilter;

const DEBUG_ENV: &str = "AGENTFLOW_DEBUG";

/// Check whether the debug env var asks for verbose logging.
pub fn debug_from_env() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Default filter directive for the given debug mode.
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "agentflow=debug,warn"
    } else {
        "agentflow=info,warn"
    }
}

/// Install the global tracing subscriber, writing to stderr.
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init(debug: bool) {
    let debug_enabled = debug || debug_from_env();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug_enabled)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
