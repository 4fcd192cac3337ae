//! Diagnostic logging setup
//!
//! Diagnostics go to stderr through `tracing`; stdout is reserved for the run
//! summary. `RUST_LOG` overrides the level derived from the CLI verbosity.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

use crate::cli::VerbosityLevel;

static INIT_ONCE: Once = Once::new();

/// Default filter directive for a verbosity level
pub fn default_directive(verbosity: VerbosityLevel) -> &'static str {
    match verbosity {
        VerbosityLevel::Quiet => "rewrite_xml=warn",
        VerbosityLevel::Normal => "rewrite_xml=info",
        VerbosityLevel::Verbose => "rewrite_xml=debug",
        VerbosityLevel::Debug => "rewrite_xml=trace",
    }
}

/// Initialize the tracing subscriber. Later calls are no-ops.
pub fn init(verbosity: VerbosityLevel) {
    INIT_ONCE.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

        // Another subscriber may already be installed (e.g. by a test harness).
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    });
}
