//! Log subscriber setup for the CLI
//!
//! Library code only emits `tracing` events; installing a subscriber is the
//! binary's job.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable holding the log filter (e.g. `debug`, `eraflow=trace`)
pub const LOG_LEVEL_ENV: &str = "ERAFLOW_LOG_LEVEL";

/// Install the global subscriber writing to stderr.
///
/// `verbose` forces debug level; otherwise `ERAFLOW_LOG_LEVEL` is used,
/// falling back to `warn`. `json` switches to one JSON object per line.
pub fn init(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_LEVEL_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    let _ = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
}
