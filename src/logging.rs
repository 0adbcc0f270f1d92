//! Tracing subscriber setup for the `nbvm` binary.
//!
//! Log lines go to stderr so `--print-script` output on stdout stays clean.
//! Verbosity is read from `NBVM_LOG` using `EnvFilter` directive syntax and
//! defaults to `info`.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable holding the log filter directives.
pub const LOG_ENV_VAR: &str = "NBVM_LOG";

/// Filter used when [`LOG_ENV_VAR`] is unset or invalid.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Builds the filter from `directives`, falling back to
/// [`DEFAULT_LOG_FILTER`] when they are missing or do not parse.
#[must_use]
pub fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Installs the global subscriber. Later calls are ignored.
pub fn init_logging() {
    let directives = std::env::var(LOG_ENV_VAR).ok();
    tracing_subscriber::registry()
        .with(log_filter(directives.as_deref()))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()
        .ok();
}
