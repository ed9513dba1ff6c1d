//! Subskrybent tracing dla binarki `biomatch`

use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer};

use crate::config::LogFormat;

pub const LOG_ENV: &str = "BIOMATCH_LOG";

/// Filter from `BIOMATCH_LOG`, else from the verbosity count
pub fn env_filter(verbose: u8) -> EnvFilter {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber; `log` records from the core crate are
/// bridged as well. A second call is a no-op.
pub fn init_tracing(format: LogFormat, verbose: u8) {
    let filter = env_filter(verbose);
    let layer = match format {
        LogFormat::Text => fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
    };

    // Err means a subscriber is already installed (tests)
    let _ = tracing_subscriber::registry().with(layer).try_init();
}
