//! Logging setup for the gridsync binary.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::config::LoggingConfig;

/// Environment variable that overrides the configured filter.
pub const LOG_ENV: &str = "GRIDSYNC_LOG";

fn filter_for(config: &LoggingConfig) -> EnvFilter {
    match std::env::var(LOG_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::new(directives),
        _ => EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

/// Install the global subscriber. Logs go to stderr so stdout stays
/// reserved for replay output.
pub fn init(config: &LoggingConfig) {
    let layer = fmt::layer().with_writer(std::io::stderr).with_target(true);
    // A second init (tests, embedding) keeps the first subscriber.
    let _ = Registry::default().with(filter_for(config)).with(layer).try_init();
}
