//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::Error;
use crate::config::Config;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides `log.level`. Output is JSON in production or when
/// `log.format = "json"`, human-readable otherwise.
pub fn init(config: &Config) -> crate::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log.level))
        .map_err(|e| Error::Config(format!("Invalid log level {:?}: {e}", config.log.level)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if json_output(config) {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}

/// Whether logs should be emitted as JSON lines.
pub fn json_output(config: &Config) -> bool {
    config.app.is_production() || config.log.format == "json"
}
