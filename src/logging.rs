//! Log subscriber setup
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the embedding binary. [`init`] is the stock setup: a `fmt` subscriber
//! filtered by `RUST_LOG` when set, else by [`LoggingConfig::filter`].

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::{Error, Result};

/// Install the global subscriber.
///
/// Returns `Ok(false)` if a global subscriber was already installed, so
/// calling it from several tests is harmless.
///
/// # Errors
///
/// Returns `Error::InvalidConfiguration` if the configured filter directive
/// does not parse.
pub fn init(config: &LoggingConfig) -> Result<bool> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter).map_err(|e| {
            Error::InvalidConfiguration(format!("logging.filter '{}': {e}", config.filter))
        })?,
    };

    Ok(tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi)
        .with_target(true)
        .try_init()
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig {
            filter: "pagesplit=debug".to_string(),
            ansi: false,
        };
        init(&config).unwrap();
        // A subscriber is installed by now, whichever call did it.
        assert!(!init(&config).unwrap());
    }
}
