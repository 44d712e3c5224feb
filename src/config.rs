//! Engine configuration
//!
//! Loaded from TOML. Every section and field is optional and falls back to
//! its default:
//!
//! ```toml
//! [optimizer]
//! interval_secs = 300
//! max_step_fraction = 0.25
//! floor_weight = 5.0
//!
//! [publisher]
//! key_prefix = "snapshots/"
//! max_attempts = 3
//! retry_backoff_ms = 50
//!
//! [logging]
//! filter = "info"
//! ansi = true
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Traffic optimizer settings
    pub optimizer: OptimizerConfig,
    /// Snapshot publisher settings
    pub publisher: PublisherConfig,
    /// Log output settings
    pub logging: LoggingConfig,
}

/// Traffic optimizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Seconds between scheduled passes
    pub interval_secs: u64,
    /// Fraction of the distance to the target weights moved per pass, in (0, 1)
    pub max_step_fraction: f64,
    /// Weight the policy never pushes a variant below
    pub floor_weight: f64,
}

impl OptimizerConfig {
    /// Scheduler period.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            max_step_fraction: 0.25,
            floor_weight: 5.0,
        }
    }
}

/// Snapshot publisher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Prefix of artifact keys (`{prefix}{content_unit}.json`)
    pub key_prefix: String,
    /// Write attempts per publication
    pub max_attempts: u32,
    /// Pause between attempts
    pub retry_backoff_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            key_prefix: "snapshots/".to_string(),
            max_attempts: 3,
            retry_backoff_ms: 50,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,
    /// Colored output
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            ansi: true,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// - `Error::Config` for malformed TOML
    /// - `Error::InvalidConfiguration` if [`EngineConfig::validate`] fails
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read, otherwise as
    /// [`EngineConfig::from_toml_str`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let input = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&input)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfiguration` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        let optimizer = &self.optimizer;
        if optimizer.interval_secs == 0 {
            return Err(invalid("optimizer.interval_secs must be positive"));
        }
        if !(optimizer.max_step_fraction > 0.0 && optimizer.max_step_fraction < 1.0) {
            return Err(invalid(format!(
                "optimizer.max_step_fraction must be within (0, 1), got {}",
                optimizer.max_step_fraction
            )));
        }
        // Two variants must both be able to sit at the floor.
        if !(optimizer.floor_weight.is_finite()
            && optimizer.floor_weight >= 0.0
            && optimizer.floor_weight <= 50.0)
        {
            return Err(invalid(format!(
                "optimizer.floor_weight must be within [0, 50], got {}",
                optimizer.floor_weight
            )));
        }
        if self.publisher.max_attempts == 0 {
            return Err(invalid("publisher.max_attempts must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidConfiguration(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.optimizer.interval(), Duration::from_secs(300));
        assert_eq!(config.publisher.key_prefix, "snapshots/");
    }

    #[test]
    fn test_partial_section() {
        let config = EngineConfig::from_toml_str(
            r#"
            [optimizer]
            max_step_fraction = 0.5

            [logging]
            filter = "pagesplit=debug"
            "#,
        )
        .unwrap();
        assert!((config.optimizer.max_step_fraction - 0.5).abs() < f64::EPSILON);
        assert!((config.optimizer.floor_weight - 5.0).abs() < f64::EPSILON);
        assert_eq!(config.logging.filter, "pagesplit=debug");
        assert!(config.logging.ansi);
    }

    #[test]
    fn test_out_of_range_rejected() {
        for doc in [
            "[optimizer]\nmax_step_fraction = 1.0",
            "[optimizer]\nmax_step_fraction = 0.0",
            "[optimizer]\nfloor_weight = -1.0",
            "[optimizer]\nfloor_weight = 60.0",
            "[optimizer]\ninterval_secs = 0",
            "[publisher]\nmax_attempts = 0",
        ] {
            assert!(
                matches!(
                    EngineConfig::from_toml_str(doc),
                    Err(Error::InvalidConfiguration(_))
                ),
                "accepted: {doc}"
            );
        }
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            EngineConfig::from_toml_str("[optimizer\n"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "[publisher]\nkey_prefix = \"ab/\"\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.publisher.key_prefix, "ab/");

        assert!(matches!(
            EngineConfig::load(dir.path().join("missing.toml")),
            Err(Error::Io(_))
        ));
    }
}
