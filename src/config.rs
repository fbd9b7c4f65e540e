//! Analysis configuration
//!
//! Loaded from TOML, overridable from the command line. Every field has a
//! default so an empty file (or no file) is a valid configuration.
//!
//! ```toml
//! realloc_tag_policy = "inherit"
//! max_anomalies = 500
//! clamp_time_regressions = true
//!
//! [analyzers]
//! allocations = true
//! counters = true
//! stats = false
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Where a moved allocation gets its owner and tag from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ReallocTagPolicy {
    /// Use the owner and tag carried by the Realloc event itself
    #[default]
    Event,
    /// Keep the owner and tag of the record being freed
    Inherit,
}

/// Which built-in analyzers a session installs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerToggles {
    pub allocations: bool,
    pub counters: bool,
    pub stats: bool,
}

impl Default for AnalyzerToggles {
    fn default() -> Self {
        Self {
            allocations: true,
            counters: true,
            stats: true,
        }
    }
}

/// Configuration for one analysis session
///
/// # Example
/// ```
/// use rastro::config::{AnalysisConfig, ReallocTagPolicy};
///
/// let config = AnalysisConfig::from_toml_str("realloc_tag_policy = \"inherit\"").unwrap();
/// assert_eq!(config.realloc_tag_policy, ReallocTagPolicy::Inherit);
/// assert!(config.analyzers.stats);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub realloc_tag_policy: ReallocTagPolicy,

    /// Anomalies stored per provider; later ones are only counted
    pub max_anomalies: usize,

    /// Clamp event times that go backwards to the last observed time
    ///
    /// Keeps the allocation timeline sorted by creation time, which lets
    /// point-in-time queries binary search instead of scanning.
    pub clamp_time_regressions: bool,

    pub analyzers: AnalyzerToggles,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            realloc_tag_policy: ReallocTagPolicy::Event,
            max_anomalies: 10_000,
            clamp_time_regressions: true,
            analyzers: AnalyzerToggles::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_anomalies == 0 {
            return Err(ConfigError::Invalid(
                "max_anomalies must be at least 1".to_string(),
            ));
        }
        let toggles = &self.analyzers;
        if !(toggles.allocations || toggles.counters || toggles.stats) {
            return Err(ConfigError::Invalid(
                "at least one analyzer must be enabled".to_string(),
            ));
        }
        Ok(())
    }
}
