//! CLI argument parsing for rastro

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};

use crate::config::{AnalysisConfig, ReallocTagPolicy};

/// Output format for the analysis summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "rastro")]
#[command(version)]
#[command(about = "Replay a binary trace and rebuild allocation, counter and stat state", long_about = None)]
pub struct Cli {
    /// Trace file to analyze
    #[arg(value_name = "TRACE")]
    pub trace: PathBuf,

    /// TOML analysis configuration
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Report point-in-time figures at this session time (seconds)
    #[arg(long = "at", value_name = "SECONDS")]
    pub at: Option<f64>,

    /// Where moved allocations take owner and tag from (overrides config)
    #[arg(long = "realloc-tags", value_enum, value_name = "POLICY")]
    pub realloc_tags: Option<ReallocTagPolicy>,

    /// Anomalies kept per provider (overrides config)
    #[arg(long = "max-anomalies", value_name = "N")]
    pub max_anomalies: Option<usize>,

    /// Records buffered between the reader and analysis threads
    #[arg(long = "channel-capacity", value_name = "N", default_value = "1024")]
    pub channel_capacity: usize,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}

impl Cli {
    /// Config file (or defaults) with command-line overrides applied
    pub fn analysis_config(&self) -> anyhow::Result<AnalysisConfig> {
        let mut config = match &self.config {
            Some(path) => AnalysisConfig::from_toml_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => AnalysisConfig::default(),
        };
        if let Some(policy) = self.realloc_tags {
            config.realloc_tag_policy = policy;
        }
        if let Some(max) = self.max_anomalies {
            config.max_anomalies = max;
        }
        config.validate()?;
        Ok(config)
    }
}
