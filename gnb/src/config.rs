//! gNB configuration file
//!
//! One file configures the scheduling engine, the simulated radio and MAC,
//! the simulated kernel costs and logging. TOML and YAML are both accepted,
//! chosen by file extension.

use common::PipelineConfig;
use interfaces::{SimMacConfig, SimRadioConfig};
use scheduler::ExecutorConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GnbConfig {
    /// Scheduling engine
    pub pipeline: PipelineConfig,
    /// Simulated transport
    pub radio: SimRadioConfig,
    /// Simulated MAC, used when the uplink terminates at the MAC
    pub mac: SimMacConfig,
    /// Simulated per-task kernel costs
    pub executors: ExecutorConfig,
    pub log: LogConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// Track frame latency and print a summary on exit
    pub stats: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            stats: true,
        }
    }
}

impl GnbConfig {
    /// Load a configuration file, YAML for `.yml`/`.yaml`, TOML otherwise
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yml" | "yaml") => Self::from_yaml_str(&contents),
            _ => Self::from_toml_str(&contents),
        }
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn from_yaml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }
}
