//! autoprov.toml configuration parser.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::timing::check_timing;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoProvConfig {
    /// Name this node reports its counts under.
    pub node_name: String,
    /// Directory for the persistent count store.
    pub data_dir: PathBuf,
    /// Port for the REST API.
    pub api_port: u16,
    pub aggregator: AggregatorConfig,
    pub stats: StatsConfig,
}

/// Evaluation loop timing for the region aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Seconds between evaluation iterations (fractional allowed).
    pub interval_sec: f64,
    /// Seconds past each interval boundary to evaluate at.
    pub offset_sec: f64,
}

/// Count generator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Seconds between count exports. Should match the aggregator interval.
    pub interval_sec: f64,
    pub offset_sec: f64,
    /// Number of independently locked counter shards.
    pub shards: usize,
}

impl Default for AutoProvConfig {
    fn default() -> Self {
        Self {
            node_name: "autoprovd".to_string(),
            data_dir: PathBuf::from("/var/lib/autoprov"),
            api_port: 8450,
            aggregator: AggregatorConfig::default(),
            stats: StatsConfig::default(),
        }
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            interval_sec: 300.0,
            offset_sec: 20.0,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            interval_sec: 300.0,
            offset_sec: 0.0,
            shards: 10,
        }
    }
}

impl AutoProvConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: AutoProvConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject settings the loops cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        check_timing(self.aggregator.interval_sec, self.aggregator.offset_sec)
            .map_err(|e| anyhow::anyhow!("aggregator: {e}"))?;
        check_timing(self.stats.interval_sec, self.stats.offset_sec)
            .map_err(|e| anyhow::anyhow!("stats: {e}"))?;
        if self.stats.shards == 0 {
            anyhow::bail!("stats.shards must be at least 1");
        }
        Ok(())
    }
}
