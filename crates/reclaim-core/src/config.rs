//! reclaim.toml configuration parser.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::parse_duration;
use crate::types::BudgetLimit;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReclaimConfig {
    #[serde(default)]
    pub disruption: DisruptionSettings,
    #[serde(default)]
    pub node_pools: Vec<NodePoolConfig>,
}

/// Orchestrator tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisruptionSettings {
    /// Time between evaluation passes (e.g., "10s").
    pub poll_interval: String,
    /// How long a drain may run before the candidate is aborted.
    pub drain_timeout: String,
    /// Deadline applied to every cloud provider call.
    pub call_timeout: String,
    /// Minimum age of an unclaimed cloud instance before it is collected.
    pub orphan_min_age: String,
}

impl Default for DisruptionSettings {
    fn default() -> Self {
        Self {
            poll_interval: "10s".to_string(),
            drain_timeout: "5m".to_string(),
            call_timeout: "30s".to_string(),
            orphan_min_age: "10m".to_string(),
        }
    }
}

/// Parsed form of [`DisruptionSettings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub poll_interval: Duration,
    pub drain_timeout: Duration,
    pub call_timeout: Duration,
    pub orphan_min_age: Duration,
}

impl DisruptionSettings {
    pub fn timings(&self) -> Result<Timings, ConfigError> {
        Ok(Timings {
            poll_interval: parse_duration(&self.poll_interval)?,
            drain_timeout: parse_duration(&self.drain_timeout)?,
            call_timeout: parse_duration(&self.call_timeout)?,
            orphan_min_age: parse_duration(&self.orphan_min_age)?,
        })
    }
}

/// A node pool and its disruption policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodePoolConfig {
    pub name: String,
    #[serde(default)]
    pub budget: BudgetLimit,
    /// Minimum node age before it may be consolidated.
    #[serde(default = "default_consolidate_after")]
    pub consolidate_after: String,
}

fn default_consolidate_after() -> String {
    "30s".to_string()
}

impl ReclaimConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate config text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ReclaimConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let timings = self.disruption.timings()?;
        if timings.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "disruption.poll_interval must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for pool in &self.node_pools {
            if pool.name.is_empty() {
                return Err(ConfigError::Invalid("node pool with empty name".to_string()));
            }
            if !seen.insert(pool.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate node pool: {}",
                    pool.name
                )));
            }
            parse_duration(&pool.consolidate_after)?;
        }
        Ok(())
    }

    /// Minimal config with a single pool, used by `reclaimd` when no file is given.
    pub fn scaffold(pool: &str, budget: BudgetLimit) -> Self {
        ReclaimConfig {
            disruption: DisruptionSettings::default(),
            node_pools: vec![NodePoolConfig {
                name: pool.to_string(),
                budget,
                consolidate_after: "0s".to_string(),
            }],
        }
    }
}
