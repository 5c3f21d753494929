//! Configuration for call trackers
//!
//! Supports loading from JSON/YAML files or building programmatically.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::TrackerError;

/// Tracker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Name of the tracked operation, used as a log field
    #[serde(default = "default_name")]
    pub name: String,

    /// Buffer size of the lifecycle event channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Whether to collect prometheus metrics
    #[serde(default)]
    pub metrics_enabled: bool,

    /// Prefix for metric names
    #[serde(default = "default_metrics_prefix")]
    pub metrics_prefix: String,
}

fn default_name() -> String {
    "tracked_call".to_string()
}

fn default_event_capacity() -> usize {
    256
}

fn default_metrics_prefix() -> String {
    "op_call_tracker".to_string()
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            event_capacity: default_event_capacity(),
            metrics_enabled: false,
            metrics_prefix: default_metrics_prefix(),
        }
    }
}

impl TrackerConfig {
    /// Load configuration from a JSON or YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read tracker config from {}", path.display()))?;

        let config: Self = if path
            .extension()
            .map(|e| e == "yaml" || e == "yml")
            .unwrap_or(false)
        {
            serde_yaml::from_str(&content).with_context(|| "Failed to parse YAML tracker config")?
        } else {
            serde_json::from_str(&content).with_context(|| "Failed to parse JSON tracker config")?
        };

        config.validate()?;
        info!(name = %config.name, "Loaded tracker config from {}", path.display());
        Ok(config)
    }

    /// Create a builder for programmatic configuration
    pub fn builder() -> TrackerConfigBuilder {
        TrackerConfigBuilder::default()
    }

    pub fn validate(&self) -> std::result::Result<(), TrackerError> {
        if self.name.trim().is_empty() {
            return Err(TrackerError::Config("name must not be empty".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(TrackerError::Config(
                "event_capacity must be greater than zero".to_string(),
            ));
        }
        if self.metrics_enabled && self.metrics_prefix.trim().is_empty() {
            return Err(TrackerError::Config(
                "metrics_prefix must not be empty when metrics are enabled".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for TrackerConfig
#[derive(Default)]
pub struct TrackerConfigBuilder {
    config: TrackerConfig,
}

impl TrackerConfigBuilder {
    pub fn name(mut self, name: &str) -> Self {
        self.config.name = name.to_string();
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn metrics(mut self, enabled: bool) -> Self {
        self.config.metrics_enabled = enabled;
        self
    }

    pub fn metrics_prefix(mut self, prefix: &str) -> Self {
        self.config.metrics_prefix = prefix.to_string();
        self
    }

    pub fn build(self) -> TrackerConfig {
        self.config
    }
}
