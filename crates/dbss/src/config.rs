// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Database State Server configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// DBSS configuration: the identifier range it owns plus the channels and
/// schema paths it needs to operate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Inclusive lower bound of the owned DOID range.
    pub range_min: u32,
    /// Inclusive upper bound of the owned DOID range.
    pub range_max: u32,
    /// Bus channel of the Database Server.
    pub database_channel: u64,
    /// This DBSS instance's own bus channel.
    pub bus_channel: u64,
    /// Paths to `.dc` schema files to load at startup.
    pub dc_file_paths: Vec<String>,
    /// Log level, kept for parity with sibling services even though the
    /// binary drives its subscriber from `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate that the range is well-formed and at least one schema file is configured.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.range_min > self.range_max {
            return Err(ConfigError::Invalid(format!(
                "range_min ({}) must not exceed range_max ({})",
                self.range_min, self.range_max
            )));
        }
        if self.dc_file_paths.is_empty() {
            return Err(ConfigError::Invalid(
                "dc_file_paths must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn contains(&self, doid: u32) -> bool {
        (self.range_min..=self.range_max).contains(&doid)
    }
}

/// Config builder for fluent, programmatic construction (tests, embedding).
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    range_min: Option<u32>,
    range_max: Option<u32>,
    database_channel: Option<u64>,
    bus_channel: Option<u64>,
    dc_file_paths: Vec<String>,
    log_level: Option<String>,
}

impl ConfigBuilder {
    pub fn range(mut self, min: u32, max: u32) -> Self {
        self.range_min = Some(min);
        self.range_max = Some(max);
        self
    }

    pub fn database_channel(mut self, channel: u64) -> Self {
        self.database_channel = Some(channel);
        self
    }

    pub fn bus_channel(mut self, channel: u64) -> Self {
        self.bus_channel = Some(channel);
        self
    }

    pub fn dc_file(mut self, path: impl Into<String>) -> Self {
        self.dc_file_paths.push(path.into());
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    pub fn build(self) -> Config {
        Config {
            range_min: self.range_min.unwrap_or(0),
            range_max: self.range_max.unwrap_or(u32::MAX),
            database_channel: self.database_channel.unwrap_or(0),
            bus_channel: self.bus_channel.unwrap_or(0),
            dc_file_paths: self.dc_file_paths,
            log_level: self.log_level.unwrap_or_else(default_log_level),
        }
    }
}
