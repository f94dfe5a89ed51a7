//! Settings for the analysis and the `packet-loss` command line tool.
//!
//! Typically loaded from YAML with `serde_yaml`; a missing file falls back to
//! the defaults in `etc/example-config.yml`.
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::gap_engine::StartPolicy;
use crate::report::Thresholds;

const DEFAULT_CONFIG_STR: &str = include_str!("../etc/example-config.yml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Which key type connections are tracked under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
    #[default]
    Tuple,
    Packed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub start_policy: StartPolicy,

    #[serde(default)]
    pub key: KeyMode,

    #[serde(default = "default_stale_after")]
    pub stale_after: String,

    #[serde(default = "default_critical_after")]
    pub critical_after: String,

    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
}

fn default_stale_after() -> String {
    "20s".to_string()
}

fn default_critical_after() -> String {
    "60s".to_string()
}

fn default_progress_interval() -> u64 {
    1_000_000
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            start_policy: StartPolicy::default(),
            key: KeyMode::default(),
            stale_after: default_stale_after(),
            critical_after: default_critical_after(),
            progress_interval: default_progress_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_yaml_str(&contents),
            Err(e) => {
                warn!("could not open config ({e}), using default config");
                Self::from_yaml_str(DEFAULT_CONFIG_STR)
            }
        }
    }

    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_yaml_str(DEFAULT_CONFIG_STR)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let thresholds = self.analysis.thresholds()?;
        if thresholds.critical_after_secs < thresholds.stale_after_secs {
            return Err(ConfigError::Invalid(
                "critical_after must not be shorter than stale_after".into(),
            ));
        }

        if self.analysis.progress_interval == 0 {
            return Err(ConfigError::Invalid(
                "progress_interval must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

impl AnalysisConfig {
    pub fn thresholds(&self) -> Result<Thresholds, ConfigError> {
        let stale = parse_duration(&self.stale_after)
            .map_err(|e| ConfigError::Invalid(format!("Invalid stale_after: {e}")))?;
        let critical = parse_duration(&self.critical_after)
            .map_err(|e| ConfigError::Invalid(format!("Invalid critical_after: {e}")))?;

        Ok(Thresholds {
            stale_after_secs: stale.as_secs_f64(),
            critical_after_secs: critical.as_secs_f64(),
        })
    }
}

pub fn parse_duration(duration_str: &str) -> Result<Duration, ConfigError> {
    let mut s = duration_str.trim().to_string();
    if s.ends_with("ms") {
        s.truncate(s.len() - 2);
        Ok(Duration::from_millis(s.parse::<u64>().map_err(|e| {
            ConfigError::Invalid(format!("Invalid milliseconds value: {e}"))
        })?))
    } else if s.ends_with('s') {
        s.truncate(s.len() - 1);
        Ok(Duration::from_secs(s.parse::<u64>().map_err(|e| {
            ConfigError::Invalid(format!("Invalid seconds value: {e}"))
        })?))
    } else if s.ends_with('m') {
        s.truncate(s.len() - 1);
        let minutes = s
            .parse::<u64>()
            .map_err(|e| ConfigError::Invalid(format!("Invalid minutes value: {e}")))?;
        minutes
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| ConfigError::Invalid(format!("duration out of range: {duration_str}")))
    } else if s.ends_with('h') {
        s.truncate(s.len() - 1);
        let hours = s
            .parse::<u64>()
            .map_err(|e| ConfigError::Invalid(format!("Invalid hours value: {e}")))?;
        hours
            .checked_mul(3600)
            .map(Duration::from_secs)
            .ok_or_else(|| ConfigError::Invalid(format!("duration out of range: {duration_str}")))
    } else {
        Err(ConfigError::Invalid(format!(
            "invalid suffix in duration: {duration_str}"
        )))
    }
}
