//! Runtime configuration
//!
//! Values resolve in priority order: command line (clap also folds in the
//! `PLAYROLL_*` environment variables), then the TOML config file, then the
//! compiled defaults below.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Remaining buffered seconds below which the next segment is pushed
pub const DEFAULT_THRESHOLD_SECONDS: f64 = 10.0;

/// Slack allowed when deciding playback has caught up with the buffer
pub const DEFAULT_END_EPSILON_SECONDS: f64 = 0.05;

/// Feedback tick period used by the simulator
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 250;

/// Resolved playroll configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RollConfig {
    pub db_path: PathBuf,
    pub threshold_seconds: f64,
    pub end_epsilon_seconds: f64,
    pub tick_interval_ms: u64,
}

/// Values supplied on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub db_path: Option<PathBuf>,
    pub threshold_seconds: Option<f64>,
    pub config_file: Option<PathBuf>,
}

/// Shape of the TOML config file
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    db_path: Option<PathBuf>,
    threshold_seconds: Option<f64>,
    end_epsilon_seconds: Option<f64>,
    tick_interval_ms: Option<u64>,
}

impl Default for RollConfig {
    fn default() -> Self {
        Self {
            db_path: playroll_common::config::default_db_path(),
            threshold_seconds: DEFAULT_THRESHOLD_SECONDS,
            end_epsilon_seconds: DEFAULT_END_EPSILON_SECONDS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
        }
    }
}

impl RollConfig {
    /// Load configuration, reading the config file from disk
    ///
    /// An explicit `config_file` must exist; the platform default may be absent.
    pub fn load(overrides: ConfigOverrides) -> Result<Self> {
        let table = match &overrides.config_file {
            Some(path) => Some(playroll_common::config::load_config_table(path)?),
            None => playroll_common::config::load_default_config_table()?,
        };

        Self::resolve(overrides, table)
    }

    /// Merge overrides over an already-parsed config table and defaults
    pub fn resolve(overrides: ConfigOverrides, table: Option<toml::Table>) -> Result<Self> {
        let file: FileConfig = match table {
            Some(table) => toml::Value::Table(table)
                .try_into()
                .map_err(|e| Error::Config(format!("Invalid config file: {}", e)))?,
            None => FileConfig::default(),
        };

        let defaults = Self::default();
        let config = Self {
            db_path: overrides
                .db_path
                .or(file.db_path)
                .unwrap_or(defaults.db_path),
            threshold_seconds: overrides
                .threshold_seconds
                .or(file.threshold_seconds)
                .unwrap_or(defaults.threshold_seconds),
            end_epsilon_seconds: file
                .end_epsilon_seconds
                .unwrap_or(defaults.end_epsilon_seconds),
            tick_interval_ms: file.tick_interval_ms.unwrap_or(defaults.tick_interval_ms),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.threshold_seconds.is_finite() || self.threshold_seconds <= 0.0 {
            return Err(Error::Config(format!(
                "threshold_seconds must be a positive number, got {}",
                self.threshold_seconds
            )));
        }
        if !self.end_epsilon_seconds.is_finite() || self.end_epsilon_seconds < 0.0 {
            return Err(Error::Config(format!(
                "end_epsilon_seconds must be non-negative, got {}",
                self.end_epsilon_seconds
            )));
        }
        if self.tick_interval_ms == 0 {
            return Err(Error::Config("tick_interval_ms must be at least 1".to_string()));
        }
        Ok(())
    }
}
