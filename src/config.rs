//! Configuration management for the batching engine.

use crate::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main configuration for a batching engine instance
///
/// # Structure
/// - **Mandatory fields** (from environment): `engine_name`
/// - **Optional fields** (from config file or defaults): `binning`, `pool`, `processing`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine instance name (mandatory, from FLOWBIN_ENGINE_NAME env var, must be unique)
    pub engine_name: String,

    /// Bin admission and eviction bounds (optional, from config file or defaults)
    #[serde(default)]
    pub binning: BinSettings,

    /// Consumer pool settings (optional, from config file or defaults)
    #[serde(default)]
    pub pool: PoolSettings,

    /// Driver loop and runtime settings (optional, from config file or defaults)
    #[serde(default)]
    pub processing: ProcessingSettings,
}

impl EngineConfig {
    /// Load mandatory configuration from environment variables
    ///
    /// Only reads mandatory fields:
    /// - `FLOWBIN_ENGINE_NAME`: Unique engine instance name (required)
    ///
    /// All binning, pool and processing settings use defaults. To customize
    /// these, load from a config file or set them explicitly.
    pub fn from_env() -> EngineResult<Self> {
        let engine_name = env::var("FLOWBIN_ENGINE_NAME")
            .map_err(|_| EngineError::config("FLOWBIN_ENGINE_NAME is required"))?;

        Ok(Self {
            engine_name,
            binning: BinSettings::default(),
            pool: PoolSettings::default(),
            processing: ProcessingSettings::default(),
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::config(format!("Failed to read config file {}: {}", path, e))
        })?;

        toml::from_str(&content).map_err(|e| {
            EngineError::config(format!("Failed to parse config file {}: {}", path, e))
        })
    }

    /// Apply environment variable overrides to mandatory fields only
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("FLOWBIN_ENGINE_NAME") {
            self.engine_name = val;
        }
    }

    /// Validate the configuration
    ///
    /// Bound-pair violations are configuration-time errors, never runtime ones.
    pub fn validate(&self) -> EngineResult<()> {
        if self.engine_name.is_empty() {
            return Err(EngineError::config("engine_name cannot be empty"));
        }

        if let Some(max) = self.binning.maximum_group_size {
            if self.binning.minimum_group_size > max {
                return Err(EngineError::config(
                    "minimum_group_size must be less than or equal to maximum_group_size",
                ));
            }
        }

        if let Some(max) = self.binning.maximum_entries {
            if self.binning.minimum_entries > max {
                return Err(EngineError::config(
                    "minimum_entries must be less than or equal to maximum_entries",
                ));
            }
        }

        if self.binning.max_bin_count == 0 {
            return Err(EngineError::config("max_bin_count must be > 0"));
        }

        if self.pool.max_leases == 0 {
            return Err(EngineError::config("max_leases must be > 0"));
        }

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine_name: "default-engine".to_string(),
            binning: BinSettings::default(),
            pool: PoolSettings::default(),
            processing: ProcessingSettings::default(),
        }
    }
}

/// Bin admission and eviction bounds
///
/// Minimum bounds are eviction-readiness criteria; maximum bounds are admission
/// criteria. Unset maximums mean unbounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinSettings {
    /// Minimum total size of a bin (bytes) before it is eligible for eviction
    #[serde(default)]
    pub minimum_group_size: u64,

    /// Maximum total size of a bin (bytes). If not specified, there is no maximum.
    #[serde(default)]
    pub maximum_group_size: Option<u64>,

    /// Minimum number of entries before a bin is eligible for eviction
    #[serde(default = "default_minimum_entries")]
    pub minimum_entries: usize,

    /// Maximum number of entries in a bin. If not specified, there is no maximum.
    #[serde(default)]
    pub maximum_entries: Option<usize>,

    /// Maximum number of bins held in memory at any one time
    #[serde(default = "default_max_bin_count")]
    pub max_bin_count: usize,

    /// Maximum age of a bin (milliseconds) before it is evicted regardless of
    /// fill level. If not specified, bins never age out.
    #[serde(default)]
    pub max_bin_age_ms: Option<u64>,
}

fn default_minimum_entries() -> usize {
    1
}
fn default_max_bin_count() -> usize {
    100
}

impl BinSettings {
    /// Maximum bin age as a `Duration`, if configured
    pub fn max_bin_age(&self) -> Option<Duration> {
        self.max_bin_age_ms.map(Duration::from_millis)
    }
}

impl Default for BinSettings {
    fn default() -> Self {
        Self {
            minimum_group_size: 0,
            maximum_group_size: None,
            minimum_entries: 1,
            maximum_entries: None,
            max_bin_count: 100,
            max_bin_age_ms: None,
        }
    }
}

/// Consumer pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Maximum number of concurrently leased client handles
    #[serde(default = "default_max_leases")]
    pub max_leases: usize,

    /// Grace period (milliseconds) to wait for active leases before force-closing
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,
}

fn default_max_leases() -> usize {
    4
}
fn default_close_grace_ms() -> u64 {
    5000
}

impl PoolSettings {
    /// Close grace period as a `Duration`
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_leases: 4,
            close_grace_ms: 5000,
        }
    }
}

/// Driver loop and runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingSettings {
    /// Sleep between ticks (milliseconds) when a tick made no progress
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_tick_interval_ms() -> u64 {
    100
}
fn default_log_level() -> String {
    "info".to_string()
}

impl ProcessingSettings {
    /// Idle tick interval as a `Duration`
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.engine_name, "default-engine");
        assert_eq!(config.binning.minimum_group_size, 0);
        assert_eq!(config.binning.minimum_entries, 1);
        assert_eq!(config.binning.max_bin_count, 100);
        assert!(config.binning.maximum_group_size.is_none());
        assert!(config.binning.max_bin_age().is_none());
        assert_eq!(config.pool.max_leases, 4);
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        assert!(config.validate().is_ok());

        config.engine_name = "".to_string();
        assert!(config.validate().is_err());
        config.engine_name = "merge-engine".to_string();

        config.binning.minimum_group_size = 100;
        config.binning.maximum_group_size = Some(50);
        assert!(config.validate().is_err());
        config.binning.maximum_group_size = Some(100);
        assert!(config.validate().is_ok());

        config.binning.minimum_entries = 10;
        config.binning.maximum_entries = Some(5);
        assert!(config.validate().is_err());
        config.binning.maximum_entries = None;
        assert!(config.validate().is_ok());

        config.binning.max_bin_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            engine_name = "csv-merger"

            [binning]
            minimum_entries = 3
            maximum_entries = 10
            max_bin_count = 5
            max_bin_age_ms = 30000

            [processing]
            tick_interval_ms = 50
        "#;

        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine_name, "csv-merger");
        assert_eq!(config.binning.minimum_entries, 3);
        assert_eq!(config.binning.maximum_entries, Some(10));
        assert_eq!(config.binning.max_bin_count, 5);
        assert_eq!(
            config.binning.max_bin_age(),
            Some(Duration::from_millis(30000))
        );
        // unspecified sections fall back to defaults
        assert_eq!(config.pool.max_leases, 4);
        assert_eq!(config.processing.tick_interval_ms, 50);
    }
}
