//! Configuration module for persistent settings.
//!
//! This module handles loading, saving, and validating daemon configuration.

use crate::error::ConfigError;
use crate::governor::GOVERNOR_NAME;
use crate::tunables::{Tunables, MAX_THRESHOLD};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Default devfreq device directory.
pub const DEFAULT_DEVFREQ_PATH: &str = "/sys/class/devfreq/gpu";
/// Default busy-percent file used as the load source.
pub const DEFAULT_LOAD_PATH: &str = "/sys/class/drm/card0/device/gpu_busy_percent";
/// Default activity sampling period in milliseconds.
pub const DEFAULT_ACTIVITY_POLL_MS: u64 = 10;

/// Location of the GPU in sysfs.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    pub devfreq_path: PathBuf,
    pub load_path: PathBuf,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            devfreq_path: PathBuf::from(DEFAULT_DEVFREQ_PATH),
            load_path: PathBuf::from(DEFAULT_LOAD_PATH),
        }
    }
}

/// Daemon configuration.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Governor selected at startup
    pub governor: String,
    pub device: DeviceConfig,
    /// Load sampling period of the activity monitor
    pub activity_poll_ms: u64,
    /// Applied to the governor after it starts
    pub tunables: Tunables,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            governor: GOVERNOR_NAME.to_string(),
            device: DeviceConfig::default(),
            activity_poll_ms: DEFAULT_ACTIVITY_POLL_MS,
            tunables: Tunables::default(),
        }
    }
}

impl Config {
    /// Validate configuration values.
    /// Returns Ok(()) if valid, Err with descriptive message if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.governor.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "governor name must not be empty".to_string(),
            ));
        }

        if self.activity_poll_ms == 0 {
            return Err(ConfigError::ValidationError(
                "activity_poll_ms must be at least 1".to_string(),
            ));
        }

        let t = &self.tunables;
        for (name, value) in [
            ("up_threshold", t.up_threshold),
            ("down_threshold", t.down_threshold),
        ] {
            if value > MAX_THRESHOLD {
                return Err(ConfigError::ValidationError(format!(
                    "{} ({}) must not exceed {}",
                    name, value, MAX_THRESHOLD
                )));
            }
        }

        for (name, value) in [
            ("history_size", t.history_size),
            ("poll_interval", t.poll_interval),
            ("frame_done_deadline", t.frame_done_deadline),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be at least 1",
                    name
                )));
            }
        }

        Ok(())
    }
}

/// Configuration manager with file I/O.
pub struct ConfigManager {
    config: RwLock<Config>,
    path: PathBuf,
}

impl ConfigManager {
    /// Load configuration from file or use defaults.
    /// If the file doesn't exist, returns a manager with default config.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            let contents = fs::read_to_string(path).map_err(|e| {
                ConfigError::ParseError(format!("Failed to read config file: {}", e))
            })?;

            let config: Config = serde_json::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(format!("Invalid JSON: {}", e)))?;

            config.validate()?;
            config
        } else {
            Config::default()
        };

        Ok(Self {
            config: RwLock::new(config),
            path: path.to_path_buf(),
        })
    }

    /// Save configuration to file using atomic write.
    pub fn save(&self) -> Result<(), ConfigError> {
        let json = {
            let config = self.config.read().map_err(|_| {
                ConfigError::ValidationError("Failed to acquire read lock".to_string())
            })?;
            serde_json::to_string_pretty(&*config).map_err(|e| {
                ConfigError::ParseError(format!("Failed to serialize config: {}", e))
            })?
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write to a sibling temp file, then rename over the target
        let temp_path = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    /// Get current configuration.
    pub fn get(&self) -> Config {
        self.config
            .read()
            .map(|c| c.clone())
            .unwrap_or_else(|_| Config::default())
    }

    /// Validate, replace and persist the configuration.
    pub fn update(&self, config: Config) -> Result<(), ConfigError> {
        config.validate()?;

        {
            let mut current = self.config.write().map_err(|_| {
                ConfigError::ValidationError("Failed to acquire write lock".to_string())
            })?;
            *current = config;
        }

        self.save()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Default config path (`$XDG_CONFIG_HOME/on3demand/config.json`).
    pub fn default_path() -> PathBuf {
        config_dir().join("config.json")
    }
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("on3demand"))
        .unwrap_or_else(|| PathBuf::from("/tmp/on3demand"))
}
