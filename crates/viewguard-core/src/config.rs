//! TOML-based application configuration.
//!
//! Stores runtime tuning for the enforcement core:
//! - Timer tick interval and session persistence
//! - Settings pull interval
//! - Lock batch retry policy and interruption defaults
//! - Device identity and cache file name
//!
//! Configuration is stored at `~/.config/viewguard/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.toml";

/// Returns `~/.config/viewguard[-dev]/` based on VIEWGUARD_ENV.
///
/// Set VIEWGUARD_ENV=dev to use the development data directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("VIEWGUARD_ENV").unwrap_or_else(|_| "production".to_string());
    let dir = if env == "dev" {
        base_dir.join("viewguard-dev")
    } else {
        base_dir.join("viewguard")
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}

/// Timer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerConfig {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Keep today's watched minutes across restarts.
    #[serde(default)]
    pub persist_session: bool,
}

impl TimerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

/// Settings pull configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_pull_interval")]
    pub pull_interval_secs: u64,
}

impl SyncConfig {
    pub fn pull_interval(&self) -> Duration {
        Duration::from_secs(self.pull_interval_secs)
    }
}

/// Lock propagation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
    /// Used when a lock record reaches the child without its own policy.
    #[serde(default = "default_warning_minutes")]
    pub default_warning_minutes: u32,
    #[serde(default = "default_true")]
    pub default_allow_finish: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Generated and stored on first run when absent.
    #[serde(default)]
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_cache_file")]
    pub cache_file: String,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/viewguard/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub timer: TimerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

// Default functions
fn default_tick_interval() -> u64 {
    60
}
fn default_pull_interval() -> u64 {
    300
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_backoff() -> u64 {
    500
}
fn default_warning_minutes() -> u32 {
    5
}
fn default_true() -> bool {
    true
}
fn default_cache_file() -> String {
    "viewguard.db".into()
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            persist_session: false,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            pull_interval_secs: default_pull_interval(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff(),
            default_warning_minutes: default_warning_minutes(),
            default_allow_finish: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_file: default_cache_file(),
        }
    }
}

impl Config {
    fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join(CONFIG_FILE))
    }

    /// Load from the data directory, writing defaults on first run.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be parsed or is
    /// invalid, or if the default config cannot be written.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            let cfg = Self::default();
            cfg.save_to(&path)?;
            Ok(cfg)
        }
    }

    /// Load and validate the file at `path`.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let cfg: Config = toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Persist to the data directory.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "using default configuration");
            Self::default()
        })
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("timer.tick_interval_secs", self.timer.tick_interval_secs == 0),
            ("sync.pull_interval_secs", self.sync.pull_interval_secs == 0),
            ("lock.max_attempts", self.lock.max_attempts == 0),
        ];
        for (key, is_zero) in checks {
            if is_zero {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    message: "must be greater than zero".into(),
                });
            }
        }
        if self.storage.cache_file.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "storage.cache_file".into(),
                message: "must not be empty".into(),
            });
        }
        Ok(())
    }
}
