//! Configuration management for Fontorrent.
//!
//! This module handles loading, saving, and managing Fontorrent configuration.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/fontorrent/config.toml` |
//! | macOS | `~/Library/Application Support/Fontorrent/config.toml` |
//! | Windows | `%APPDATA%\Fontorrent\config.toml` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use fontorrent_core::config::Config;
//!
//! let config = Config::load()?;
//! println!("Refresh every {:?}", config.scheduler.refresh_interval);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Main configuration struct for Fontorrent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Snapshot scheduler settings
    pub scheduler: SchedulerConfig,
    /// Folder export settings
    pub export: ExportConfig,
    /// Tracker settings
    pub trackers: TrackerConfig,
}

/// Snapshot scheduler options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Interval of the forced refresh
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_millis(crate::DEFAULT_REFRESH_INTERVAL_MS),
        }
    }
}

/// Folder export options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// How often to check for a file list while metadata is pending
    #[serde(with = "humantime_serde")]
    pub metadata_poll_interval: Duration,
    /// How long to wait for a file list before giving up
    #[serde(with = "humantime_serde")]
    pub metadata_timeout: Duration,
    /// Files larger than this are streamed instead of read whole
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whole_content_limit: Option<u64>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            metadata_poll_interval: Duration::from_millis(crate::DEFAULT_METADATA_POLL_MS),
            metadata_timeout: Duration::from_secs(crate::DEFAULT_METADATA_TIMEOUT_SECS),
            whole_content_limit: None,
        }
    }
}

/// Tracker options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Accept plain `ws://` endpoints in addition to `wss://`
    pub allow_insecure: bool,
    /// Override for the preferences file holding the tracker list
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferences_path: Option<PathBuf>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            allow_insecure: true,
            preferences_path: None,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| crate::error::Error::ConfigError(format!("Failed to read config: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| crate::error::Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Save configuration to the default location.
    ///
    /// Creates the configuration directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                crate::error::Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| {
            crate::error::Error::ConfigError(format!("Failed to serialize config: {e}"))
        })?;

        std::fs::write(&path, content)
            .map_err(|e| crate::error::Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "fontorrent", "Fontorrent")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Path of the preferences file holding the tracker list.
    #[must_use]
    pub fn preferences_path(&self) -> PathBuf {
        self.trackers.preferences_path.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("com", "fontorrent", "Fontorrent").map_or_else(
                || PathBuf::from("preferences.json"),
                |dirs| dirs.data_dir().join("preferences.json"),
            )
        })
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let duration = parse(s.trim()).map_err(serde::de::Error::custom)?;
        if duration.is_zero() {
            return Err(serde::de::Error::custom(format!(
                "duration '{}' must be non-zero",
                s.trim()
            )));
        }
        Ok(duration)
    }

    fn parse(s: &str) -> Result<Duration, String> {
        // "ms" must be checked before "s" and "m".
        s.strip_suffix("ms")
            .map(|millis| {
                millis
                    .parse()
                    .map(Duration::from_millis)
                    .map_err(|e| format!("invalid duration '{s}': {e}"))
            })
            .or_else(|| {
                s.strip_suffix('s').map(|secs| {
                    secs.parse()
                        .map(Duration::from_secs)
                        .map_err(|e| format!("invalid duration '{s}': {e}"))
                })
            })
            .or_else(|| {
                s.strip_suffix('m').map(|mins| {
                    mins.parse::<u64>()
                        .map(|m| Duration::from_secs(m * 60))
                        .map_err(|e| format!("invalid duration '{s}': {e}"))
                })
            })
            .unwrap_or_else(|| Err(format!("invalid duration format '{s}'")))
    }
}
