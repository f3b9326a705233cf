//! Configuration module for the IoTaWatt client
//!
//! Loads configuration from a TOML file with the structure:
//! - [default] - General settings (log_level)
//! - [device] - IoTaWatt connection settings
//! - [storage] - Local data store
//!
//! Every value has a default, so a missing file is not an error. The
//! `IOTAWATT_*` environment variables override whatever the file provides.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_URL: &str = "IOTAWATT_URL";
pub const ENV_USERNAME: &str = "IOTAWATT_USERNAME";
pub const ENV_PASSWORD: &str = "IOTAWATT_PASSWORD";
pub const ENV_DATA_PATH: &str = "IOTAWATT_DATA_PATH";

/// Log level for the application
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing LevelFilter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_str().to_uppercase())
    }
}

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub default: DefaultConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// General application settings
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DefaultConfig {
    /// Log level: TRACE, DEBUG, INFO, WARN, ERROR
    #[serde(default)]
    pub log_level: LogLevel,
}

/// IoTaWatt connection configuration
#[derive(Deserialize, Clone)]
pub struct DeviceConfig {
    /// Device URL (e.g., "http://iotawatt.local")
    #[serde(default = "default_url")]
    pub url: String,

    /// Query API username
    #[serde(default = "default_username")]
    pub username: String,

    /// Query API password; no password means unauthenticated access
    #[serde(default)]
    pub password: Option<String>,

    /// Attempts per query before giving up
    #[serde(default = "default_retry")]
    pub retry: u32,

    /// Timeout for a single HTTP request (e.g., "30s")
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Append every request/response pair to this file
    #[serde(default)]
    pub debug_log: Option<PathBuf>,
}

fn default_url() -> String {
    "http://iotawatt.local".to_string()
}

fn default_username() -> String {
    "admin".to_string()
}

fn default_retry() -> u32 {
    3
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            username: default_username(),
            password: None,
            retry: default_retry(),
            timeout: default_timeout(),
            debug_log: None,
        }
    }
}

impl std::fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field(
                "password",
                &self.password.as_ref().map(|_| "***REDACTED***"),
            )
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .field("debug_log", &self.debug_log)
            .finish()
    }
}

/// Local data store configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory for downloaded datasets; a leading "~" is the home directory
    #[serde(default = "default_data_path")]
    pub data_path: String,
}

fn default_data_path() -> String {
    "~/IotaWatt_Data".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_path: default_data_path(),
        }
    }
}

impl StorageConfig {
    /// Data path with a leading "~" replaced by the home directory
    pub fn resolved_data_path(&self) -> PathBuf {
        expand_home(&self.data_path)
    }
}

fn expand_home(path: &str) -> PathBuf {
    let rest = if path == "~" {
        Some("")
    } else {
        path.strip_prefix("~/")
    };
    match (rest, dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

impl Config {
    /// Load configuration from TOML file, then apply environment overrides
    ///
    /// # Arguments
    /// * `path` - Path to the config.toml file; a missing file yields defaults
    ///
    /// # Errors
    /// Returns error if an existing file cannot be read or parsed, or if the
    /// resulting configuration is invalid
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    fn load_with_env<P, F>(path: P, lookup: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::read_file(path)?
        } else {
            Config::default()
        };
        config.apply_env(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML file, without environment overrides
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed, or is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::read_file(path)?;
        config.validate()?;
        Ok(config)
    }

    fn read_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(
                path.to_string_lossy().to_string(),
            ));
        }

        let contents =
            fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Override connection and storage settings from `IOTAWATT_*` variables
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_URL) {
            self.device.url = url;
        }
        if let Some(username) = lookup(ENV_USERNAME) {
            self.device.username = username;
        }
        if let Some(password) = lookup(ENV_PASSWORD) {
            self.device.password = Some(password);
        }
        if let Some(data_path) = lookup(ENV_DATA_PATH) {
            self.storage.data_path = data_path;
        }
    }

    /// Validate configuration logic (semantic validation beyond type checks)
    fn validate(&self) -> Result<(), ConfigError> {
        let url = self.device.url.trim();
        if url.is_empty() {
            return Err(ConfigError::ValidationError(
                "device.url must not be empty".to_string(),
            ));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "device.url must start with http:// or https://, got '{}'",
                url
            )));
        }
        if self.device.retry == 0 {
            return Err(ConfigError::ValidationError(
                "device.retry must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
