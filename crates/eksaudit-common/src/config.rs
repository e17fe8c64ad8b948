//! Configuration management for the EKS audit engine

use crate::inputs::InputValue;
use eksaudit_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Run-level settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Fact source adapter settings
    #[serde(default)]
    pub adapters: AdapterConfig,

    /// Profile-level input overrides
    #[serde(default)]
    pub inputs: BTreeMap<String, InputValue>,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config: {}", e)))
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Merge with environment variables (EKSAUDIT_ prefix)
    pub fn merge_env(self) -> Self {
        self.merge_env_from(|key| std::env::var(key).ok())
    }

    /// Merge with variables from an arbitrary lookup
    pub fn merge_env_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(n) = lookup("EKSAUDIT_MAX_CONCURRENT_CONTROLS").and_then(|v| v.parse().ok()) {
            self.engine.max_concurrent_controls = n;
        }
        if let Some(n) = lookup("EKSAUDIT_CONTROL_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.engine.control_timeout_seconds = n;
        }
        if let Some(val) = lookup("EKSAUDIT_CONTROLS_DIR") {
            self.engine.controls_dir = Some(val);
        }

        if let Some(n) = lookup("EKSAUDIT_HTTP_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.adapters.http_timeout_seconds = n;
        }
        if let Some(n) = lookup("EKSAUDIT_COMMAND_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.adapters.command_timeout_seconds = n;
        }

        if let Some(val) = lookup("EKSAUDIT_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = lookup("EKSAUDIT_LOG_FORMAT") {
            self.logging.format = val;
        }

        self
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.engine.max_concurrent_controls == 0 {
            return Err(Error::InvalidConfig {
                key: "engine.max_concurrent_controls".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.engine.control_timeout_seconds == 0 {
            return Err(Error::InvalidConfig {
                key: "engine.control_timeout_seconds".into(),
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Run-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Controls evaluated at the same time; kept low to spare the target host
    #[serde(default = "default_max_controls")]
    pub max_concurrent_controls: usize,

    /// Outer timeout per control, independent of adapter timeouts
    #[serde(default = "default_control_timeout")]
    pub control_timeout_seconds: u64,

    /// Directory of additional YAML control definitions
    pub controls_dir: Option<String>,
}

fn default_max_controls() -> usize {
    4
}

fn default_control_timeout() -> u64 {
    60
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_controls: default_max_controls(),
            control_timeout_seconds: default_control_timeout(),
            controls_dir: None,
        }
    }
}

/// Fact source adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Request timeout for the HTTP+JSON adapter
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,

    /// Timeout for service manager subprocesses
    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u64,

    #[serde(default = "default_systemctl")]
    pub systemctl_path: String,

    /// User database used to resolve file owners
    #[serde(default = "default_passwd")]
    pub passwd_path: String,

    /// Group database used to resolve file groups
    #[serde(default = "default_group")]
    pub group_path: String,
}

fn default_http_timeout() -> u64 {
    10
}

fn default_command_timeout() -> u64 {
    10
}

fn default_systemctl() -> String {
    String::from("systemctl")
}

fn default_passwd() -> String {
    String::from("/etc/passwd")
}

fn default_group() -> String {
    String::from("/etc/group")
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            http_timeout_seconds: default_http_timeout(),
            command_timeout_seconds: default_command_timeout(),
            systemctl_path: default_systemctl(),
            passwd_path: default_passwd(),
            group_path: default_group(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    String::from("info")
}

fn default_log_format() -> String {
    String::from("pretty")
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Builder for constructing Config
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn max_concurrent_controls(mut self, n: usize) -> Self {
        self.config.engine.max_concurrent_controls = n;
        self
    }

    pub fn control_timeout_seconds(mut self, seconds: u64) -> Self {
        self.config.engine.control_timeout_seconds = seconds;
        self
    }

    pub fn controls_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.engine.controls_dir = Some(dir.into());
        self
    }

    pub fn http_timeout_seconds(mut self, seconds: u64) -> Self {
        self.config.adapters.http_timeout_seconds = seconds;
        self
    }

    pub fn input(mut self, name: impl Into<String>, value: InputValue) -> Self {
        self.config.inputs.insert(name.into(), value);
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
