//! Configuration management for roots
//!
//! Handles loading and saving `config.toml` files. A knowledge base may carry
//! its own `_config.toml`; otherwise the per-user file under the platform
//! config directory applies, and otherwise built-in defaults.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::logging::LogConfig;
use crate::search::daemon::{DaemonPaths, StartPolicy, StopPolicy};
use crate::search::model_registry::DEFAULT_MODEL;

/// File name of a knowledge base's own configuration.
pub const PROJECT_CONFIG_FILE: &str = "_config.toml";

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected pretty or json")),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Embedding model settings
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Embedding daemon settings
    #[serde(default)]
    pub daemon: DaemonConfig,
}

/// General configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Embedding configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model alias or full model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Prefer a running daemon serving the same model
    #[serde(default = "default_true")]
    pub use_daemon: bool,

    /// Fail instead of falling back to the hashing embedder
    #[serde(default)]
    pub strict_model: bool,

    /// Model download cache
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            use_daemon: true,
            strict_model: false,
            cache_dir: None,
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_true() -> bool {
    true
}

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    /// Read timeout for embedding calls
    #[serde(default = "default_client_timeout_secs")]
    pub client_timeout_secs: u64,

    #[serde(default = "default_start_poll_interval_ms")]
    pub start_poll_interval_ms: u64,

    #[serde(default = "default_start_max_attempts")]
    pub start_max_attempts: u32,

    #[serde(default = "default_stop_poll_interval_ms")]
    pub stop_poll_interval_ms: u64,

    #[serde(default = "default_stop_max_attempts")]
    pub stop_max_attempts: u32,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            pid_file: default_pid_file(),
            log_file: default_log_file(),
            client_timeout_secs: default_client_timeout_secs(),
            start_poll_interval_ms: default_start_poll_interval_ms(),
            start_max_attempts: default_start_max_attempts(),
            stop_poll_interval_ms: default_stop_poll_interval_ms(),
            stop_max_attempts: default_stop_max_attempts(),
        }
    }
}

fn default_socket_path() -> PathBuf {
    DaemonPaths::default().socket
}

fn default_pid_file() -> PathBuf {
    DaemonPaths::default().pid_file
}

fn default_log_file() -> PathBuf {
    DaemonPaths::default().log_file
}

fn default_client_timeout_secs() -> u64 {
    60
}

fn default_start_poll_interval_ms() -> u64 {
    1000
}

fn default_start_max_attempts() -> u32 {
    60
}

fn default_stop_poll_interval_ms() -> u64 {
    500
}

fn default_stop_max_attempts() -> u32 {
    10
}

impl DaemonConfig {
    pub fn paths(&self) -> DaemonPaths {
        DaemonPaths {
            socket: self.socket_path.clone(),
            pid_file: self.pid_file.clone(),
            log_file: self.log_file.clone(),
        }
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }

    pub fn start_policy(&self) -> StartPolicy {
        StartPolicy {
            poll_interval: Duration::from_millis(self.start_poll_interval_ms),
            max_attempts: self.start_max_attempts,
        }
    }

    pub fn stop_policy(&self) -> StopPolicy {
        StopPolicy {
            poll_interval: Duration::from_millis(self.stop_poll_interval_ms),
            max_attempts: self.stop_max_attempts,
        }
    }
}

impl Config {
    /// Load configuration from a specific path. A missing file yields
    /// defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(ConfigError::ReadFailed(
                    path.display().to_string(),
                    err.to_string(),
                ));
            }
        };
        toml::from_str(&text)
            .map_err(|e| ConfigError::ParseFailed(path.display().to_string(), e.to_string()))
    }

    /// Write pretty TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |e: &dyn fmt::Display| {
            ConfigError::WriteFailed(path.display().to_string(), e.to_string())
        };
        let text = toml::to_string_pretty(self).map_err(|e| write_err(&e))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| write_err(&e))?;
        }
        std::fs::write(path, text).map_err(|e| write_err(&e))
    }

    /// The per-user configuration file, if the platform has a config dir.
    pub fn global_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("roots").join("config.toml"))
    }

    /// Project file inside `roots_path`, else the global file, else
    /// defaults. The first file found wins as a whole.
    pub fn load_layered(roots_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(project) = roots_path.map(|root| root.join(PROJECT_CONFIG_FILE)) {
            if project.is_file() {
                return Self::load(&project);
            }
        }
        match Self::global_path() {
            Some(global) if global.is_file() => Self::load(&global),
            _ => Ok(Self::default()),
        }
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.general.log_level.clone(),
            format: self.general.log_format,
            file: None,
        }
    }
}
