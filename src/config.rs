//! Command-line configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (from `--config` or STATECRAFT_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub output: OutputConfig,
    pub runner: RunnerConfig,
}

impl Config {
    /// Loads `path` if given, then applies environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runner.max_steps == 0 {
            return Err(ConfigError::Validation(
                "runner.max_steps must be greater than zero".to_string(),
            ));
        }
        if self.logging.filter.trim().is_empty() {
            return Err(ConfigError::Validation(
                "logging.filter must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(filter) = var("STATECRAFT_LOG") {
            self.logging.filter = filter;
        }
        if let Some(color) = var("STATECRAFT_COLOR") {
            self.output.color = color == "1" || color.eq_ignore_ascii_case("true");
        }
        if let Some(path) = var("STATECRAFT_HISTORY_FILE") {
            self.runner.history_file = Some(PathBuf::from(path));
        }
        if let Some(max) = var("STATECRAFT_MAX_STEPS") {
            if let Ok(n) = max.parse() {
                self.runner.max_steps = n;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber` filter used when RUST_LOG is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "warn".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub color: bool,
    /// Print every entered/exited/triggered notification.
    pub show_notifications: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            color: true,
            show_notifications: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Upper bound on events processed by one `run` or `drain`.
    pub max_steps: usize,
    /// REPL history file. Defaults to `~/.statecraft_history`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_file: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_steps: 10_000,
            history_file: None,
        }
    }
}

impl RunnerConfig {
    pub fn history_path(&self) -> PathBuf {
        if let Some(path) = &self.history_file {
            return path.clone();
        }
        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".statecraft_history"))
            .unwrap_or_else(|_| ".statecraft_history".into())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{}': {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("configuration validation failed: {0}")]
    Validation(String),
}
