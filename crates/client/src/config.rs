//! Configuration management for the sshmux client runtime.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/sshmux/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("poll_thread_name must not be empty")]
    EmptyPollThreadName,

    #[error("channel_buffer_size must be between 1024 and 16777216 bytes, got {0}")]
    InvalidChannelBufferSize(usize),

    #[error("read_buffer_size must be between 64 and 1048576 bytes, got {0}")]
    InvalidReadBufferSize(usize),

    #[error("line_buffer_size must be between 64 and 1048576 bytes, got {0}")]
    InvalidLineBufferSize(usize),

    #[error("unknown text encoding label: {0}")]
    UnknownEncoding(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

const MIN_CHANNEL_BUFFER_SIZE: usize = 1024;
const MAX_CHANNEL_BUFFER_SIZE: usize = 16 * 1024 * 1024;
const MIN_PROCESS_BUFFER_SIZE: usize = 64;
const MAX_PROCESS_BUFFER_SIZE: usize = 1024 * 1024;

/// Main configuration structure for the sshmux client runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Poll thread and channel plumbing.
    pub runtime: RuntimeConfig,

    /// Remote process I/O.
    pub process: ProcessConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Poll thread and channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Name given to dedicated poll threads.
    pub poll_thread_name: String,

    /// Bytes a channel buffers in each direction before applying backpressure.
    pub channel_buffer_size: usize,
}

/// Remote process I/O configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessConfig {
    /// Buffer size for bulk capture reads.
    pub read_buffer_size: usize,

    /// Bytes decoded per refill in line mode.
    pub line_buffer_size: usize,

    /// Encoding label used for text written to standard input.
    pub stdin_encoding: String,

    /// Encoding label used to decode standard output.
    pub stdout_encoding: String,

    /// Encoding label used to decode standard error.
    pub stderr_encoding: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_thread_name: "ssh-poll".to_string(),
            channel_buffer_size: 64 * 1024,
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 4096,
            line_buffer_size: 1024,
            stdin_encoding: "utf-8".to_string(),
            stdout_encoding: "utf-8".to_string(),
            stderr_encoding: "utf-8".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sshmux")
        .join("config.toml")
}

/// Resolves a WHATWG encoding label such as `utf-8` or `latin1`.
pub fn resolve_encoding(label: &str) -> Result<&'static Encoding, ConfigError> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| ConfigError::UnknownEncoding(label.to_string()))
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - SSHMUX_POLL_THREAD_NAME: Override the dedicated poll thread name
    /// - SSHMUX_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("SSHMUX_POLL_THREAD_NAME") {
            if !name.is_empty() {
                tracing::info!("Overriding poll_thread_name from environment: {}", name);
                self.runtime.poll_thread_name = name;
            }
        }

        if let Ok(level) = std::env::var("SSHMUX_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.logging.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runtime.poll_thread_name.trim().is_empty() {
            return Err(ConfigError::EmptyPollThreadName);
        }

        let size = self.runtime.channel_buffer_size;
        if !(MIN_CHANNEL_BUFFER_SIZE..=MAX_CHANNEL_BUFFER_SIZE).contains(&size) {
            return Err(ConfigError::InvalidChannelBufferSize(size));
        }

        let size = self.process.read_buffer_size;
        if !(MIN_PROCESS_BUFFER_SIZE..=MAX_PROCESS_BUFFER_SIZE).contains(&size) {
            return Err(ConfigError::InvalidReadBufferSize(size));
        }

        let size = self.process.line_buffer_size;
        if !(MIN_PROCESS_BUFFER_SIZE..=MAX_PROCESS_BUFFER_SIZE).contains(&size) {
            return Err(ConfigError::InvalidLineBufferSize(size));
        }

        for label in [
            &self.process.stdin_encoding,
            &self.process.stdout_encoding,
            &self.process.stderr_encoding,
        ] {
            resolve_encoding(label)?;
        }

        let level = self.logging.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
