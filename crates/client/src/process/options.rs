//! Per-process I/O options.

use encoding_rs::{Encoding, UTF_8};

use crate::config::{resolve_encoding, ConfigError, ProcessConfig};

/// Text encodings and buffer sizes for one remote process.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteOptions {
    /// Encoding applied to text written to standard input.
    pub stdin_encoding: &'static Encoding,
    /// Encoding used to decode standard output.
    pub stdout_encoding: &'static Encoding,
    /// Encoding used to decode standard error.
    pub stderr_encoding: &'static Encoding,
    /// Buffer size for bulk capture into handlers.
    pub read_buffer_size: usize,
    /// Bytes decoded per refill in text and line mode.
    pub line_buffer_size: usize,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            stdin_encoding: UTF_8,
            stdout_encoding: UTF_8,
            stderr_encoding: UTF_8,
            read_buffer_size: 4096,
            line_buffer_size: 1024,
        }
    }
}

impl ExecuteOptions {
    /// Resolves encoding labels from the process configuration.
    pub fn from_config(config: &ProcessConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            stdin_encoding: resolve_encoding(&config.stdin_encoding)?,
            stdout_encoding: resolve_encoding(&config.stdout_encoding)?,
            stderr_encoding: resolve_encoding(&config.stderr_encoding)?,
            read_buffer_size: config.read_buffer_size,
            line_buffer_size: config.line_buffer_size,
        })
    }

    /// Uses `encoding` for all three standard streams.
    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.stdin_encoding = encoding;
        self.stdout_encoding = encoding;
        self.stderr_encoding = encoding;
        self
    }
}
