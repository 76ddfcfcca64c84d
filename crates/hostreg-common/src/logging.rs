//! Logging setup shared by hostreg binaries and tests
//!
//! All crates log through `tracing` macros. This module only owns the
//! subscriber side: a single `init` that installs a `tracing-subscriber`
//! formatter filtered by level (or by `HOSTREG_LOG` when set), plus a helper
//! that renders an error together with its cause chain.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Environment variable that overrides the configured filter.
pub const LOG_ENV: &str = "HOSTREG_LOG";

/// Minimum level for emitted log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(LoggingError::InvalidLevel(other.to_string())),
        }
    }
}

/// Logging errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Logging configuration options
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Minimum log level when `HOSTREG_LOG` is not set
    pub level: LogLevel,
    /// Emit ANSI colors
    pub ansi: bool,
    /// Include the event target (module path) in each line
    pub with_target: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            ansi: true,
            with_target: true,
        }
    }
}

impl LogOptions {
    /// Options for a given level with the remaining defaults
    pub fn with_level(level: LogLevel) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }
}

/// Install the global `tracing` subscriber.
///
/// Fails with [`LoggingError::AlreadyInitialized`] when a subscriber is
/// already installed, which callers may ignore in tests.
pub fn init(options: LogOptions) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_env(LOG_ENV) {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(options.level.as_str())
            .map_err(|e| LoggingError::InvalidFilter(e.to_string()))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(options.ansi)
        .with_target(options.with_target)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}

/// Format an error with its cause chain
pub fn format_error(error: &(dyn std::error::Error + 'static)) -> String {
    format_error_recursive(error, 0)
}

fn format_error_recursive(error: &(dyn std::error::Error + 'static), depth: usize) -> String {
    const MAX_DEPTH: usize = 10;

    if depth >= MAX_DEPTH {
        return error.to_string();
    }

    let base = error.to_string();

    match error.source() {
        Some(source) => format!("{} Caused by: {}", base, format_error_recursive(source, depth + 1)),
        None => base,
    }
}
