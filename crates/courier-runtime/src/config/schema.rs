//! Configuration schema definitions.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use super::error::ConfigError;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CourierConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Pipe selection settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Very fine-grained output.
    Trace,
    /// Debugging output, including the `HANDLE` line of each invocation.
    Debug,
    /// Informational output.
    #[default]
    Info,
    /// Warnings.
    Warn,
    /// Errors only.
    Error,
    /// Nothing.
    Off,
}

impl LogLevel {
    /// Returns the lowercase level name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Off => "off",
        }
    }

    /// Converts to a `tracing` level filter.
    pub fn to_level_filter(self) -> LevelFilter {
        match self {
            Self::Trace => LevelFilter::TRACE,
            Self::Debug => LevelFilter::DEBUG,
            Self::Info => LevelFilter::INFO,
            Self::Warn => LevelFilter::WARN,
            Self::Error => LevelFilter::ERROR,
            Self::Off => LevelFilter::OFF,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "off" | "none" => Ok(Self::Off),
            other => Err(ConfigError::validation(format!("Invalid log level: {other}"))),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line compact output.
    #[default]
    Compact,
    /// Default `tracing-subscriber` output.
    Full,
    /// Multi-line human-friendly output.
    Pretty,
    /// JSON lines (needs the `json-log` feature).
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// Standard output.
    #[default]
    Stdout,
    /// Standard error.
    Stderr,
    /// The file at [`LoggingConfig::file_path`].
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanEventConfig {
    /// Span creation.
    #[serde(default)]
    pub new: bool,
    /// Span entry.
    #[serde(default)]
    pub enter: bool,
    /// Span exit.
    #[serde(default)]
    pub exit: bool,
    /// Span close.
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Global level.
    #[serde(default)]
    pub level: LogLevel,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Output destination.
    #[serde(default)]
    pub output: LogOutput,

    /// Per-module levels, e.g. `courier_framework = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,

    /// Per-message-logger levels, keyed by logger prefix
    /// (e.g. `"billing::events" = "debug"`). The longest matching prefix wins.
    #[serde(default)]
    pub message_levels: HashMap<String, LogLevel>,

    /// Span lifecycle events.
    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Include thread ids.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line.
    #[serde(default)]
    pub file_location: bool,

    /// Log file path for [`LogOutput::File`].
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Number of daily log files kept.
    #[serde(default = "default_max_files")]
    pub max_files: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            filters: HashMap::new(),
            message_levels: HashMap::new(),
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            file_path: None,
            max_files: default_max_files(),
        }
    }
}

fn default_max_files() -> u32 {
    5
}

// =============================================================================
// Pipeline
// =============================================================================

/// Pipe selection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Pipes forced on, even when not auto-enabled.
    #[serde(default)]
    pub enabled_pipes: Vec<String>,

    /// Pipes forced off.
    #[serde(default)]
    pub disabled_pipes: Vec<String>,

    /// Registers the elapsed time pipe, warning about handlers slower than
    /// this many milliseconds (`0` logs timings without warning).
    #[serde(default)]
    pub slow_handler_threshold_ms: Option<u64>,
}
