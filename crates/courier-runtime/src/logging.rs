//! Logging setup for Courier.
//!
//! Installs a `tracing-subscriber` registry from configuration, and the
//! process-wide message log sink used by [`MessageLogger`] (the `HANDLE`
//! lines of the pipeline and any application message logging).
//!
//! Message log lines are emitted under the `courier::messages` target with a
//! `logger` field holding the message type name. Their verbosity is
//! controlled per logger prefix through `logging.message_levels`:
//!
//! ```toml
//! [logging]
//! level = "info"
//!
//! [logging.message_levels]
//! "my_app::orders" = "debug"
//! "my_app::heartbeat" = "off"
//! ```
//!
//! # Configuration-Based Initialization
//!
//! ```rust,ignore
//! let config = courier_runtime::config::load_config()?;
//! courier_runtime::logging::init_from_config(&config.logging);
//! ```
//!
//! # Manual Initialization
//!
//! ```rust,ignore
//! use courier_runtime::logging::{LoggingBuilder, SpanEvents};
//!
//! LoggingBuilder::new()
//!     .directive("courier_framework=debug")
//!     .message_level("my_app::orders", LevelFilter::DEBUG)
//!     .span_events(SpanEvents::LIFECYCLE)
//!     .init();
//! ```
//!
//! [`MessageLogger`]: courier_core::MessageLogger

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::level_filters::LevelFilter;
use tracing::{debug, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use courier_core::{MESSAGE_TARGET, TracingLogSink, set_default_sink};

use crate::config::{LogFormat, LogOutput, LoggingConfig, SpanEventConfig};
use crate::error::{RuntimeError, RuntimeResult};

/// Span event configuration for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpanEvents {
    /// Log when a span is created.
    pub new: bool,
    /// Log when a span is entered.
    pub enter: bool,
    /// Log when a span is exited.
    pub exit: bool,
    /// Log when a span is closed.
    pub close: bool,
}

impl SpanEvents {
    /// No span events.
    pub const NONE: Self = Self {
        new: false,
        enter: false,
        exit: false,
        close: false,
    };

    /// Span creation and close, e.g. one pair per dispatched message.
    pub const LIFECYCLE: Self = Self {
        new: true,
        enter: false,
        exit: false,
        close: true,
    };

    /// All span events.
    pub const FULL: Self = Self {
        new: true,
        enter: true,
        exit: true,
        close: true,
    };

    fn to_fmt_span(self) -> fmt::format::FmtSpan {
        let mut span = fmt::format::FmtSpan::NONE;
        if self.new {
            span |= fmt::format::FmtSpan::NEW;
        }
        if self.enter {
            span |= fmt::format::FmtSpan::ENTER;
        }
        if self.exit {
            span |= fmt::format::FmtSpan::EXIT;
        }
        if self.close {
            span |= fmt::format::FmtSpan::CLOSE;
        }
        span
    }
}

impl From<&SpanEventConfig> for SpanEvents {
    fn from(config: &SpanEventConfig) -> Self {
        Self {
            new: config.new,
            enter: config.enter,
            exit: config.exit,
            close: config.close,
        }
    }
}

// =============================================================================
// Configuration-Based Initialization
// =============================================================================

/// Initializes logging from a [`LoggingConfig`].
///
/// Does nothing if a global subscriber is already installed.
pub fn init_from_config(config: &LoggingConfig) {
    if let Err(error) = LoggingBuilder::from_config(config).try_init() {
        debug!(%error, "Logging already initialized");
    }
}

/// Builds the message log sink described by `config`.
pub fn message_sink(config: &LoggingConfig) -> TracingLogSink {
    LoggingBuilder::from_config(config).message_sink()
}

// =============================================================================
// LoggingBuilder
// =============================================================================

/// A builder for configuring logging.
#[derive(Debug)]
pub struct LoggingBuilder {
    directives: Vec<String>,
    level: LevelFilter,
    message_levels: Vec<(String, LevelFilter)>,
    span_events: SpanEvents,
    format: LogFormat,
    output: LogOutput,
    with_target: bool,
    with_thread_ids: bool,
    with_file: bool,
    with_line_number: bool,
    file_path: Option<PathBuf>,
    max_files: usize,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingBuilder {
    /// Creates a builder logging at `INFO` to stdout in compact format.
    pub fn new() -> Self {
        Self {
            directives: Vec::new(),
            level: LevelFilter::INFO,
            message_levels: Vec::new(),
            span_events: SpanEvents::NONE,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            with_target: true,
            with_thread_ids: false,
            with_file: false,
            with_line_number: false,
            file_path: None,
            max_files: 5,
        }
    }

    /// Creates a builder from a [`LoggingConfig`].
    pub fn from_config(config: &LoggingConfig) -> Self {
        let mut builder = Self::new();

        builder.level = config.level.to_level_filter();
        builder.format = config.format;
        builder.output = config.output;
        builder.span_events = SpanEvents::from(&config.span_events);
        builder.with_thread_ids = config.thread_ids;
        builder.with_file = config.file_location;
        builder.with_line_number = config.file_location;
        builder.file_path.clone_from(&config.file_path);
        builder.max_files = config.max_files as usize;

        for (module, level) in &config.filters {
            builder.directives.push(format!("{module}={level}"));
        }
        for (prefix, level) in &config.message_levels {
            builder
                .message_levels
                .push((prefix.clone(), level.to_level_filter()));
        }

        builder
    }

    /// Sets the global level.
    pub fn with_level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    /// Adds a filter directive, e.g. `"courier_framework=debug"`.
    pub fn directive(mut self, directive: &str) -> Self {
        self.directives.push(directive.to_string());
        self
    }

    /// Sets the level of message loggers whose key starts with `prefix`.
    pub fn message_level(mut self, prefix: impl Into<String>, level: LevelFilter) -> Self {
        self.message_levels.push((prefix.into(), level));
        self
    }

    /// Configures span events.
    pub fn span_events(mut self, events: SpanEvents) -> Self {
        self.span_events = events;
        self
    }

    /// Sets the output format.
    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets the output destination.
    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    /// Include the target in log output.
    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    /// Include thread IDs in log output.
    pub fn with_thread_ids(mut self, enabled: bool) -> Self {
        self.with_thread_ids = enabled;
        self
    }

    /// Include file names and line numbers in log output.
    pub fn with_file_location(mut self, enabled: bool) -> Self {
        self.with_file = enabled;
        self.with_line_number = enabled;
        self
    }

    /// Sets the file path for file output.
    pub fn file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Sets how many daily log files are kept.
    pub fn max_files(mut self, count: usize) -> Self {
        self.max_files = count;
        self
    }

    /// The message log sink matching this builder's levels.
    pub fn message_sink(&self) -> TracingLogSink {
        self.message_levels.iter().fold(
            TracingLogSink::new().with_default(self.level),
            |sink, (prefix, level)| sink.with_override(prefix.clone(), *level),
        )
    }

    /// The most verbose level any message logger may use.
    fn message_target_level(&self) -> LevelFilter {
        self.message_levels
            .iter()
            .map(|(_, level)| *level)
            .fold(self.level, LevelFilter::max)
    }

    fn build_filter(&self) -> EnvFilter {
        let base_filter = self.level.to_string().to_lowercase();
        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&base_filter));

        let message_directive = format!(
            "{MESSAGE_TARGET}={}",
            self.message_target_level().to_string().to_lowercase()
        );
        for directive in self.directives.iter().chain(std::iter::once(&message_directive)) {
            match directive.parse() {
                Ok(parsed) => filter = filter.add_directive(parsed),
                Err(error) => warn!(directive = %directive, %error, "Ignoring invalid log directive"),
            }
        }

        filter
    }

    /// Initializes the logging system, ignoring a previously installed subscriber.
    pub fn init(self) {
        let _ = self.try_init();
    }

    /// Initializes the logging system.
    ///
    /// Once the subscriber is installed, also installs the process-wide
    /// message log sink, unless one is already in use.
    pub fn try_init(self) -> RuntimeResult<()> {
        let sink = Arc::new(self.message_sink());
        let filter = self.build_filter();
        let span_events = self.span_events.to_fmt_span();

        macro_rules! configure_layer {
            ($layer:expr) => {
                $layer
                    .with_span_events(span_events)
                    .with_target(self.with_target)
                    .with_thread_ids(self.with_thread_ids)
                    .with_file(self.with_file)
                    .with_line_number(self.with_line_number)
            };
        }

        macro_rules! init_with_writer {
            ($writer:expr) => {
                match &self.format {
                    #[cfg(feature = "json-log")]
                    LogFormat::Json => {
                        let layer = fmt::layer()
                            .json()
                            .with_span_events(span_events)
                            .with_writer($writer);
                        tracing_subscriber::registry()
                            .with(layer)
                            .with(filter)
                            .try_init()
                    }
                    #[cfg(not(feature = "json-log"))]
                    LogFormat::Json => {
                        let layer = configure_layer!(fmt::layer().compact().with_writer($writer));
                        tracing_subscriber::registry()
                            .with(layer)
                            .with(filter)
                            .try_init()
                    }
                    LogFormat::Compact => {
                        let layer = configure_layer!(fmt::layer().compact().with_writer($writer));
                        tracing_subscriber::registry()
                            .with(layer)
                            .with(filter)
                            .try_init()
                    }
                    LogFormat::Full => {
                        let layer = configure_layer!(fmt::layer().with_writer($writer));
                        tracing_subscriber::registry()
                            .with(layer)
                            .with(filter)
                            .try_init()
                    }
                    LogFormat::Pretty => {
                        let layer = configure_layer!(fmt::layer().pretty().with_writer($writer));
                        tracing_subscriber::registry()
                            .with(layer)
                            .with(filter)
                            .try_init()
                    }
                }
            };
        }

        let result = match &self.output {
            LogOutput::Stdout => init_with_writer!(std::io::stdout),
            LogOutput::Stderr => init_with_writer!(std::io::stderr),
            LogOutput::File => match &self.file_path {
                Some(path) => {
                    let file_appender = RollingFileAppender::builder()
                        .rotation(Rotation::DAILY)
                        .filename_prefix(
                            path.file_name()
                                .unwrap_or_else(|| OsStr::new("courier.log"))
                                .to_string_lossy(),
                        )
                        .max_log_files(self.max_files)
                        .build(path.parent().unwrap_or_else(|| Path::new(".")))
                        .map_err(|error| RuntimeError::Logging(error.to_string()))?;
                    init_with_writer!(file_appender)
                }
                None => {
                    warn!(
                        "File output requested but no file path configured, falling back to stdout"
                    );
                    init_with_writer!(std::io::stdout)
                }
            },
        };

        result.map_err(|error| RuntimeError::Logging(error.to_string()))?;

        if !set_default_sink(sink) {
            debug!("Message log sink already installed");
        }
        Ok(())
    }
}
