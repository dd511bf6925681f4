//! Log sinks: where rendered message log lines end up.
//!
//! The [`LogSink`] trait is the boundary between the message logger and the
//! logging backend. [`TracingLogSink`] is the default backend and forwards to
//! `tracing` under the [`MESSAGE_TARGET`] target.

use std::sync::{Arc, OnceLock};

use tracing::Level;
use tracing::level_filters::LevelFilter;

/// `tracing` target used for message log lines.
pub const MESSAGE_TARGET: &str = "courier::messages";

/// A logging backend addressed by logger key.
///
/// Logger keys are full type names (e.g. `my_app::orders::PlaceOrder`).
pub trait LogSink: Send + Sync {
    /// Returns `true` if `level` is enabled for the given logger.
    fn is_enabled(&self, logger: &str, level: Level) -> bool;

    /// Emits an already rendered line.
    fn log(&self, logger: &str, level: Level, text: &str);
}

/// A [`LogSink`] forwarding to `tracing`.
///
/// A level is enabled when `tracing`'s current max level allows it and the
/// filter for the logger key allows it too. That filter is the override with
/// the longest prefix matching the key, else the default filter, else none.
///
/// # Example
///
/// ```rust,ignore
/// use courier_core::logging::TracingLogSink;
/// use tracing::level_filters::LevelFilter;
///
/// let sink = TracingLogSink::new()
///     .with_override("my_app::heartbeat", LevelFilter::WARN)
///     .with_override("my_app::orders", LevelFilter::DEBUG);
/// ```
#[derive(Debug, Clone, Default)]
pub struct TracingLogSink {
    default_filter: Option<LevelFilter>,
    /// Sorted by descending prefix length.
    overrides: Vec<(String, LevelFilter)>,
}

impl TracingLogSink {
    /// Creates a sink without overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the filter for logger keys without a matching override.
    pub fn with_default(mut self, filter: LevelFilter) -> Self {
        self.default_filter = Some(filter);
        self
    }

    /// Adds a level override for every logger key starting with `prefix`.
    pub fn with_override(mut self, prefix: impl Into<String>, filter: LevelFilter) -> Self {
        self.overrides.push((prefix.into(), filter));
        self.overrides
            .sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()));
        self
    }

    /// Returns the override applying to `logger`, if any.
    pub fn override_for(&self, logger: &str) -> Option<LevelFilter> {
        self.overrides
            .iter()
            .find(|(prefix, _)| logger.starts_with(prefix.as_str()))
            .map(|(_, filter)| *filter)
    }

    /// Returns the filter applying to `logger`: its override, else the default.
    pub fn filter_for(&self, logger: &str) -> Option<LevelFilter> {
        self.override_for(logger).or(self.default_filter)
    }
}

impl LogSink for TracingLogSink {
    fn is_enabled(&self, logger: &str, level: Level) -> bool {
        if level > LevelFilter::current() {
            return false;
        }
        self.filter_for(logger).is_none_or(|filter| level <= filter)
    }

    fn log(&self, logger: &str, level: Level, text: &str) {
        match level {
            Level::ERROR => tracing::error!(target: MESSAGE_TARGET, logger, "{text}"),
            Level::WARN => tracing::warn!(target: MESSAGE_TARGET, logger, "{text}"),
            Level::INFO => tracing::info!(target: MESSAGE_TARGET, logger, "{text}"),
            Level::DEBUG => tracing::debug!(target: MESSAGE_TARGET, logger, "{text}"),
            _ => tracing::trace!(target: MESSAGE_TARGET, logger, "{text}"),
        }
    }
}

static DEFAULT_SINK: OnceLock<Arc<dyn LogSink>> = OnceLock::new();

/// Installs the process-wide sink used by [`MessageLogger::get`](super::MessageLogger::get).
///
/// Returns `false` if a default sink was already installed or resolved.
pub fn set_default_sink(sink: Arc<dyn LogSink>) -> bool {
    DEFAULT_SINK.set(sink).is_ok()
}

/// Returns the process-wide sink, falling back to a plain [`TracingLogSink`].
pub fn default_sink() -> Arc<dyn LogSink> {
    Arc::clone(DEFAULT_SINK.get_or_init(|| Arc::new(TracingLogSink::new())))
}
