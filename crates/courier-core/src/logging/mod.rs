//! Message logging.
//!
//! - [`LogInfoCache`] - per-type descriptors resolved once and shared
//! - [`MessageLogger`] - renders and emits message lines, skipping all
//!   formatting when the level is disabled for the message type
//! - [`LogSink`] - the backend boundary, with [`TracingLogSink`] as default

pub mod cache;
pub mod logger;
pub mod sink;

pub use cache::{LogInfoCache, MessageTypeLogInfo, pretty_type_name};
pub use logger::{LogArgs, MessageLogger, peer_descriptor, render_template};
pub use sink::{LogSink, MESSAGE_TARGET, TracingLogSink, default_sink, set_default_sink};
