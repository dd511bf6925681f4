//! # Courier Core
//!
//! The foundation of the Courier message bus.
//!
//! This crate provides the types every other layer builds on: messages,
//! identifiers, the dispatch context and the message logger.
//!
//! ## Layers
//!
//! ### Foundation
//!
//! - **Messages**: Type-erased payloads with runtime downcasting ([`Message`], [`BoxedMessage`])
//! - **Identity**: [`MessageId`], [`PeerId`], [`Peer`]
//! - **Dispatch Context**: Per-invocation metadata with scoped ambient activation ([`MessageContext`])
//!
//! ### Logging
//!
//! - **Descriptor Cache**: Per-type log descriptors resolved once ([`LogInfoCache`])
//! - **Message Logger**: Formatting-free when disabled ([`MessageLogger`])
//! - **Sinks**: Backend boundary with a `tracing` bridge ([`LogSink`], [`TracingLogSink`])
//!
//! ## Example
//!
//! ```rust,ignore
//! use courier_core::{LogArgs, Message, MessageContext, MessageId, MessageLogger};
//! use std::sync::Arc;
//!
//! struct Ping;
//!
//! impl Message for Ping {
//!     fn as_any(&self) -> &dyn std::any::Any {
//!         self
//!     }
//! }
//!
//! let context = Arc::new(MessageContext::new(MessageId::new()));
//! let _guard = MessageContext::set_current(Arc::clone(&context));
//!
//! let logger = MessageLogger::get::<Ping>();
//! logger.log_format("RECV: {0} [{1}]", &Ping, LogArgs::new().message_id(context.message_id()));
//! ```

pub mod error;
pub mod foundation;
pub mod logging;

pub use error::{CoreError, CoreResult};

pub use foundation::{
    BoxedMessage, ContextGuard, Message, MessageContext, MessageId, OriginatorInfo, Peer, PeerId,
    Scoped,
};

pub use logging::{
    LogArgs, LogInfoCache, LogSink, MESSAGE_TARGET, MessageLogger, MessageTypeLogInfo,
    TracingLogSink, default_sink, set_default_sink,
};

/// Prelude for common imports.
pub mod prelude {
    pub use super::foundation::*;
    pub use super::logging::{LogArgs, LogSink, MessageLogger};
}
