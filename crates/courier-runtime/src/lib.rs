//! Courier Runtime - configuration, logging and dispatch for Courier.
//!
//! This crate provides:
//! - Configuration loading from files, environment and code ([`config`])
//! - Logging setup, including per-message-logger levels ([`logging`])
//! - Routing of messages to handler invokers ([`Dispatcher`])
//! - The [`CourierRuntime`] tying them together
//!
//! ```ignore
//! use courier_runtime::CourierRuntime;
//!
//! let runtime = CourierRuntime::new();
//! runtime.dispatcher().register::<PlaceOrder>(FnInvoker::sync("orders", place_order));
//!
//! let result = runtime
//!     .dispatcher()
//!     .dispatch_async(BoxedMessage::new(order), context)
//!     .await;
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod runtime;

// Re-exports
pub use config::{ConfigError, ConfigLoader, ConfigResult, CourierConfig, LoggingConfig, PipelineConfig};
pub use dispatcher::{DispatchResult, Dispatcher};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{CourierRuntime, RuntimeBuilder};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides all the commonly used logging macros:
/// - `trace!`, `debug!`, `info!`, `warn!`, `error!`
/// - `span`, `event`
/// - `instrument` attribute
/// - `Level` for span creation
pub mod prelude {
    pub use tracing::{Level, debug, error, event, info, instrument, span, trace, warn};
}
