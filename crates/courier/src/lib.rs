//! # Courier
//!
//! A message handler invocation pipeline for a service bus, with per-type
//! message logging.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐     ┌──────────────────────────────────────────────────────┐
//! │ Dispatcher │────▶│ PipeInvocation: before(p1) before(p2) handler        │
//! │            │     │                 after(p2) after(p1)                   │
//! │            │────▶│ PipeInvocation: ...                                   │
//! └────────────┘     └──────────────────────────────────────────────────────┘
//! ```
//!
//! - **Core**: Messages, identifiers, the ambient dispatch context and the
//!   message logger
//! - **Framework**: Pipes, invocations and handler invokers
//! - **Runtime**: Configuration, logging setup and dispatch
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use courier::prelude::*;
//!
//! struct PlaceOrder { id: u64 }
//!
//! impl Message for PlaceOrder {
//!     fn as_any(&self) -> &dyn std::any::Any { self }
//! }
//!
//! let runtime = CourierRuntime::new();
//! runtime.dispatcher().register::<PlaceOrder>(FnInvoker::sync("orders", |invocation| {
//!     let order = invocation.message().downcast_ref::<PlaceOrder>();
//!     Ok(())
//! }));
//!
//! let context = Arc::new(MessageContext::new(MessageId::new()));
//! let result = runtime.dispatcher().dispatch(BoxedMessage::new(PlaceOrder { id: 7 }), context);
//! ```
//!
//! ## Features
//!
//! - `toml-config`: Load `courier.toml` (default)
//! - `yaml-config`: Load `courier.yaml`
//! - `json-log`: JSON log output

pub use courier_core as core;
pub use courier_framework as framework;
pub use courier_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use courier::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use courier_runtime::{CourierRuntime, DispatchResult, Dispatcher};

    // Messages and dispatch context
    pub use courier_core::{
        BoxedMessage, Message, MessageContext, MessageId, MessageLogger, Peer, PeerId,
    };

    // Pipeline
    pub use courier_framework::{
        AfterInvokeArgs, BeforeInvokeArgs, BoxError, BoxedPipe, Pipe, PipeInvocation,
        PipeManager, PipeState,
    };

    // Handlers
    pub use courier_framework::{
        FnInvoker, Handle, HandlerInvoker, MessageContextAware, MessageHandler,
        MessageHandlerInvoker, ServiceInvoker,
    };

    pub use std::sync::Arc;
}
