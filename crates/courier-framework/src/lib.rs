//! # Courier Framework
//!
//! The handler invocation pipeline.
//!
//! This layer provides:
//! - [`Pipe`]s: interceptors with before/after steps and per-invocation state
//! - [`PipeInvocation`]: one execution of a message through its pipes and
//!   handler, synchronous or asynchronous
//! - [`PipeManager`]: pipe registration, enable/disable switches and ordering
//! - Handler invokers: closures ([`FnInvoker`]), handler instances
//!   ([`HandlerInvoker`]) and tower services ([`ServiceInvoker`])
//!
//! Message and context types come from `courier-core`; routing messages to
//! invokers is left to the runtime.

pub mod error;
pub mod handler;
pub mod invocation;
pub mod pipe;

pub use error::{BoxError, Cancelled, InvocationError, InvocationResult, Panicked};
pub use handler::{
    FnInvoker, Handle, HandlerInvoker, MessageContextAware, MessageHandler,
    MessageHandlerInvoker, ServiceInvoker,
};
pub use invocation::{InvocationFuture, PipeInvocation};
pub use pipe::{
    AfterInvokeArgs, BeforeInvokeArgs, BoxedPipe, ElapsedTimePipe, Pipe, PipeManager, PipeSource,
    PipeState, StateRef,
};
