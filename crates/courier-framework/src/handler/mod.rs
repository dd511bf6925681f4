//! Handlers and the strategies that invoke them.
//!
//! - **Traits** ([`traits`]): [`MessageHandler`] instances that pipes can
//!   prepare, the [`MessageContextAware`] opt-in and the typed [`Handle`].
//! - **Invokers** ([`invoker`]): the [`MessageHandlerInvoker`] strategy with
//!   closure-based ([`FnInvoker`]) and instance-based ([`HandlerInvoker`])
//!   implementations.
//! - **Services** ([`service`]): [`ServiceInvoker`], running a tower service
//!   as an asynchronous handler.

pub mod invoker;
pub mod service;
pub mod traits;

pub use invoker::{FnInvoker, HandlerInvoker, MessageHandlerInvoker};
pub use service::ServiceInvoker;
pub use traits::{Handle, MessageContextAware, MessageHandler};
