//! Message dispatcher for the Courier runtime.
//!
//! The [`Dispatcher`] routes an inbound message to every handler invoker
//! registered for its concrete type. Each invoker gets its own
//! [`PipeInvocation`], wrapped by the pipes the [`PipeManager`] currently
//! enables for it.
//!
//! ```rust,ignore
//! use courier_runtime::Dispatcher;
//! use courier_framework::{FnInvoker, PipeManager};
//!
//! let dispatcher = Dispatcher::new(Arc::new(PipeManager::new()));
//! dispatcher.register::<PlaceOrder>(FnInvoker::sync("orders", |invocation| {
//!     let order = invocation.message().downcast_ref::<PlaceOrder>();
//!     Ok(())
//! }));
//!
//! let result = dispatcher.dispatch_async(BoxedMessage::new(order), context).await;
//! assert!(result.is_success());
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{Instrument, Level, debug, span, warn};

use courier_core::{BoxedMessage, Message, MessageContext};
use courier_framework::{InvocationError, MessageHandlerInvoker, PipeInvocation, PipeManager};

/// Outcome of dispatching one message.
#[derive(Debug, Default)]
pub struct DispatchResult {
    /// Number of invokers the message was handed to.
    pub handled: usize,
    /// Failed invocations, as `(invoker name, error)`.
    pub errors: Vec<(String, InvocationError)>,
}

impl DispatchResult {
    /// Returns `true` if no invocation failed.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns `true` if no invoker was registered for the message type.
    pub fn is_unhandled(&self) -> bool {
        self.handled == 0
    }
}

/// Routes messages to their handler invokers through the pipe pipeline.
///
/// # Thread Safety
///
/// `Dispatcher` is `Send + Sync`; invokers may be registered while messages
/// are being dispatched.
pub struct Dispatcher {
    pipes: Arc<PipeManager>,
    invokers: RwLock<HashMap<TypeId, Vec<Arc<dyn MessageHandlerInvoker>>>>,
}

impl Dispatcher {
    /// Creates a dispatcher with no invokers.
    pub fn new(pipes: Arc<PipeManager>) -> Self {
        Self {
            pipes,
            invokers: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the pipe manager used to build invocations.
    pub fn pipes(&self) -> &Arc<PipeManager> {
        &self.pipes
    }

    /// Registers an invoker for messages of type `M`.
    ///
    /// Invokers of the same type run in registration order.
    pub fn register<M: Message>(&self, invoker: impl MessageHandlerInvoker + 'static) {
        self.register_arc::<M>(Arc::new(invoker));
    }

    /// Registers a shared invoker for messages of type `M`.
    pub fn register_arc<M: Message>(&self, invoker: Arc<dyn MessageHandlerInvoker>) {
        debug!(
            invoker = invoker.name(),
            message_type = std::any::type_name::<M>(),
            "Registering handler invoker"
        );
        self.invokers
            .write()
            .entry(TypeId::of::<M>())
            .or_default()
            .push(invoker);
    }

    /// Returns the number of invokers registered for `M`.
    pub fn invoker_count<M: Message>(&self) -> usize {
        self.invokers
            .read()
            .get(&TypeId::of::<M>())
            .map_or(0, Vec::len)
    }

    /// Creates one invocation per invoker registered for the message's type.
    pub fn create_invocations(
        &self,
        message: &BoxedMessage,
        context: &Arc<MessageContext>,
    ) -> Vec<Arc<PipeInvocation>> {
        let invokers = self
            .invokers
            .read()
            .get(&message.concrete_type_id())
            .cloned()
            .unwrap_or_default();

        invokers
            .into_iter()
            .map(|invoker| {
                self.pipes
                    .create_invocation(invoker, message.clone(), Arc::clone(context))
            })
            .collect()
    }

    /// Dispatches a message synchronously, one invoker after the other.
    ///
    /// Invokers without a synchronous path fail with
    /// [`InvocationError::SynchronousUnsupported`]; use
    /// [`dispatch_async`](Self::dispatch_async) for them.
    pub fn dispatch(&self, message: BoxedMessage, context: Arc<MessageContext>) -> DispatchResult {
        let span = span!(
            Level::DEBUG,
            "dispatch",
            message_type = message.message_type_name(),
            message_id = %context.message_id()
        );
        let _enter = span.enter();

        let invocations = self.create_invocations(&message, &context);
        let mut result = DispatchResult {
            handled: invocations.len(),
            errors: Vec::new(),
        };

        for invocation in invocations {
            if let Err(error) = invocation.run() {
                record_failure(&mut result, &invocation, error);
            }
        }

        result
    }

    /// Dispatches a message to all its invokers concurrently.
    pub async fn dispatch_async(
        &self,
        message: BoxedMessage,
        context: Arc<MessageContext>,
    ) -> DispatchResult {
        let span = span!(
            Level::DEBUG,
            "dispatch",
            message_type = message.message_type_name(),
            message_id = %context.message_id()
        );

        let invocations = span.in_scope(|| self.create_invocations(&message, &context));
        let outcomes = join_all(invocations.iter().map(|invocation| invocation.run_async()))
            .instrument(span)
            .await;

        let mut result = DispatchResult {
            handled: invocations.len(),
            errors: Vec::new(),
        };
        for (invocation, outcome) in invocations.iter().zip(outcomes) {
            if let Err(error) = outcome {
                record_failure(&mut result, invocation, error);
            }
        }

        result
    }
}

fn record_failure(result: &mut DispatchResult, invocation: &PipeInvocation, error: InvocationError) {
    let invoker = invocation.invoker().name().to_string();
    if error.is_contract_violation() {
        warn!(invoker = %invoker, %error, "Invocation misused");
    } else {
        debug!(invoker = %invoker, %error, "Handler failed");
    }
    result.errors.push((invoker, error));
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let invokers = self.invokers.read();
        f.debug_struct("Dispatcher")
            .field("message_types", &invokers.len())
            .field(
                "invoker_count",
                &invokers.values().map(Vec::len).sum::<usize>(),
            )
            .field("pipes", &self.pipes)
            .finish()
    }
}
