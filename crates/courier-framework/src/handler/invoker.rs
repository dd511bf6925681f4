//! Handler-invoking strategies.
//!
//! A [`MessageHandlerInvoker`] performs the actual handler call for a
//! [`PipeInvocation`]. Two implementations live here:
//!
//! - [`FnInvoker`] wraps closures, synchronous and/or asynchronous.
//! - [`HandlerInvoker`] creates a [`Handle`] implementation per message,
//!   prepares it and calls it.
//!
//! [`ServiceInvoker`](super::ServiceInvoker) adapts a tower service.

use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use courier_core::{Message, MessageContext};

use super::traits::Handle;
use crate::error::{BoxError, InvocationError};
use crate::invocation::PipeInvocation;

/// Performs the handler call of an invocation.
pub trait MessageHandlerInvoker: Send + Sync {
    /// Name used in logs and errors, usually the handler's type name.
    fn name(&self) -> &str;

    /// Whether [`invoke_message_handler`](Self::invoke_message_handler) is
    /// supported.
    fn can_invoke_synchronously(&self) -> bool {
        true
    }

    /// Calls the handler on the current thread.
    fn invoke_message_handler(&self, invocation: &PipeInvocation) -> Result<(), BoxError>;

    /// Starts the handler call and returns its pending completion.
    fn invoke_message_handler_async(
        &self,
        invocation: Arc<PipeInvocation>,
    ) -> BoxFuture<'static, Result<(), BoxError>>;
}

// =============================================================================
// FnInvoker
// =============================================================================

type SyncBody = Arc<dyn Fn(&PipeInvocation) -> Result<(), BoxError> + Send + Sync>;
type AsyncBody =
    Arc<dyn Fn(Arc<PipeInvocation>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Closure-based invoker.
///
/// Both bodies run with the dispatch context current.
#[derive(Clone)]
pub struct FnInvoker {
    name: String,
    sync_body: Option<SyncBody>,
    async_body: Option<AsyncBody>,
}

impl FnInvoker {
    /// Creates an invoker with a synchronous body.
    pub fn sync<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&PipeInvocation) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            sync_body: Some(Arc::new(body)),
            async_body: None,
        }
    }

    /// Creates an asynchronous-only invoker.
    pub fn asynchronous<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Arc<PipeInvocation>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            sync_body: None,
            async_body: Some(Self::box_async(body)),
        }
    }

    /// Adds an asynchronous body to a synchronous invoker.
    pub fn with_async<F, Fut>(mut self, body: F) -> Self
    where
        F: Fn(Arc<PipeInvocation>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.async_body = Some(Self::box_async(body));
        self
    }

    fn box_async<F, Fut>(body: F) -> AsyncBody
    where
        F: Fn(Arc<PipeInvocation>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Arc::new(move |invocation: Arc<PipeInvocation>| body(invocation).boxed())
    }
}

impl MessageHandlerInvoker for FnInvoker {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_invoke_synchronously(&self) -> bool {
        self.sync_body.is_some()
    }

    fn invoke_message_handler(&self, invocation: &PipeInvocation) -> Result<(), BoxError> {
        let Some(body) = &self.sync_body else {
            return Err(Box::new(InvocationError::SynchronousUnsupported {
                invoker: self.name.clone(),
            }));
        };

        let _guard = invocation.prepare_for_external_invocation()?;
        body(invocation)
    }

    fn invoke_message_handler_async(
        &self,
        invocation: Arc<PipeInvocation>,
    ) -> BoxFuture<'static, Result<(), BoxError>> {
        match &self.async_body {
            Some(body) => {
                let context = Arc::clone(invocation.context());
                MessageContext::scope(context, body(invocation)).boxed()
            }
            None => {
                let invoker = self.clone();
                async move { invoker.invoke_message_handler(&invocation) }.boxed()
            }
        }
    }
}

impl fmt::Debug for FnInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnInvoker")
            .field("name", &self.name)
            .field("sync", &self.sync_body.is_some())
            .field("async", &self.async_body.is_some())
            .finish()
    }
}

// =============================================================================
// HandlerInvoker
// =============================================================================

/// Invoker creating one `H` per message and calling [`Handle::handle`].
///
/// The fresh instance is prepared through
/// [`PipeInvocation::prepare_for_external_invocation_with`], so it receives
/// the dispatch context and the pipes' handler mutations. On the
/// asynchronous path the handler is built and called when the returned
/// future is first polled.
pub struct HandlerInvoker<H, M> {
    name: String,
    factory: Arc<dyn Fn() -> H + Send + Sync>,
    _message: PhantomData<fn(&M)>,
}

impl<H, M> HandlerInvoker<H, M>
where
    H: Handle<M>,
    M: Message,
{
    /// Creates an invoker building handlers with `factory`.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> H + Send + Sync + 'static,
    {
        Self {
            name: type_name::<H>().to_string(),
            factory: Arc::new(factory),
            _message: PhantomData,
        }
    }

    fn invoke_handler(&self, invocation: &PipeInvocation) -> Result<(), BoxError> {
        let message = invocation.message();
        let typed = message
            .downcast_ref::<M>()
            .ok_or_else(|| InvocationError::MessageTypeMismatch {
                expected: type_name::<M>(),
                got: message.message_type_name(),
            })?;

        let mut handler = (self.factory)();
        let _guard = invocation.prepare_for_external_invocation_with(&mut handler)?;
        handler.handle(typed)
    }
}

impl<H, M> HandlerInvoker<H, M>
where
    H: Handle<M> + Default,
    M: Message,
{
    /// Creates an invoker building handlers with `H::default()`.
    pub fn with_default() -> Self {
        Self::new(H::default)
    }
}

impl<H, M> MessageHandlerInvoker for HandlerInvoker<H, M>
where
    H: Handle<M>,
    M: Message,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke_message_handler(&self, invocation: &PipeInvocation) -> Result<(), BoxError> {
        self.invoke_handler(invocation)
    }

    fn invoke_message_handler_async(
        &self,
        invocation: Arc<PipeInvocation>,
    ) -> BoxFuture<'static, Result<(), BoxError>> {
        let invoker = self.clone();
        async move { invoker.invoke_handler(&invocation) }.boxed()
    }
}

impl<H, M> Clone for HandlerInvoker<H, M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            factory: Arc::clone(&self.factory),
            _message: PhantomData,
        }
    }
}

impl<H, M> fmt::Debug for HandlerInvoker<H, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerInvoker")
            .field("name", &self.name)
            .field("message", &type_name::<M>())
            .finish()
    }
}
