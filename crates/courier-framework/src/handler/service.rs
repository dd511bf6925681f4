//! Tower service adapter.
//!
//! [`ServiceInvoker<S>`] turns any `tower::Service<Arc<PipeInvocation>>` into
//! an asynchronous-only handler invoker, so handlers can be composed from
//! ordinary tower layers (timeouts, filters, concurrency limits) and still
//! run inside the pipe pipeline.

use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tower::{Service, ServiceExt};

use courier_core::MessageContext;

use super::invoker::MessageHandlerInvoker;
use crate::error::{BoxError, InvocationError};
use crate::invocation::PipeInvocation;

/// Invoker backed by a tower service.
///
/// The service is cloned per invocation and driven to readiness before each
/// call. The dispatch context is current whenever the call is polled.
#[derive(Clone)]
pub struct ServiceInvoker<S> {
    name: String,
    service: S,
}

impl<S> ServiceInvoker<S> {
    /// Wraps `service` under `name`.
    pub fn new(name: impl Into<String>, service: S) -> Self {
        Self {
            name: name.into(),
            service,
        }
    }

    /// Returns a reference to the wrapped service.
    pub fn get_ref(&self) -> &S {
        &self.service
    }
}

impl<S> MessageHandlerInvoker for ServiceInvoker<S>
where
    S: Service<Arc<PipeInvocation>, Response = ()> + Clone + Send + Sync + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn can_invoke_synchronously(&self) -> bool {
        false
    }

    fn invoke_message_handler(&self, _invocation: &PipeInvocation) -> Result<(), BoxError> {
        Err(Box::new(InvocationError::SynchronousUnsupported {
            invoker: self.name.clone(),
        }))
    }

    fn invoke_message_handler_async(
        &self,
        invocation: Arc<PipeInvocation>,
    ) -> BoxFuture<'static, Result<(), BoxError>> {
        let mut service = self.service.clone();
        let context = Arc::clone(invocation.context());

        MessageContext::scope(context, async move {
            let ready = service.ready().await.map_err(Into::<BoxError>::into)?;
            ready.call(invocation).await.map_err(Into::<BoxError>::into)
        })
        .boxed()
    }
}

impl<S> fmt::Debug for ServiceInvoker<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceInvoker")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::{BoxedMessage, Message, MessageId};
    use parking_lot::Mutex;
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::service_fn;

    struct Shipment;

    impl Message for Shipment {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn invocation<S>(invoker: ServiceInvoker<S>) -> Arc<PipeInvocation>
    where
        ServiceInvoker<S>: MessageHandlerInvoker + 'static,
    {
        Arc::new(PipeInvocation::new(
            Arc::new(invoker),
            BoxedMessage::new(Shipment),
            Arc::new(MessageContext::new(MessageId::new())),
            Vec::new(),
        ))
    }

    #[tokio::test]
    async fn test_service_invoker_calls_service() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let service = service_fn(move |invocation: Arc<PipeInvocation>| {
            let counter = Arc::clone(&counter);
            async move {
                assert!(invocation.message().is::<Shipment>());
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), BoxError>(())
            }
        });

        let invocation = invocation(ServiceInvoker::new("shipping", service));
        invocation.run_async().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_service_sees_current_context() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let service = service_fn(move |_: Arc<PipeInvocation>| {
            let sink = Arc::clone(&sink);
            async move {
                tokio::task::yield_now().await;
                *sink.lock() = MessageContext::current().map(|c| c.message_id());
                Ok::<(), BoxError>(())
            }
        });

        let invocation = invocation(ServiceInvoker::new("shipping", service));
        invocation.run_async().await.unwrap();

        assert_eq!(*seen.lock(), Some(invocation.context().message_id()));
    }

    #[tokio::test]
    async fn test_service_error_is_handler_error() {
        let service = service_fn(|_: Arc<PipeInvocation>| async {
            Err::<(), BoxError>("warehouse offline".into())
        });

        let invocation = invocation(ServiceInvoker::new("shipping", service));
        let error = invocation.run_async().await.unwrap_err();

        assert_eq!(error.to_string(), "warehouse offline");
    }

    #[test]
    fn test_service_invoker_is_async_only() {
        let service = service_fn(|_: Arc<PipeInvocation>| async { Ok::<(), BoxError>(()) });
        let invocation = invocation(ServiceInvoker::new("shipping", service));

        assert!(matches!(
            invocation.run(),
            Err(InvocationError::SynchronousUnsupported { ref invoker }) if invoker == "shipping"
        ));
    }
}
