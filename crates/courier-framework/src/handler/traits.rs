//! Handler instance traits.
//!
//! A handler instance is what the pipeline prepares before a message reaches
//! it: pipes register mutations that run against the instance, and a handler
//! implementing [`MessageContextAware`] receives the dispatch context.
//!
//! ```rust,ignore
//! #[derive(Default)]
//! struct PlaceOrderHandler {
//!     context: Option<Arc<MessageContext>>,
//! }
//!
//! impl MessageHandler for PlaceOrderHandler {
//!     fn as_any_mut(&mut self) -> &mut dyn Any {
//!         self
//!     }
//!
//!     fn as_context_aware(&mut self) -> Option<&mut dyn MessageContextAware> {
//!         Some(self)
//!     }
//! }
//!
//! impl MessageContextAware for PlaceOrderHandler {
//!     fn set_context(&mut self, context: Arc<MessageContext>) {
//!         self.context = Some(context);
//!     }
//! }
//!
//! impl Handle<PlaceOrder> for PlaceOrderHandler {
//!     fn handle(&mut self, message: &PlaceOrder) -> Result<(), BoxError> {
//!         // ...
//!         Ok(())
//!     }
//! }
//! ```

use std::any::Any;
use std::sync::Arc;

use courier_core::{Message, MessageContext};

use crate::error::BoxError;

/// A handler instance the pipeline can prepare before invocation.
pub trait MessageHandler: Any + Send {
    /// Returns `self` for downcasting in handler mutations.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Returns the handler's context slot if it wants the dispatch context.
    fn as_context_aware(&mut self) -> Option<&mut dyn MessageContextAware> {
        None
    }
}

impl dyn MessageHandler {
    /// Returns `true` if the handler is an `H`.
    pub fn is<H: MessageHandler>(&mut self) -> bool {
        self.as_any_mut().is::<H>()
    }

    /// Downcasts the handler to its concrete type.
    pub fn downcast_mut<H: MessageHandler>(&mut self) -> Option<&mut H> {
        self.as_any_mut().downcast_mut::<H>()
    }
}

/// Opt-in slot receiving the dispatch context before the handler runs.
pub trait MessageContextAware {
    /// Stores the dispatch context of the current invocation.
    fn set_context(&mut self, context: Arc<MessageContext>);
}

/// A handler for messages of type `M`.
pub trait Handle<M: Message>: MessageHandler {
    /// Handles one message.
    fn handle(&mut self, message: &M) -> Result<(), BoxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter(u32);

    impl MessageHandler for Counter {
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    struct Other;

    impl MessageHandler for Other {
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn test_downcast_handler() {
        let mut counter = Counter::default();
        let handler: &mut dyn MessageHandler = &mut counter;

        assert!(handler.is::<Counter>());
        assert!(handler.downcast_mut::<Other>().is_none());
        if let Some(counter) = handler.downcast_mut::<Counter>() {
            counter.0 += 1;
        }
        assert!(handler.as_context_aware().is_none());
        assert_eq!(counter.0, 1);
    }
}
