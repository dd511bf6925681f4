//! Dispatch context for the Courier bus.
//!
//! This module provides [`MessageContext`], the per-invocation metadata a
//! handler can reach while it runs, and the scoped activation that makes a
//! context the ambient "current" one.
//!
//! # Ambient Activation
//!
//! ```rust,ignore
//! use courier_core::MessageContext;
//!
//! let context = Arc::new(MessageContext::new(MessageId::new()));
//! {
//!     let _guard = MessageContext::set_current(Arc::clone(&context));
//!     assert!(MessageContext::current().is_some());
//! }
//! // Dropping the guard restores the previous context (none here).
//! assert!(MessageContext::current().is_none());
//! ```
//!
//! Activation is per thread. Async code that may resume on another worker
//! wraps its future with [`MessageContext::scope`], which re-activates the
//! context around every poll.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::foundation::message::MessageId;
use crate::foundation::peer::PeerId;

thread_local! {
    static CURRENT_CONTEXT: RefCell<Option<Arc<MessageContext>>> = const { RefCell::new(None) };
}

/// Information about the peer that sent a message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OriginatorInfo {
    /// Identifier of the sending peer.
    pub sender_id: Option<PeerId>,
    /// Endpoint of the sending peer.
    pub sender_endpoint: Option<String>,
    /// Machine the sending peer runs on.
    pub sender_machine_name: Option<String>,
    /// User that initiated the message, if known.
    pub initiator_user_name: Option<String>,
}

impl OriginatorInfo {
    /// Creates originator info for the given sender.
    pub fn new(sender_id: impl Into<PeerId>, sender_endpoint: impl Into<String>) -> Self {
        Self {
            sender_id: Some(sender_id.into()),
            sender_endpoint: Some(sender_endpoint.into()),
            ..Default::default()
        }
    }
}

/// Reply data a handler may set while processing a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Reply {
    code: i32,
    message: Option<String>,
}

/// Per-invocation dispatch metadata.
///
/// A `MessageContext` is created by the bus for each inbound message and
/// shared (through an `Arc`) with the invocation, the pipes and the handler.
/// The identity fields are immutable; only the reply slot is writable.
pub struct MessageContext {
    message_id: MessageId,
    originator: OriginatorInfo,
    reply: Mutex<Reply>,
}

impl MessageContext {
    /// Creates a context for a locally produced message (no originator).
    pub fn new(message_id: MessageId) -> Self {
        Self::with_originator(message_id, OriginatorInfo::default())
    }

    /// Creates a context for a message received from another peer.
    pub fn with_originator(message_id: MessageId, originator: OriginatorInfo) -> Self {
        Self {
            message_id,
            originator,
            reply: Mutex::new(Reply::default()),
        }
    }

    /// Returns the identifier of the message being handled.
    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    /// Returns the originator information.
    pub fn originator(&self) -> &OriginatorInfo {
        &self.originator
    }

    /// Returns the sending peer, if the message came from another peer.
    pub fn sender_id(&self) -> Option<&PeerId> {
        self.originator.sender_id.as_ref()
    }

    /// Returns the reply code set by the handler (0 means success).
    pub fn reply_code(&self) -> i32 {
        self.reply.lock().code
    }

    /// Returns the reply message set by the handler.
    pub fn reply_message(&self) -> Option<String> {
        self.reply.lock().message.clone()
    }

    /// Sets the reply code and optional message sent back to the originator.
    pub fn set_reply(&self, code: i32, message: Option<String>) {
        let mut reply = self.reply.lock();
        reply.code = code;
        reply.message = message;
    }

    // ─── Ambient activation ───────────────────────────────────────────────────

    /// Returns the context active on the current thread, if any.
    pub fn current() -> Option<Arc<MessageContext>> {
        CURRENT_CONTEXT.with(|current| current.borrow().clone())
    }

    /// Makes `context` the current context until the returned guard drops.
    ///
    /// Guards nest: dropping one restores exactly the context that was
    /// current when it was created.
    pub fn set_current(context: Arc<MessageContext>) -> ContextGuard {
        let previous = CURRENT_CONTEXT.with(|current| current.borrow_mut().replace(context));
        ContextGuard {
            previous,
            _not_send: PhantomData,
        }
    }

    /// Wraps a future so that `context` is current whenever it is polled.
    pub fn scope<F: Future>(context: Arc<MessageContext>, future: F) -> Scoped<F> {
        Scoped {
            context,
            inner: Box::pin(future),
        }
    }
}

impl fmt::Debug for MessageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageContext")
            .field("message_id", &self.message_id)
            .field("sender_id", &self.originator.sender_id)
            .field("reply_code", &self.reply_code())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// ContextGuard
// =============================================================================

/// Restores the previously current [`MessageContext`] when dropped.
///
/// The guard is bound to the thread that created it.
#[must_use = "the context is only current while the guard is alive"]
pub struct ContextGuard {
    previous: Option<Arc<MessageContext>>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_CONTEXT.with(|current| *current.borrow_mut() = previous);
    }
}

impl fmt::Debug for ContextGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextGuard")
            .field("has_previous", &self.previous.is_some())
            .finish()
    }
}

// =============================================================================
// Scoped future
// =============================================================================

/// Future returned by [`MessageContext::scope`].
pub struct Scoped<F> {
    context: Arc<MessageContext>,
    inner: Pin<Box<F>>,
}

impl<F: Future> Future for Scoped<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let _guard = MessageContext::set_current(Arc::clone(&self.context));
        self.inner.as_mut().poll(cx)
    }
}
