//! Message abstractions for the Courier bus.
//!
//! This module provides the core message infrastructure:
//!
//! - [`Message`] - Base trait for every payload carried by the bus
//! - [`MessageId`] - Unique identifier attached to each sent message
//! - [`BoxedMessage`] - Type-erased, cheaply clonable message container
//!
//! # Custom Representation
//!
//! Messages are logged by type name. A message type may opt into a richer
//! log line by returning itself from [`Message::display`]:
//!
//! ```rust,ignore
//! use courier_core::Message;
//!
//! #[derive(Debug)]
//! struct PlaceOrder {
//!     order_id: u64,
//! }
//!
//! impl std::fmt::Display for PlaceOrder {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "OrderId: {}", self.order_id)
//!     }
//! }
//!
//! impl Message for PlaceOrder {
//!     fn as_any(&self) -> &dyn std::any::Any {
//!         self
//!     }
//!
//!     fn display(&self) -> Option<&dyn std::fmt::Display> {
//!         Some(self)
//!     }
//! }
//!
//! // Logged as "PlaceOrder {OrderId: 42}"
//! ```

use std::any::{Any, TypeId};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

// ============================================================================
// Message Trait
// ============================================================================

/// The base trait for all messages handled by the bus.
///
/// Messages are immutable once created and are shared read-only between the
/// dispatcher, the pipes and the handler. They are type-erased using
/// `dyn Message` and can be downcast to concrete types using `as_any()`.
pub trait Message: Any + Send + Sync {
    /// Returns a reference to self as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Returns the full type name of this message.
    ///
    /// The default implementation uses [`std::any::type_name`], which is
    /// also the logger key of the message type.
    fn message_type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Returns the custom human-readable representation of this message.
    ///
    /// Types without one return `None` (the default) and are rendered by
    /// their short type name only.
    fn display(&self) -> Option<&dyn fmt::Display> {
        None
    }
}

impl dyn Message {
    /// Returns the `TypeId` of the concrete message type.
    pub fn concrete_type_id(&self) -> TypeId {
        self.as_any().type_id()
    }

    /// Returns `true` if the concrete message type is `M`.
    pub fn is<M: Message>(&self) -> bool {
        self.as_any().is::<M>()
    }

    /// Attempts to downcast to a concrete message type.
    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.as_any().downcast_ref()
    }
}

// ============================================================================
// MessageId
// ============================================================================

/// Unique identifier of a message on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new random message identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| CoreError::InvalidMessageId {
                value: s.to_string(),
                reason: e.to_string(),
            })
    }
}

// ============================================================================
// Boxed Message
// ============================================================================

/// A type-erased container for messages that supports runtime downcasting.
///
/// `BoxedMessage` wraps any [`Message`] in an `Arc` so one inbound message
/// can be handed to several invocations without copying.
#[derive(Clone)]
pub struct BoxedMessage {
    inner: Arc<dyn Message>,
}

impl BoxedMessage {
    /// Creates a new `BoxedMessage` from any type implementing `Message`.
    pub fn new<M: Message>(message: M) -> Self {
        Self {
            inner: Arc::new(message),
        }
    }

    /// Returns the inner `Arc<dyn Message>`.
    pub fn inner(&self) -> &Arc<dyn Message> {
        &self.inner
    }
}

impl From<Arc<dyn Message>> for BoxedMessage {
    fn from(inner: Arc<dyn Message>) -> Self {
        Self { inner }
    }
}

impl std::ops::Deref for BoxedMessage {
    type Target = dyn Message;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl fmt::Debug for BoxedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxedMessage")
            .field("message_type", &self.message_type_name())
            .finish()
    }
}
