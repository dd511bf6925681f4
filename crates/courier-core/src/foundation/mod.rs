//! Foundation layer - Core abstractions and type system.
//!
//! This module contains the fundamental building blocks of the Courier bus:
//! - Message system for type-erased payload passing
//! - Peer identities
//! - Dispatch context and its scoped ambient activation

pub mod context;
pub mod message;
pub mod peer;

pub use context::{ContextGuard, MessageContext, OriginatorInfo, Scoped};
pub use message::{BoxedMessage, Message, MessageId};
pub use peer::{Peer, PeerId};
