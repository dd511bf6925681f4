//! Pipes: interceptors wrapping handler execution.
//!
//! A [`Pipe`] runs `before_invoke` before the handler and `after_invoke`
//! after it. Pipes of one invocation nest like scopes: before-steps run in
//! sequence order, after-steps in reverse order, so the first pipe is the
//! last one to tear down.
//!
//! ```text
//!   before: P0 ─▶ P1 ─▶ P2 ─▶ handler
//!   after:  P0 ◀─ P1 ◀─ P2 ◀──┘
//! ```
//!
//! Pipes hold no per-invocation state themselves. Whatever `before_invoke`
//! returns as a [`PipeState`] is handed back to the same pipe's
//! `after_invoke`.
//!
//! ```rust,ignore
//! struct AuditPipe;
//!
//! impl Pipe for AuditPipe {
//!     fn name(&self) -> &str {
//!         "Audit"
//!     }
//!
//!     fn before_invoke(&self, args: &mut BeforeInvokeArgs<'_>) -> Result<PipeState, BoxError> {
//!         Ok(PipeState::new(args.context().message_id()))
//!     }
//!
//!     fn after_invoke(&self, args: &AfterInvokeArgs<'_>) -> Result<(), BoxError> {
//!         let id = args.state_as::<MessageId>();
//!         audit(id, args.is_faulted());
//!         Ok(())
//!     }
//! }
//! ```

pub mod elapsed;
pub mod manager;
pub mod state;

use std::error::Error;
use std::sync::Arc;

use courier_core::{Message, MessageContext};

use crate::error::BoxError;
use crate::invocation::PipeInvocation;

pub use elapsed::ElapsedTimePipe;
pub use manager::{PipeManager, PipeSource};
pub use state::{PipeState, StateRef};

/// An interceptor around handler execution.
pub trait Pipe: Send + Sync {
    /// Unique name, used to enable or disable the pipe.
    fn name(&self) -> &str;

    /// Pipes with a higher priority wrap pipes with a lower one.
    fn priority(&self) -> i32 {
        0
    }

    /// Whether the pipe runs without being explicitly enabled.
    fn is_auto_enabled(&self) -> bool {
        true
    }

    /// Runs before the handler. The returned state comes back in
    /// [`after_invoke`](Self::after_invoke).
    ///
    /// An error aborts the invocation: later pipes and the handler do not run.
    fn before_invoke(&self, args: &mut BeforeInvokeArgs<'_>) -> Result<PipeState, BoxError>;

    /// Runs after the handler, whether it succeeded or failed.
    ///
    /// An error is logged and does not stop the remaining pipes.
    fn after_invoke(&self, args: &AfterInvokeArgs<'_>) -> Result<(), BoxError>;
}

/// A shared, type-erased pipe.
pub type BoxedPipe = Arc<dyn Pipe>;

/// Arguments of [`Pipe::before_invoke`].
pub struct BeforeInvokeArgs<'a> {
    pub(crate) invocation: &'a PipeInvocation,
    pub(crate) state_ref: &'a mut StateRef,
}

impl BeforeInvokeArgs<'_> {
    /// The invocation being prepared.
    pub fn invocation(&self) -> &PipeInvocation {
        self.invocation
    }

    /// The message being handled.
    pub fn message(&self) -> &dyn Message {
        self.invocation.message()
    }

    /// The dispatch context of the invocation.
    pub fn context(&self) -> &Arc<MessageContext> {
        self.invocation.context()
    }

    /// The slot shared by all before-steps of this invocation.
    pub fn state_ref(&mut self) -> &mut StateRef {
        self.state_ref
    }

    /// Registers a mutation applied to the handler instance before it runs.
    pub fn add_handler_mutation<F>(&self, mutation: F)
    where
        F: Fn(&mut dyn crate::handler::MessageHandler) + Send + Sync + 'static,
    {
        self.invocation.add_handler_mutation(mutation);
    }
}

/// Arguments of [`Pipe::after_invoke`].
pub struct AfterInvokeArgs<'a> {
    pub(crate) invocation: &'a PipeInvocation,
    pub(crate) state: &'a PipeState,
    pub(crate) error: Option<&'a (dyn Error + Send + Sync + 'static)>,
}

impl AfterInvokeArgs<'_> {
    /// The invocation being torn down.
    pub fn invocation(&self) -> &PipeInvocation {
        self.invocation
    }

    /// The message that was handled.
    pub fn message(&self) -> &dyn Message {
        self.invocation.message()
    }

    /// The dispatch context of the invocation.
    pub fn context(&self) -> &Arc<MessageContext> {
        self.invocation.context()
    }

    /// The state this pipe returned from `before_invoke`.
    pub fn state(&self) -> &PipeState {
        self.state
    }

    /// The state this pipe returned from `before_invoke`, if it is a `T`.
    pub fn state_as<T: 'static>(&self) -> Option<&T> {
        self.state.downcast_ref()
    }

    /// Returns `true` if the handler failed or was cancelled.
    pub fn is_faulted(&self) -> bool {
        self.error.is_some()
    }

    /// The handler's error, if it failed.
    pub fn error(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        self.error
    }
}
