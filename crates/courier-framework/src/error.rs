//! Error types for the Courier framework.

use std::any::Any;

use thiserror::Error;

pub use tower::BoxError;

/// Error handed to the after-invoke phase when an asynchronous handler is
/// dropped before it completed.
#[derive(Debug, Clone, Copy, Error)]
#[error("handler invocation cancelled")]
pub struct Cancelled;

/// Error handed to the after-invoke phase when a handler panicked.
///
/// The panic itself keeps unwinding once the after-phase has run.
#[derive(Debug, Clone, Error)]
#[error("handler panicked: {message}")]
pub struct Panicked {
    message: String,
}

impl Panicked {
    /// Builds the error from a panic payload.
    pub fn from_payload(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|message| message.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self { message }
    }

    /// The panic message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors that can occur while running a [`PipeInvocation`](crate::PipeInvocation).
#[derive(Debug, Error)]
pub enum InvocationError {
    /// The after-invoke phase was requested before the before-invoke phase
    /// ever ran. This is a bug in the calling invoker.
    #[error(
        "missing pipe states, did you call prepare_for_external_invocation in your handler invoker?"
    )]
    MissingPipeStates,

    /// The after-invoke phase already ran for this invocation.
    #[error("after-invoke already ran for this invocation")]
    AlreadyCompleted,

    /// A previous before-invoke phase failed or is still running.
    #[error("before-invoke did not complete for this invocation")]
    BeforeInvokeIncomplete,

    /// A pipe failed during the before-invoke phase; the handler did not run.
    #[error("pipe '{pipe}' failed in before-invoke: {source}")]
    BeforeInvoke {
        /// Name of the failing pipe.
        pipe: String,
        /// The pipe's error.
        #[source]
        source: BoxError,
    },

    /// The invoker only supports asynchronous invocation.
    #[error("invoker '{invoker}' cannot invoke handlers synchronously")]
    SynchronousUnsupported {
        /// Name of the invoker.
        invoker: String,
    },

    /// The message does not have the type the handler expects.
    #[error("message type mismatch: expected '{expected}', got '{got}'")]
    MessageTypeMismatch {
        /// Expected type name.
        expected: &'static str,
        /// Actual type name.
        got: &'static str,
    },

    /// The handler failed. The handler's error is carried unchanged.
    #[error(transparent)]
    Handler(BoxError),
}

impl InvocationError {
    /// Returns the handler's error, if the handler is what failed.
    pub fn handler_error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::Handler(error) => Some(error.as_ref()),
            _ => None,
        }
    }

    /// Unwraps the handler's error, or gives `self` back.
    pub fn into_handler_error(self) -> Result<BoxError, Self> {
        match self {
            Self::Handler(error) => Ok(error),
            other => Err(other),
        }
    }

    /// Returns `true` for misuse of the invocation protocol by an invoker.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::MissingPipeStates | Self::AlreadyCompleted | Self::BeforeInvokeIncomplete
        )
    }
}

/// Result type for invocation operations.
pub type InvocationResult<T> = Result<T, InvocationError>;
