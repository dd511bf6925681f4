//! Error types for the Courier core.
//!
//! Framework-level errors (like `InvocationError`) are defined in
//! courier-framework.

use thiserror::Error;

/// Errors that can occur when building core values from external input.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// A message identifier could not be parsed.
    #[error("invalid message id '{value}': {reason}")]
    InvalidMessageId {
        /// The rejected input.
        value: String,
        /// Reason for failure.
        reason: String,
    },

    /// A peer identifier was empty.
    #[error("peer id must not be empty")]
    EmptyPeerId,
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
