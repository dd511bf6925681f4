//! Opaque state carried between the two phases of a pipe.

use std::any::Any;
use std::fmt;

/// The value a pipe returns from `before_invoke` and gets back, untouched,
/// in its own `after_invoke`.
#[derive(Default)]
pub struct PipeState(Option<Box<dyn Any + Send + Sync>>);

impl PipeState {
    /// A state carrying nothing.
    pub fn empty() -> Self {
        Self(None)
    }

    /// A state carrying `value`.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Some(Box::new(value)))
    }

    /// Returns `true` if the state carries nothing.
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Returns the carried value if it is a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_ref().and_then(|value| value.downcast_ref())
    }
}

impl fmt::Debug for PipeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PipeState")
            .field(&if self.is_empty() { "empty" } else { "set" })
            .finish()
    }
}

/// A slot shared by every pipe's `before_invoke` during one invocation.
///
/// Pipes use it to coordinate, e.g. the first pipe to see an empty slot
/// knows it wraps the outermost invocation.
#[derive(Default)]
pub struct StateRef(Option<Box<dyn Any + Send>>);

impl StateRef {
    /// Returns `true` if some pipe already stored a value.
    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }

    /// Returns the stored value if it is a `T`.
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_ref().and_then(|value| value.downcast_ref())
    }

    /// Returns the stored value mutably if it is a `T`.
    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.0.as_mut().and_then(|value| value.downcast_mut())
    }

    /// Stores `value`, replacing whatever was there.
    pub fn set<T: Any + Send>(&mut self, value: T) {
        self.0 = Some(Box::new(value));
    }
}

impl fmt::Debug for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateRef")
            .field("is_set", &self.is_set())
            .finish()
    }
}
