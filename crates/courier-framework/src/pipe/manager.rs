//! Pipe registration and selection.
//!
//! The [`PipeManager`] owns the registered pipes and decides which of them
//! wrap a given handler. Explicitly disabled pipes never run; explicitly
//! enabled pipes always do; other pipes run when they are auto-enabled.
//!
//! The selected pipes are ordered by descending priority (ties keep
//! registration order) when an invocation is created. The invocation itself
//! never reorders them.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use courier_core::{BoxedMessage, MessageContext};

use super::BoxedPipe;
use crate::handler::MessageHandlerInvoker;
use crate::invocation::PipeInvocation;

/// Provides the pipes that apply to a handler.
///
/// Implemented for closures:
///
/// ```rust,ignore
/// manager.register_source(|invoker: &dyn MessageHandlerInvoker| {
///     if invoker.name().starts_with("orders::") {
///         vec![Arc::new(TransactionPipe) as BoxedPipe]
///     } else {
///         Vec::new()
///     }
/// });
/// ```
pub trait PipeSource: Send + Sync {
    /// Returns the pipes this source contributes for `invoker`.
    fn pipes(&self, invoker: &dyn MessageHandlerInvoker) -> Vec<BoxedPipe>;
}

impl<F> PipeSource for F
where
    F: Fn(&dyn MessageHandlerInvoker) -> Vec<BoxedPipe> + Send + Sync,
{
    fn pipes(&self, invoker: &dyn MessageHandlerInvoker) -> Vec<BoxedPipe> {
        self(invoker)
    }
}

/// A source contributing one pipe to every handler.
struct SinglePipe(BoxedPipe);

impl PipeSource for SinglePipe {
    fn pipes(&self, _invoker: &dyn MessageHandlerInvoker) -> Vec<BoxedPipe> {
        vec![Arc::clone(&self.0)]
    }
}

/// Registry of pipe sources with enable/disable switches.
///
/// # Thread Safety
///
/// `PipeManager` is `Send + Sync`; pipes can be switched while messages are
/// being dispatched. Invocations already created keep their pipe list.
#[derive(Default)]
pub struct PipeManager {
    sources: RwLock<Vec<Box<dyn PipeSource>>>,
    enabled: RwLock<HashSet<String>>,
    disabled: RwLock<HashSet<String>>,
}

impl PipeManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pipe applying to every handler.
    pub fn register_pipe(&self, pipe: BoxedPipe) {
        debug!(pipe = pipe.name(), priority = pipe.priority(), "Registering pipe");
        self.sources.write().push(Box::new(SinglePipe(pipe)));
    }

    /// Registers a pipe (builder pattern).
    pub fn with_pipe(self, pipe: BoxedPipe) -> Self {
        self.register_pipe(pipe);
        self
    }

    /// Registers a pipe source.
    pub fn register_source(&self, source: impl PipeSource + 'static) {
        self.sources.write().push(Box::new(source));
    }

    /// Forces the named pipe on, even if it is not auto-enabled.
    pub fn enable_pipe(&self, name: &str) {
        info!(pipe = name, "Enabling pipe");
        self.disabled.write().remove(name);
        self.enabled.write().insert(name.to_string());
    }

    /// Forces the named pipe off.
    pub fn disable_pipe(&self, name: &str) {
        info!(pipe = name, "Disabling pipe");
        self.enabled.write().remove(name);
        self.disabled.write().insert(name.to_string());
    }

    /// Returns `true` if `pipe` should wrap handlers.
    pub fn is_enabled(&self, pipe: &BoxedPipe) -> bool {
        let name = pipe.name();
        if self.disabled.read().contains(name) {
            return false;
        }
        pipe.is_auto_enabled() || self.enabled.read().contains(name)
    }

    /// Returns the enabled pipes for `invoker`, highest priority first.
    pub fn enabled_pipes(&self, invoker: &dyn MessageHandlerInvoker) -> Vec<BoxedPipe> {
        let mut pipes: Vec<BoxedPipe> = self
            .sources
            .read()
            .iter()
            .flat_map(|source| source.pipes(invoker))
            .filter(|pipe| self.is_enabled(pipe))
            .collect();
        pipes.sort_by_key(|pipe| std::cmp::Reverse(pipe.priority()));
        pipes
    }

    /// Creates an invocation of `invoker` for `message` wrapped by the
    /// currently enabled pipes.
    pub fn create_invocation(
        &self,
        invoker: Arc<dyn MessageHandlerInvoker>,
        message: BoxedMessage,
        context: Arc<MessageContext>,
    ) -> Arc<PipeInvocation> {
        let pipes = self.enabled_pipes(invoker.as_ref());
        Arc::new(PipeInvocation::new(invoker, message, context, pipes))
    }
}

impl std::fmt::Debug for PipeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeManager")
            .field("source_count", &self.sources.read().len())
            .field("enabled", &*self.enabled.read())
            .field("disabled", &*self.disabled.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::handler::FnInvoker;
    use crate::pipe::{AfterInvokeArgs, BeforeInvokeArgs, Pipe, PipeState};
    use courier_core::{Message, MessageId};
    use std::any::Any;

    struct NamedPipe {
        name: &'static str,
        priority: i32,
        auto: bool,
    }

    impl Pipe for NamedPipe {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn is_auto_enabled(&self) -> bool {
            self.auto
        }

        fn before_invoke(&self, _args: &mut BeforeInvokeArgs<'_>) -> Result<PipeState, BoxError> {
            Ok(PipeState::empty())
        }

        fn after_invoke(&self, _args: &AfterInvokeArgs<'_>) -> Result<(), BoxError> {
            Ok(())
        }
    }

    fn pipe(name: &'static str, priority: i32, auto: bool) -> BoxedPipe {
        Arc::new(NamedPipe {
            name,
            priority,
            auto,
        })
    }

    fn names(pipes: &[BoxedPipe]) -> Vec<&str> {
        pipes.iter().map(|p| p.name()).collect()
    }

    fn invoker(name: &str) -> FnInvoker {
        FnInvoker::sync(name, |_| Ok(()))
    }

    struct Ping;

    impl Message for Ping {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_pipes_ordered_by_descending_priority() {
        let manager = PipeManager::new()
            .with_pipe(pipe("low", -5, true))
            .with_pipe(pipe("high", 10, true))
            .with_pipe(pipe("mid-a", 0, true))
            .with_pipe(pipe("mid-b", 0, true));

        let pipes = manager.enabled_pipes(&invoker("h"));
        assert_eq!(names(&pipes), vec!["high", "mid-a", "mid-b", "low"]);
    }

    #[test]
    fn test_enable_and_disable_overrides() {
        let manager = PipeManager::new()
            .with_pipe(pipe("auto", 0, true))
            .with_pipe(pipe("manual", 0, false));

        assert_eq!(names(&manager.enabled_pipes(&invoker("h"))), vec!["auto"]);

        manager.enable_pipe("manual");
        manager.disable_pipe("auto");
        assert_eq!(names(&manager.enabled_pipes(&invoker("h"))), vec!["manual"]);

        manager.enable_pipe("auto");
        assert_eq!(
            names(&manager.enabled_pipes(&invoker("h"))),
            vec!["auto", "manual"]
        );
    }

    #[test]
    fn test_source_selects_pipes_per_handler() {
        let manager = PipeManager::new();
        let orders_pipe = pipe("orders-only", 0, true);
        manager.register_source(move |invoker: &dyn MessageHandlerInvoker| {
            if invoker.name().starts_with("orders::") {
                vec![Arc::clone(&orders_pipe)]
            } else {
                Vec::new()
            }
        });

        assert_eq!(
            names(&manager.enabled_pipes(&invoker("orders::PlaceOrderHandler"))),
            vec!["orders-only"]
        );
        assert!(manager.enabled_pipes(&invoker("billing::Handler")).is_empty());
    }

    #[test]
    fn test_create_invocation_uses_enabled_pipes() {
        let manager = PipeManager::new()
            .with_pipe(pipe("a", 1, true))
            .with_pipe(pipe("b", 2, true));
        manager.disable_pipe("a");

        let invocation = manager.create_invocation(
            Arc::new(invoker("h")),
            BoxedMessage::new(Ping),
            Arc::new(MessageContext::new(MessageId::new())),
        );
        assert_eq!(names(invocation.pipes()), vec!["b"]);
    }
}
