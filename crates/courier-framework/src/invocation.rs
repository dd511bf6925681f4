//! One execution of a message through its pipes and handler.
//!
//! A [`PipeInvocation`] goes through the following states, each entered at
//! most once:
//!
//! ```text
//! Created ──▶ BeforeRun ──▶ HandlerRunning ──▶ AfterRun
//! ```
//!
//! The before-phase runs every pipe's `before_invoke` in order and captures
//! one [`PipeState`] per pipe. The after-phase hands each pipe its own state
//! back, in reverse order, together with the handler's outcome.
//!
//! Invokers drive the handler in one of three ways:
//!
//! - [`PipeInvocation::run`] for synchronous handlers,
//! - [`PipeInvocation::run_async`] for asynchronous handlers,
//! - [`PipeInvocation::prepare_for_external_invocation`] followed by
//!   [`PipeInvocation::complete`] for callers that invoke the handler
//!   themselves.

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{Level, debug, error, trace};

use courier_core::{BoxedMessage, ContextGuard, LogArgs, Message, MessageContext, MessageLogger};

use crate::error::{BoxError, Cancelled, InvocationError, InvocationResult, Panicked};
use crate::handler::{MessageHandler, MessageHandlerInvoker};
use crate::pipe::{AfterInvokeArgs, BeforeInvokeArgs, BoxedPipe, PipeState, StateRef};

type HandlerMutation = Arc<dyn Fn(&mut dyn MessageHandler) + Send + Sync>;

/// An error reference as handed to after-invoke steps.
type ErrorRef<'a> = &'a (dyn Error + Send + Sync + 'static);

type PanicPayload = Box<dyn Any + Send>;

/// A handler's pending completion, with panics caught.
type HandlerFuture = BoxFuture<'static, Result<Result<(), BoxError>, PanicPayload>>;

// =============================================================================
// PipeInvocation
// =============================================================================

/// One execution of a message through its pipes and handler.
///
/// An invocation is used exactly once; create a new one per handled message.
pub struct PipeInvocation {
    invoker: Arc<dyn MessageHandlerInvoker>,
    message: BoxedMessage,
    context: Arc<MessageContext>,
    pipes: Vec<BoxedPipe>,
    /// Unset until the before-phase succeeded, then exactly one per pipe.
    pipe_states: OnceLock<Box<[PipeState]>>,
    before_started: AtomicBool,
    completed: AtomicBool,
    handler_mutations: Mutex<Vec<HandlerMutation>>,
    logger: MessageLogger,
}

impl PipeInvocation {
    /// Creates an invocation of `invoker` for `message`, wrapped by `pipes`
    /// in the given order.
    pub fn new(
        invoker: Arc<dyn MessageHandlerInvoker>,
        message: BoxedMessage,
        context: Arc<MessageContext>,
        pipes: Vec<BoxedPipe>,
    ) -> Self {
        Self {
            invoker,
            message,
            context,
            pipes,
            pipe_states: OnceLock::new(),
            before_started: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            handler_mutations: Mutex::new(Vec::new()),
            logger: MessageLogger::get::<PipeInvocation>(),
        }
    }

    /// Replaces the logger used for the `HANDLE` line.
    pub fn with_logger(mut self, logger: MessageLogger) -> Self {
        self.logger = logger;
        self
    }

    // ─── Accessors ────────────────────────────────────────────────────────────

    /// The message being handled.
    pub fn message(&self) -> &dyn Message {
        &*self.message
    }

    /// The message being handled, as a shareable handle.
    pub fn boxed_message(&self) -> &BoxedMessage {
        &self.message
    }

    /// The dispatch context of this invocation.
    pub fn context(&self) -> &Arc<MessageContext> {
        &self.context
    }

    /// The handler-invoking strategy.
    pub fn invoker(&self) -> &Arc<dyn MessageHandlerInvoker> {
        &self.invoker
    }

    /// The pipes wrapping the handler, outermost first.
    pub fn pipes(&self) -> &[BoxedPipe] {
        &self.pipes
    }

    /// Returns `true` once the before-phase has run successfully.
    pub fn is_prepared(&self) -> bool {
        self.pipe_states.get().is_some()
    }

    /// Returns `true` once the after-phase has run.
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Registers a mutation applied to the handler instance by
    /// [`prepare_for_external_invocation_with`](Self::prepare_for_external_invocation_with).
    ///
    /// Mutations apply in registration order.
    pub fn add_handler_mutation<F>(&self, mutation: F)
    where
        F: Fn(&mut dyn MessageHandler) + Send + Sync + 'static,
    {
        self.handler_mutations.lock().push(Arc::new(mutation));
    }

    // ─── Execution ────────────────────────────────────────────────────────────

    /// Runs the pipes and the handler synchronously.
    ///
    /// On handler failure every pipe sees the error, then the error is
    /// returned unchanged as [`InvocationError::Handler`]. A panicking
    /// handler is reported to the pipes as [`Panicked`] and the panic then
    /// resumes.
    pub fn run(&self) -> InvocationResult<()> {
        if !self.invoker.can_invoke_synchronously() {
            return Err(InvocationError::SynchronousUnsupported {
                invoker: self.invoker.name().to_string(),
            });
        }

        self.log_handle();
        self.ensure_before_phase()?;

        let result = match panic::catch_unwind(AssertUnwindSafe(|| {
            self.invoker.invoke_message_handler(self)
        })) {
            Ok(result) => result,
            Err(payload) => self.resume_after_panic(payload),
        };
        self.finish(result)
    }

    /// Runs the pipes and the handler asynchronously.
    ///
    /// The before-phase runs now. The after-phase runs inline in the poll
    /// that observes the handler's completion, or from `Drop` with a
    /// [`Cancelled`] error if the future is dropped first.
    pub fn run_async(self: &Arc<Self>) -> InvocationFuture {
        self.log_handle();

        let state = match self.ensure_before_phase() {
            Ok(()) => {
                let handler = match panic::catch_unwind(AssertUnwindSafe(|| {
                    self.invoker.invoke_message_handler_async(Arc::clone(self))
                })) {
                    Ok(handler) => handler,
                    Err(payload) => self.resume_after_panic(payload),
                };
                FutureState::Running(AssertUnwindSafe(handler).catch_unwind().boxed())
            }
            Err(error) => FutureState::Failed(error),
        };

        InvocationFuture {
            invocation: Arc::clone(self),
            state,
        }
    }

    /// Runs the before-phase if it has not run yet and makes the dispatch
    /// context current until the returned guard drops.
    ///
    /// Does not run the after-phase; call [`complete`](Self::complete) once
    /// the handler finished.
    pub fn prepare_for_external_invocation(&self) -> InvocationResult<ContextGuard> {
        self.ensure_before_phase()?;
        Ok(MessageContext::set_current(Arc::clone(&self.context)))
    }

    /// Like [`prepare_for_external_invocation`](Self::prepare_for_external_invocation),
    /// and also prepares `handler`: a context-aware handler receives the
    /// dispatch context, then the registered mutations apply in order.
    pub fn prepare_for_external_invocation_with(
        &self,
        handler: &mut dyn MessageHandler,
    ) -> InvocationResult<ContextGuard> {
        let guard = self.prepare_for_external_invocation()?;

        if let Some(aware) = handler.as_context_aware() {
            aware.set_context(Arc::clone(&self.context));
        }

        let mutations = self.handler_mutations.lock().clone();
        for mutation in &mutations {
            mutation(&mut *handler);
        }

        Ok(guard)
    }

    /// Runs the after-phase: every pipe's `after_invoke` in reverse order,
    /// each with its own state and `error` as the handler's outcome.
    ///
    /// A failing after-step is logged and the remaining steps still run.
    ///
    /// # Errors
    ///
    /// [`InvocationError::MissingPipeStates`] if the before-phase never
    /// completed, [`InvocationError::AlreadyCompleted`] on a second call.
    pub fn complete(&self, error: Option<ErrorRef<'_>>) -> InvocationResult<()> {
        let Some(states) = self.pipe_states.get() else {
            error!(
                invoker = self.invoker.name(),
                message_id = %self.context.message_id(),
                "After-invoke requested before the pipes were prepared"
            );
            return Err(InvocationError::MissingPipeStates);
        };

        if self.completed.swap(true, Ordering::AcqRel) {
            return Err(InvocationError::AlreadyCompleted);
        }

        for (pipe, state) in self.pipes.iter().zip(states.iter()).rev() {
            let args = AfterInvokeArgs {
                invocation: self,
                state,
                error,
            };
            trace!(pipe = pipe.name(), faulted = args.is_faulted(), "After invoke");
            if let Err(pipe_error) = pipe.after_invoke(&args) {
                error!(
                    pipe = pipe.name(),
                    message_id = %self.context.message_id(),
                    error = %pipe_error,
                    "Pipe failed in after-invoke"
                );
            }
        }

        Ok(())
    }

    // ─── Internals ────────────────────────────────────────────────────────────

    fn log_handle(&self) {
        self.logger.log_format(
            "HANDLE : {0} [{1}]",
            self.message(),
            LogArgs::new()
                .message_id(self.context.message_id())
                .level(Level::DEBUG),
        );
    }

    fn ensure_before_phase(&self) -> InvocationResult<()> {
        if self.is_prepared() {
            return Ok(());
        }
        if self.before_started.swap(true, Ordering::AcqRel) {
            return Err(InvocationError::BeforeInvokeIncomplete);
        }

        let mut state_ref = StateRef::default();
        let mut states = Vec::with_capacity(self.pipes.len());

        for pipe in &self.pipes {
            trace!(pipe = pipe.name(), "Before invoke");
            let mut args = BeforeInvokeArgs {
                invocation: self,
                state_ref: &mut state_ref,
            };
            match pipe.before_invoke(&mut args) {
                Ok(state) => states.push(state),
                Err(source) => {
                    error!(
                        pipe = pipe.name(),
                        message_id = %self.context.message_id(),
                        error = %source,
                        "Pipe failed in before-invoke"
                    );
                    return Err(InvocationError::BeforeInvoke {
                        pipe: pipe.name().to_string(),
                        source,
                    });
                }
            }
        }

        // `before_started` guarantees a single writer.
        let _ = self.pipe_states.set(states.into_boxed_slice());
        Ok(())
    }

    /// Runs the after-phase for a panicked handler, then resumes the panic.
    fn resume_after_panic(&self, payload: PanicPayload) -> ! {
        let panicked = Panicked::from_payload(&*payload);
        error!(
            invoker = self.invoker.name(),
            message_id = %self.context.message_id(),
            error = %panicked,
            "Handler panicked"
        );
        let error: ErrorRef<'_> = &panicked;
        if let Err(error) = self.complete(Some(error)) {
            error!(error = %error, "Failed to complete a panicked invocation");
        }
        panic::resume_unwind(payload)
    }

    fn finish(&self, result: Result<(), BoxError>) -> InvocationResult<()> {
        let error: Option<ErrorRef<'_>> = result.as_ref().err().map(|error| &**error);
        let completion = self.complete(error);

        match result {
            Ok(()) => completion,
            Err(error) => {
                if let Err(completion_error) = completion {
                    error!(
                        invoker = self.invoker.name(),
                        error = %completion_error,
                        "Failed to complete a faulted invocation"
                    );
                }
                Err(InvocationError::Handler(error))
            }
        }
    }
}

impl fmt::Debug for PipeInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeInvocation")
            .field("invoker", &self.invoker.name())
            .field("message", &self.message)
            .field("message_id", &self.context.message_id())
            .field("pipe_count", &self.pipes.len())
            .field("prepared", &self.is_prepared())
            .field("completed", &self.is_completed())
            .finish()
    }
}

// =============================================================================
// InvocationFuture
// =============================================================================

enum FutureState {
    Running(HandlerFuture),
    Failed(InvocationError),
    Done,
}

/// Future returned by [`PipeInvocation::run_async`].
///
/// Resolves to the handler's outcome once the after-phase has run.
#[must_use = "futures do nothing unless polled; dropping it cancels the handler"]
pub struct InvocationFuture {
    invocation: Arc<PipeInvocation>,
    state: FutureState,
}

impl InvocationFuture {
    /// The invocation this future drives.
    pub fn invocation(&self) -> &Arc<PipeInvocation> {
        &self.invocation
    }
}

impl Future for InvocationFuture {
    type Output = InvocationResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match std::mem::replace(&mut this.state, FutureState::Done) {
            FutureState::Running(mut handler) => match handler.as_mut().poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(this.invocation.finish(result)),
                Poll::Ready(Err(payload)) => this.invocation.resume_after_panic(payload),
                Poll::Pending => {
                    this.state = FutureState::Running(handler);
                    Poll::Pending
                }
            },
            FutureState::Failed(error) => Poll::Ready(Err(error)),
            FutureState::Done => Poll::Ready(Err(InvocationError::AlreadyCompleted)),
        }
    }
}

impl Drop for InvocationFuture {
    fn drop(&mut self) {
        if let FutureState::Running(_) = self.state {
            self.state = FutureState::Done;
            debug!(
                invoker = self.invocation.invoker.name(),
                message_id = %self.invocation.context.message_id(),
                "Handler dropped before completion"
            );
            let cancelled: ErrorRef<'static> = &Cancelled;
            if let Err(error) = self.invocation.complete(Some(cancelled)) {
                error!(error = %error, "Failed to complete a cancelled invocation");
            }
        }
    }
}

impl fmt::Debug for InvocationFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            FutureState::Running(_) => "running",
            FutureState::Failed(_) => "failed",
            FutureState::Done => "done",
        };
        f.debug_struct("InvocationFuture")
            .field("invocation", &self.invocation)
            .field("state", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{FnInvoker, MessageContextAware};
    use crate::pipe::Pipe;
    use courier_core::{LogInfoCache, LogSink, MessageId};
    use std::sync::atomic::AtomicUsize;

    // ─── Fixtures ─────────────────────────────────────────────────────────────

    #[derive(Debug, thiserror::Error)]
    #[error("boom: {0}")]
    struct Boom(u32);

    struct Ping;

    impl Message for Ping {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// What a recording pipe observed in its after-step.
    #[derive(Debug, Clone, PartialEq)]
    struct AfterCall {
        pipe: &'static str,
        state: Option<usize>,
        faulted: bool,
        error: Option<String>,
    }

    #[derive(Default)]
    struct Journal {
        before: Mutex<Vec<&'static str>>,
        after: Mutex<Vec<AfterCall>>,
    }

    struct RecordingPipe {
        name: &'static str,
        token: usize,
        journal: Arc<Journal>,
        fail_before: bool,
        fail_after: bool,
    }

    impl RecordingPipe {
        fn new(name: &'static str, token: usize, journal: &Arc<Journal>) -> Self {
            Self {
                name,
                token,
                journal: Arc::clone(journal),
                fail_before: false,
                fail_after: false,
            }
        }
    }

    impl Pipe for RecordingPipe {
        fn name(&self) -> &str {
            self.name
        }

        fn before_invoke(&self, _args: &mut BeforeInvokeArgs<'_>) -> Result<PipeState, BoxError> {
            self.journal.before.lock().push(self.name);
            if self.fail_before {
                return Err(Box::new(Boom(0)));
            }
            Ok(PipeState::new(self.token))
        }

        fn after_invoke(&self, args: &AfterInvokeArgs<'_>) -> Result<(), BoxError> {
            self.journal.after.lock().push(AfterCall {
                pipe: self.name,
                state: args.state_as::<usize>().copied(),
                faulted: args.is_faulted(),
                error: args.error().map(|e| e.to_string()),
            });
            if self.fail_after {
                return Err(Box::new(Boom(99)));
            }
            Ok(())
        }
    }

    fn context() -> Arc<MessageContext> {
        Arc::new(MessageContext::new(MessageId::new()))
    }

    fn invocation(invoker: FnInvoker, pipes: Vec<BoxedPipe>) -> Arc<PipeInvocation> {
        Arc::new(PipeInvocation::new(
            Arc::new(invoker),
            BoxedMessage::new(Ping),
            context(),
            pipes,
        ))
    }

    fn three_pipes(journal: &Arc<Journal>) -> Vec<BoxedPipe> {
        vec![
            Arc::new(RecordingPipe::new("outer", 10, journal)),
            Arc::new(RecordingPipe::new("middle", 20, journal)),
            Arc::new(RecordingPipe::new("inner", 30, journal)),
        ]
    }

    fn after_order(journal: &Journal) -> Vec<&'static str> {
        journal.after.lock().iter().map(|call| call.pipe).collect()
    }

    fn corrupted_ledger() -> Result<(), BoxError> {
        panic!("ledger corrupted")
    }

    fn all_saw_panic(journal: &Journal) -> bool {
        journal.after.lock().iter().all(|call| {
            call.faulted && call.error.as_deref() == Some("handler panicked: ledger corrupted")
        })
    }

    // ─── Synchronous path ─────────────────────────────────────────────────────

    #[test]
    fn test_after_phase_runs_in_reverse_order() {
        let journal = Arc::new(Journal::default());
        let invocation = invocation(FnInvoker::sync("h", |_| Ok(())), three_pipes(&journal));

        invocation.run().unwrap();

        assert_eq!(*journal.before.lock(), vec!["outer", "middle", "inner"]);
        assert_eq!(after_order(&journal), vec!["inner", "middle", "outer"]);
        assert!(invocation.is_completed());
    }

    #[test]
    fn test_each_pipe_gets_its_own_state_back() {
        let journal = Arc::new(Journal::default());
        let invocation = invocation(FnInvoker::sync("h", |_| Ok(())), three_pipes(&journal));

        invocation.run().unwrap();

        let states: Vec<_> = journal
            .after
            .lock()
            .iter()
            .map(|call| (call.pipe, call.state))
            .collect();
        assert_eq!(
            states,
            vec![("inner", Some(30)), ("middle", Some(20)), ("outer", Some(10))]
        );
    }

    #[test]
    fn test_success_is_not_faulted() {
        let journal = Arc::new(Journal::default());
        let invocation = invocation(FnInvoker::sync("h", |_| Ok(())), three_pipes(&journal));

        invocation.run().unwrap();

        assert!(
            journal
                .after
                .lock()
                .iter()
                .all(|call| !call.faulted && call.error.is_none())
        );
    }

    #[test]
    fn test_handler_error_reaches_pipes_and_caller_unchanged() {
        let journal = Arc::new(Journal::default());
        let invocation = invocation(
            FnInvoker::sync("h", |_| Err(Box::new(Boom(7)))),
            three_pipes(&journal),
        );

        let error = invocation.run().unwrap_err();

        assert_eq!(after_order(&journal), vec!["inner", "middle", "outer"]);
        assert!(journal.after.lock().iter().all(|call| {
            call.faulted && call.error.as_deref() == Some("boom: 7")
        }));

        let handler_error = error.into_handler_error().unwrap();
        let boom = handler_error.downcast_ref::<Boom>().unwrap();
        assert_eq!(boom.0, 7);
    }

    #[test]
    fn test_before_phase_is_idempotent() {
        let journal = Arc::new(Journal::default());
        let invocation = invocation(FnInvoker::sync("h", |_| Ok(())), three_pipes(&journal));

        drop(invocation.prepare_for_external_invocation().unwrap());
        drop(invocation.prepare_for_external_invocation().unwrap());
        invocation.run().unwrap();

        assert_eq!(journal.before.lock().len(), 3);
        assert_eq!(journal.after.lock().len(), 3);
    }

    #[test]
    fn test_complete_without_before_phase_fails() {
        let journal = Arc::new(Journal::default());
        let with_pipes = invocation(FnInvoker::sync("h", |_| Ok(())), three_pipes(&journal));
        let without_pipes = invocation(FnInvoker::sync("h", |_| Ok(())), Vec::new());

        assert!(matches!(
            with_pipes.complete(None),
            Err(InvocationError::MissingPipeStates)
        ));
        assert!(matches!(
            without_pipes.complete(None),
            Err(InvocationError::MissingPipeStates)
        ));
        assert!(journal.after.lock().is_empty());
    }

    #[test]
    fn test_complete_runs_once() {
        let invocation = invocation(FnInvoker::sync("h", |_| Ok(())), Vec::new());
        drop(invocation.prepare_for_external_invocation().unwrap());

        invocation.complete(None).unwrap();
        let second = invocation.complete(None).unwrap_err();

        assert!(matches!(second, InvocationError::AlreadyCompleted));
        assert!(second.is_contract_violation());
    }

    #[test]
    fn test_before_failure_skips_handler_and_teardown() {
        let journal = Arc::new(Journal::default());
        let handled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&handled);

        let mut failing = RecordingPipe::new("failing", 2, &journal);
        failing.fail_before = true;
        let pipes: Vec<BoxedPipe> = vec![
            Arc::new(RecordingPipe::new("first", 1, &journal)),
            Arc::new(failing),
            Arc::new(RecordingPipe::new("never", 3, &journal)),
        ];
        let invocation = invocation(
            FnInvoker::sync("h", move |_| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }),
            pipes,
        );

        let error = invocation.run().unwrap_err();

        assert!(matches!(error, InvocationError::BeforeInvoke { ref pipe, .. } if pipe == "failing"));
        assert_eq!(*journal.before.lock(), vec!["first", "failing"]);
        assert!(journal.after.lock().is_empty());
        assert!(!handled.load(Ordering::SeqCst));
        assert!(!invocation.is_prepared());
        assert!(matches!(
            invocation.prepare_for_external_invocation(),
            Err(InvocationError::BeforeInvokeIncomplete)
        ));
    }

    #[test]
    fn test_after_failure_does_not_stop_remaining_pipes() {
        let journal = Arc::new(Journal::default());
        let mut failing = RecordingPipe::new("middle", 2, &journal);
        failing.fail_after = true;
        let pipes: Vec<BoxedPipe> = vec![
            Arc::new(RecordingPipe::new("outer", 1, &journal)),
            Arc::new(failing),
            Arc::new(RecordingPipe::new("inner", 3, &journal)),
        ];
        let invocation = invocation(FnInvoker::sync("h", |_| Err(Box::new(Boom(1)))), pipes);

        let error = invocation.run().unwrap_err();

        assert_eq!(after_order(&journal), vec!["inner", "middle", "outer"]);
        assert_eq!(error.to_string(), "boom: 1");
    }

    #[test]
    fn test_state_ref_is_shared_by_before_steps() {
        struct DepthPipe(Arc<Mutex<Vec<usize>>>);

        impl Pipe for DepthPipe {
            fn name(&self) -> &str {
                "depth"
            }

            fn before_invoke(&self, args: &mut BeforeInvokeArgs<'_>) -> Result<PipeState, BoxError> {
                let state_ref = args.state_ref();
                let depth = state_ref.get::<usize>().copied().unwrap_or(0) + 1;
                state_ref.set(depth);
                self.0.lock().push(depth);
                Ok(PipeState::empty())
            }

            fn after_invoke(&self, _args: &AfterInvokeArgs<'_>) -> Result<(), BoxError> {
                Ok(())
            }
        }

        let depths = Arc::new(Mutex::new(Vec::new()));
        let pipes: Vec<BoxedPipe> = vec![
            Arc::new(DepthPipe(Arc::clone(&depths))),
            Arc::new(DepthPipe(Arc::clone(&depths))),
        ];
        invocation(FnInvoker::sync("h", |_| Ok(())), pipes)
            .run()
            .unwrap();

        assert_eq!(*depths.lock(), vec![1, 2]);
    }

    #[test]
    fn test_sync_run_rejected_for_async_only_invoker() {
        let journal = Arc::new(Journal::default());
        let invocation = invocation(
            FnInvoker::asynchronous("h", |_| async { Ok(()) }),
            three_pipes(&journal),
        );

        assert!(matches!(
            invocation.run(),
            Err(InvocationError::SynchronousUnsupported { .. })
        ));
        assert!(journal.before.lock().is_empty());
    }

    #[test]
    fn test_sync_panic_still_runs_after_phase() {
        let journal = Arc::new(Journal::default());
        let invocation = invocation(
            FnInvoker::sync("h", |_| corrupted_ledger()),
            three_pipes(&journal),
        );

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| invocation.run()));

        assert!(outcome.is_err());
        assert_eq!(after_order(&journal), vec!["inner", "middle", "outer"]);
        assert!(all_saw_panic(&journal));
        assert!(invocation.is_completed());
        assert!(MessageContext::current().is_none());
    }

    // ─── External preparation ─────────────────────────────────────────────────

    #[derive(Default)]
    struct GreetingHandler {
        calls: Vec<String>,
        context: Option<Arc<MessageContext>>,
    }

    impl MessageHandler for GreetingHandler {
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }

        fn as_context_aware(&mut self) -> Option<&mut dyn MessageContextAware> {
            Some(self)
        }
    }

    impl MessageContextAware for GreetingHandler {
        fn set_context(&mut self, context: Arc<MessageContext>) {
            self.context = Some(context);
        }
    }

    #[test]
    fn test_mutations_apply_in_registration_order() {
        let invocation = invocation(FnInvoker::sync("h", |_| Ok(())), Vec::new());
        for label in ["first", "second", "third"] {
            invocation.add_handler_mutation(move |handler| {
                if let Some(handler) = handler.downcast_mut::<GreetingHandler>() {
                    handler.calls.push(label.to_string());
                }
            });
        }

        let mut handler = GreetingHandler::default();
        let guard = invocation
            .prepare_for_external_invocation_with(&mut handler)
            .unwrap();
        drop(guard);

        assert_eq!(handler.calls, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_context_aware_handler_receives_context() {
        let invocation = invocation(FnInvoker::sync("h", |_| Ok(())), Vec::new());
        let expected = invocation.context().message_id();
        invocation.add_handler_mutation(|handler| {
            if let Some(handler) = handler.downcast_mut::<GreetingHandler>() {
                let seen = handler.context.as_ref().map(|c| c.message_id().to_string());
                handler.calls.push(seen.unwrap_or_default());
            }
        });

        let mut handler = GreetingHandler::default();
        let _guard = invocation
            .prepare_for_external_invocation_with(&mut handler)
            .unwrap();

        assert_eq!(handler.context.map(|c| c.message_id()), Some(expected));
        assert_eq!(handler.calls, vec![expected.to_string()]);
    }

    #[test]
    fn test_prepare_activates_context_until_guard_drops() {
        let invocation = invocation(FnInvoker::sync("h", |_| Ok(())), Vec::new());
        let expected = invocation.context().message_id();

        {
            let _guard = invocation.prepare_for_external_invocation().unwrap();
            assert_eq!(
                MessageContext::current().map(|c| c.message_id()),
                Some(expected)
            );
        }
        assert!(MessageContext::current().is_none());
    }

    #[test]
    fn test_sync_handler_sees_current_context() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let invocation = invocation(
            FnInvoker::sync("h", move |_| {
                *sink.lock() = MessageContext::current().map(|c| c.message_id());
                Ok(())
            }),
            Vec::new(),
        );

        invocation.run().unwrap();

        assert_eq!(*seen.lock(), Some(invocation.context().message_id()));
        assert!(MessageContext::current().is_none());
    }

    // ─── Asynchronous path ────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_async_success_runs_after_phase() {
        let journal = Arc::new(Journal::default());
        let invocation = invocation(
            FnInvoker::asynchronous("h", |_| async {
                tokio::task::yield_now().await;
                Ok(())
            }),
            three_pipes(&journal),
        );

        invocation.run_async().await.unwrap();

        let calls = journal.after.lock().clone();
        assert_eq!(
            calls.iter().map(|c| (c.pipe, c.state)).collect::<Vec<_>>(),
            vec![("inner", Some(30)), ("middle", Some(20)), ("outer", Some(10))]
        );
        assert!(calls.iter().all(|c| !c.faulted));
    }

    #[tokio::test]
    async fn test_async_failure_reaches_pipes_and_caller() {
        let journal = Arc::new(Journal::default());
        let invocation = invocation(
            FnInvoker::asynchronous("h", |_| async {
                tokio::task::yield_now().await;
                Err::<(), BoxError>(Box::new(Boom(3)))
            }),
            three_pipes(&journal),
        );

        let error = invocation.run_async().await.unwrap_err();

        assert_eq!(after_order(&journal), vec!["inner", "middle", "outer"]);
        assert!(journal.after.lock().iter().all(|c| {
            c.faulted && c.error.as_deref() == Some("boom: 3")
        }));
        assert!(error.handler_error().unwrap().is::<Boom>());
    }

    #[tokio::test]
    async fn test_after_phase_waits_for_handler() {
        let journal = Arc::new(Journal::default());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let rx = Arc::new(Mutex::new(Some(rx)));
        let invocation = invocation(
            FnInvoker::asynchronous("h", move |_| {
                let rx = rx.lock().take();
                async move {
                    if let Some(rx) = rx {
                        let _ = rx.await;
                    }
                    Ok(())
                }
            }),
            three_pipes(&journal),
        );

        let mut future = invocation.run_async();
        assert!((&mut future).now_or_never().is_none());
        assert_eq!(journal.before.lock().len(), 3);
        assert!(journal.after.lock().is_empty());

        tx.send(()).unwrap();
        future.await.unwrap();
        assert_eq!(journal.after.lock().len(), 3);
    }

    #[test]
    fn test_dropped_future_is_cancelled() {
        let journal = Arc::new(Journal::default());
        let invocation = invocation(
            FnInvoker::asynchronous("h", |_| futures::future::pending()),
            three_pipes(&journal),
        );

        let mut future = tokio_test::task::spawn(invocation.run_async());
        tokio_test::assert_pending!(future.poll());
        drop(future);

        let calls = journal.after.lock().clone();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|c| {
            c.faulted && c.error.as_deref() == Some("handler invocation cancelled")
        }));
        assert!(invocation.is_completed());
    }

    #[tokio::test]
    async fn test_async_panic_still_runs_after_phase() {
        let journal = Arc::new(Journal::default());
        let invocation = invocation(
            FnInvoker::asynchronous("h", |_| async {
                tokio::task::yield_now().await;
                corrupted_ledger()
            }),
            three_pipes(&journal),
        );

        let outcome = AssertUnwindSafe(invocation.run_async()).catch_unwind().await;

        assert!(outcome.is_err());
        assert_eq!(after_order(&journal), vec!["inner", "middle", "outer"]);
        assert!(all_saw_panic(&journal));
        assert!(invocation.is_completed());
    }

    #[tokio::test]
    async fn test_async_before_failure_is_returned() {
        let journal = Arc::new(Journal::default());
        let mut failing = RecordingPipe::new("failing", 1, &journal);
        failing.fail_before = true;
        let invocation = invocation(
            FnInvoker::asynchronous("h", |_| async { Ok(()) }),
            vec![Arc::new(failing)],
        );

        let error = invocation.run_async().await.unwrap_err();

        assert!(matches!(error, InvocationError::BeforeInvoke { .. }));
        assert!(journal.after.lock().is_empty());
    }

    // ─── HANDLE line ──────────────────────────────────────────────────────────

    /// Sink enabling every level up to `max`.
    struct LevelSink {
        max: Level,
        lines: Mutex<Vec<(Level, String)>>,
    }

    impl LevelSink {
        fn new(max: Level) -> Arc<Self> {
            Arc::new(Self {
                max,
                lines: Mutex::new(Vec::new()),
            })
        }
    }

    impl LogSink for LevelSink {
        fn is_enabled(&self, _logger: &str, level: Level) -> bool {
            level <= self.max
        }

        fn log(&self, _logger: &str, level: Level, text: &str) {
            self.lines.lock().push((level, text.to_string()));
        }
    }

    struct Transfer {
        renders: Arc<AtomicUsize>,
    }

    impl fmt::Display for Transfer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            self.renders.fetch_add(1, Ordering::SeqCst);
            f.write_str("42")
        }
    }

    impl Message for Transfer {
        fn as_any(&self) -> &dyn Any {
            self
        }

        fn display(&self) -> Option<&dyn fmt::Display> {
            Some(self)
        }
    }

    fn logged_invocation(
        invoker: FnInvoker,
        sink: &Arc<LevelSink>,
        renders: &Arc<AtomicUsize>,
    ) -> Arc<PipeInvocation> {
        let sink = Arc::clone(sink) as Arc<dyn LogSink>;
        let logger = MessageLogger::new("courier::invocation", sink)
            .with_cache(Arc::new(LogInfoCache::new()));
        let message = BoxedMessage::new(Transfer {
            renders: Arc::clone(renders),
        });

        Arc::new(
            PipeInvocation::new(Arc::new(invoker), message, context(), Vec::new())
                .with_logger(logger),
        )
    }

    fn handle_line(invocation: &PipeInvocation) -> (Level, String) {
        let id = invocation.context().message_id();
        (Level::DEBUG, format!("HANDLE : Transfer {{42}} [{id}]"))
    }

    #[test]
    fn test_run_logs_handle_line() {
        let sink = LevelSink::new(Level::DEBUG);
        let renders = Arc::new(AtomicUsize::new(0));
        let invocation = logged_invocation(FnInvoker::sync("h", |_| Ok(())), &sink, &renders);

        invocation.run().unwrap();

        assert_eq!(*sink.lines.lock(), vec![handle_line(&invocation)]);
    }

    #[tokio::test]
    async fn test_run_async_logs_handle_line() {
        let sink = LevelSink::new(Level::TRACE);
        let renders = Arc::new(AtomicUsize::new(0));
        let invocation = logged_invocation(
            FnInvoker::asynchronous("h", |_| async { Ok(()) }),
            &sink,
            &renders,
        );

        invocation.run_async().await.unwrap();

        assert_eq!(*sink.lines.lock(), vec![handle_line(&invocation)]);
    }

    #[test]
    fn test_handle_line_skipped_without_debug() {
        let sink = LevelSink::new(Level::INFO);
        let renders = Arc::new(AtomicUsize::new(0));
        let invocation = logged_invocation(FnInvoker::sync("h", |_| Ok(())), &sink, &renders);

        invocation.run().unwrap();

        assert!(sink.lines.lock().is_empty());
        assert_eq!(renders.load(Ordering::SeqCst), 0);
    }
}
