//! Built-in pipe logging how long handlers take.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{AfterInvokeArgs, BeforeInvokeArgs, Pipe, PipeState};
use crate::error::BoxError;

/// Measures handler execution time.
///
/// Logs every invocation at `DEBUG`, and at `WARN` when a threshold is set
/// and exceeded.
#[derive(Debug, Clone, Default)]
pub struct ElapsedTimePipe {
    warn_threshold: Option<Duration>,
}

impl ElapsedTimePipe {
    /// Name under which the pipe is registered.
    pub const NAME: &'static str = "ElapsedTime";

    /// Creates the pipe without a warning threshold.
    pub fn new() -> Self {
        Self::default()
    }

    /// Warns about handlers running longer than `threshold`.
    pub fn with_warn_threshold(mut self, threshold: Duration) -> Self {
        self.warn_threshold = Some(threshold);
        self
    }
}

impl Pipe for ElapsedTimePipe {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        // Outermost.
        i32::MAX
    }

    fn before_invoke(&self, _args: &mut BeforeInvokeArgs<'_>) -> Result<PipeState, BoxError> {
        Ok(PipeState::new(Instant::now()))
    }

    fn after_invoke(&self, args: &AfterInvokeArgs<'_>) -> Result<(), BoxError> {
        let Some(started) = args.state_as::<Instant>() else {
            return Err("elapsed time pipe state is missing".into());
        };
        let elapsed = started.elapsed();
        let message_type = args.message().message_type_name();

        debug!(
            message_type,
            message_id = %args.context().message_id(),
            elapsed_ms = elapsed.as_millis() as u64,
            faulted = args.is_faulted(),
            "Handler finished"
        );

        if let Some(threshold) = self.warn_threshold
            && elapsed > threshold
        {
            warn!(
                message_type,
                elapsed_ms = elapsed.as_millis() as u64,
                threshold_ms = threshold.as_millis() as u64,
                "Slow handler"
            );
        }

        Ok(())
    }
}
