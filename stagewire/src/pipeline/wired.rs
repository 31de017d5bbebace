//! Operators bound to a name, ready to be placed in a pipeline.

use crate::cancellation::CancellationToken;
use crate::config::EngineConfig;
use crate::context::PipelineContext;
use crate::errors::BoxError;
use crate::operators::{AsyncFailure, AsyncFnOperator, AsyncOperator, SyncFnOperator, SyncOperator};
use crate::workpiece::Workpiece;
use std::fmt::Debug;
use std::time::Duration;

/// The capability an operator was wired with.
pub(crate) enum Operator<W: Workpiece> {
    Sync(Box<dyn SyncOperator<W>>),
    Async(Box<dyn AsyncOperator<W>>),
}

/// An operator together with its stage name and flush settings.
///
/// Build one with [`wire_sync_operator`], [`wire_func`],
/// [`wire_async_operator`] and friends, then hand a list of them to
/// [`SyncPipeline::new`](super::SyncPipeline::new) or
/// [`AsyncPipeline::new`](super::AsyncPipeline::new).
pub struct WiredOperator<W: Workpiece> {
    name: String,
    operator: Operator<W>,
    flush_interval: Option<Duration>,
}

impl<W: Workpiece> WiredOperator<W> {
    /// Returns the stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the flush interval, if the stage flushes on a timer.
    #[must_use]
    pub const fn flush_interval(&self) -> Option<Duration> {
        self.flush_interval
    }

    /// Returns whether this is a sync operator.
    #[must_use]
    pub fn is_sync(&self) -> bool {
        matches!(self.operator, Operator::Sync(_))
    }

    /// Returns whether this is an async operator.
    #[must_use]
    pub fn is_async(&self) -> bool {
        matches!(self.operator, Operator::Async(_))
    }

    /// Unwraps a sync operator; anything else is a wiring mistake.
    pub(crate) fn into_sync(self, context: &PipelineContext) -> (String, Box<dyn SyncOperator<W>>) {
        match self.operator {
            Operator::Sync(op) => (self.name, op),
            Operator::Async(_) => panic!(
                "pipeline '{}' [{}]: operator '{}' is not a sync operator",
                context.name(),
                context.structure(),
                self.name
            ),
        }
    }

    /// Unwraps an async operator; anything else is a wiring mistake.
    pub(crate) fn into_async(
        self,
        context: &PipelineContext,
    ) -> (String, Box<dyn AsyncOperator<W>>, Option<Duration>) {
        match self.operator {
            Operator::Async(op) => (self.name, op, self.flush_interval),
            Operator::Sync(_) => panic!(
                "pipeline '{}' [{}]: operator '{}' is not an async operator",
                context.name(),
                context.structure(),
                self.name
            ),
        }
    }
}

impl<W: Workpiece> Debug for WiredOperator<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WiredOperator")
            .field("name", &self.name)
            .field("sync", &self.is_sync())
            .field("flush_interval", &self.flush_interval)
            .finish()
    }
}

/// Wires a sync operator.
pub fn wire_sync_operator<W, O>(name: impl Into<String>, op: O) -> WiredOperator<W>
where
    W: Workpiece,
    O: SyncOperator<W> + 'static,
{
    WiredOperator {
        name: name.into(),
        operator: Operator::Sync(Box::new(op)),
        flush_interval: None,
    }
}

/// Wires a closure as a sync operator.
pub fn wire_func<W, F>(name: impl Into<String>, func: F) -> WiredOperator<W>
where
    W: Workpiece,
    F: FnMut(&CancellationToken, &mut W) -> Result<(), BoxError> + Send + 'static,
{
    wire_sync_operator(name, SyncFnOperator::new(func))
}

/// Wires an async operator that only flushes on shutdown.
pub fn wire_async_operator<W, O>(name: impl Into<String>, op: O) -> WiredOperator<W>
where
    W: Workpiece,
    O: AsyncOperator<W> + 'static,
{
    WiredOperator {
        name: name.into(),
        operator: Operator::Async(Box::new(op)),
        flush_interval: None,
    }
}

/// Wires an async operator that flushes `interval` after a successful
/// `do_async`. A zero interval disables timed flushing.
pub fn wire_async_operator_with_flush<W, O>(
    name: impl Into<String>,
    op: O,
    interval: Duration,
) -> WiredOperator<W>
where
    W: Workpiece,
    O: AsyncOperator<W> + 'static,
{
    let mut wired = wire_async_operator(name, op);
    wired.flush_interval = Some(interval).filter(|d| !d.is_zero());
    wired
}

/// Wires an async operator using the configured default flush interval.
pub fn wire_async_operator_with_config<W, O>(
    name: impl Into<String>,
    op: O,
    config: &EngineConfig,
) -> WiredOperator<W>
where
    W: Workpiece,
    O: AsyncOperator<W> + 'static,
{
    match config.default_flush_interval() {
        Some(interval) => wire_async_operator_with_flush(name, op, interval),
        None => wire_async_operator(name, op),
    }
}

/// Wires a closure as an async operator.
pub fn wire_async_func<W, F>(name: impl Into<String>, func: F) -> WiredOperator<W>
where
    W: Workpiece,
    F: FnMut(&CancellationToken, W) -> Result<Option<W>, AsyncFailure<W>> + Send + 'static,
{
    wire_async_operator(name, AsyncFnOperator::new(func))
}
