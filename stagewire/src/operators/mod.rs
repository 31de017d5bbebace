//! Operator capability traits.
//!
//! Operators are the business logic a pipeline runs. A sync operator
//! transforms a workpiece in place on the caller's task; an async operator
//! owns its input, may hold it back, and emits results either directly or
//! from [`AsyncOperator::flush`].

mod adapters;
mod emitter;

pub use adapters::{async_op, sync_op, AsyncFnOperator, Noop, SyncFnOperator};
pub use emitter::Emitter;

use crate::cancellation::CancellationToken;
use crate::context::PipelineContext;
use crate::errors::{BoxError, OperatorError};
use crate::workpiece::Workpiece;
use async_trait::async_trait;

/// How a sync stage responds to a failure raised by an earlier stage.
#[derive(Debug)]
pub enum Catch {
    /// The stage does not catch; the failure passes through untouched.
    Pass,
    /// The failure is handled; the stage resumes with its normal `do_sync`.
    Handled,
    /// The failure is replaced by this error, chained to the caught one.
    Rethrow(BoxError),
}

/// A blocking transform run in sequence on the caller's task.
#[async_trait]
pub trait SyncOperator<W: Workpiece>: Send {
    /// Processes the workpiece in place.
    async fn do_sync(&mut self, ctx: &CancellationToken, work: &mut W) -> Result<(), BoxError>;

    /// Intercepts a failure from an earlier stage.
    ///
    /// The default does not catch anything.
    fn on_err(&mut self, _err: &OperatorError, _work: &mut W, _ctx: &PipelineContext) -> Catch {
        Catch::Pass
    }

    /// Called exactly once when the owning pipeline closes.
    async fn close(&mut self) {}
}

/// Returned by [`AsyncOperator::do_async`] on failure.
///
/// `work` hands back the offending (or a replacement) workpiece so it travels
/// downstream with the error and is released by the pipeline.
#[derive(Debug)]
pub struct AsyncFailure<W> {
    /// The business error.
    pub error: BoxError,
    /// The workpiece handed back with the error, if any.
    pub work: Option<W>,
}

impl<W> AsyncFailure<W> {
    /// Creates a failure that carries no workpiece.
    pub fn new(error: impl Into<BoxError>) -> Self {
        Self {
            error: error.into(),
            work: None,
        }
    }

    /// Creates a failure that hands a workpiece back to the pipeline.
    pub fn with_work(error: impl Into<BoxError>, work: W) -> Self {
        Self {
            error: error.into(),
            work: Some(work),
        }
    }
}

/// A non-blocking transform run by its own stage worker.
#[async_trait]
pub trait AsyncOperator<W: Workpiece>: Send {
    /// Processes one workpiece.
    ///
    /// `Ok(Some(out))` forwards `out`, `Ok(None)` forwards nothing: the
    /// operator has kept, released or buffered its input.
    async fn do_async(&mut self, ctx: &CancellationToken, work: W) -> Result<Option<W>, AsyncFailure<W>>;

    /// Emits buffered results. Called when the flush timer fires and once on shutdown.
    async fn flush(&mut self, _emitter: &mut Emitter<'_, W>) -> Result<(), BoxError> {
        Ok(())
    }

    /// Notified once for every failure arriving from upstream.
    fn on_error(&mut self, _ctx: &CancellationToken, _err: &OperatorError) {}

    /// Called exactly once when the stage shuts down.
    async fn close(&mut self) {}
}
