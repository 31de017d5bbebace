//! Closure adapters and the do-nothing operator.

use super::{AsyncFailure, AsyncOperator, SyncOperator};
use crate::cancellation::CancellationToken;
use crate::errors::BoxError;
use crate::workpiece::Workpiece;
use async_trait::async_trait;
use std::fmt::Debug;

/// A sync operator backed by a closure.
pub struct SyncFnOperator<F> {
    func: F,
}

impl<F> SyncFnOperator<F> {
    /// Creates a new function-based sync operator.
    pub const fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Debug for SyncFnOperator<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncFnOperator").finish_non_exhaustive()
    }
}

#[async_trait]
impl<W, F> SyncOperator<W> for SyncFnOperator<F>
where
    W: Workpiece,
    F: FnMut(&CancellationToken, &mut W) -> Result<(), BoxError> + Send,
{
    async fn do_sync(&mut self, ctx: &CancellationToken, work: &mut W) -> Result<(), BoxError> {
        (self.func)(ctx, work)
    }
}

/// Wraps a closure as a sync operator.
pub fn sync_op<W, F>(func: F) -> SyncFnOperator<F>
where
    W: Workpiece,
    F: FnMut(&CancellationToken, &mut W) -> Result<(), BoxError> + Send,
{
    SyncFnOperator::new(func)
}

/// An async operator backed by a closure.
pub struct AsyncFnOperator<F> {
    func: F,
}

impl<F> AsyncFnOperator<F> {
    /// Creates a new function-based async operator.
    pub const fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Debug for AsyncFnOperator<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFnOperator").finish_non_exhaustive()
    }
}

#[async_trait]
impl<W, F> AsyncOperator<W> for AsyncFnOperator<F>
where
    W: Workpiece,
    F: FnMut(&CancellationToken, W) -> Result<Option<W>, AsyncFailure<W>> + Send,
{
    async fn do_async(&mut self, ctx: &CancellationToken, work: W) -> Result<Option<W>, AsyncFailure<W>> {
        (self.func)(ctx, work)
    }
}

/// Wraps a closure as an async operator.
pub fn async_op<W, F>(func: F) -> AsyncFnOperator<F>
where
    W: Workpiece,
    F: FnMut(&CancellationToken, W) -> Result<Option<W>, AsyncFailure<W>> + Send,
{
    AsyncFnOperator::new(func)
}

/// An operator that does nothing.
///
/// As a sync operator it leaves the workpiece untouched; as an async operator
/// it forwards its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Noop;

#[async_trait]
impl<W: Workpiece> SyncOperator<W> for Noop {
    async fn do_sync(&mut self, _ctx: &CancellationToken, _work: &mut W) -> Result<(), BoxError> {
        Ok(())
    }
}

#[async_trait]
impl<W: Workpiece> AsyncOperator<W> for Noop {
    async fn do_async(&mut self, _ctx: &CancellationToken, work: W) -> Result<Option<W>, AsyncFailure<W>> {
        Ok(Some(work))
    }
}
