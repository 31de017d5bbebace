//! Pipelines that run every operator in sequence on the caller's task.

use super::WiredOperator;
use crate::cancellation::CancellationToken;
use crate::context::PipelineContext;
use crate::errors::{BoxError, ErrorPlace, OperatorError, PipelineError, Result, Rethrown};
use crate::observability::SpanTimer;
use crate::operators::{Catch, SyncOperator};
use crate::workpiece::Workpiece;
use async_trait::async_trait;
use tracing::{debug, warn};

/// One sync operator in its pipeline slot.
struct SyncStage<W: Workpiece> {
    name: String,
    op: Box<dyn SyncOperator<W>>,
}

impl<W: Workpiece> SyncStage<W> {
    async fn do_sync(&mut self, ctx: &CancellationToken, work: &mut W) -> Result<(), OperatorError> {
        let timer = SpanTimer::start(&self.name);
        let result = self.op.do_sync(ctx, work).await;
        debug!(operator = %self.name, duration_ms = timer.finish(), ok = result.is_ok(), "do_sync");
        result.map_err(|err| OperatorError::new(err, ErrorPlace::DoSync, &self.name))
    }

    /// Offers a failure to the operator's catch hook. Returns the failure
    /// that should keep travelling, or `None` when it was handled.
    fn catch(
        &mut self,
        err: OperatorError,
        work: &mut W,
        context: &PipelineContext,
    ) -> Option<OperatorError> {
        match self.op.on_err(&err, work, context) {
            Catch::Pass => Some(err),
            Catch::Handled => {
                debug!(operator = %self.name, caught = %err, from = err.op_name(), "error handled");
                None
            }
            Catch::Rethrow(new_err) => {
                debug!(operator = %self.name, caught = %err, rethrown = %new_err, "error rethrown");
                let rethrown = Rethrown::new(new_err, err);
                Some(OperatorError::new(rethrown, ErrorPlace::CatchOnErr, &self.name))
            }
        }
    }
}

/// A pipeline executing its operators one after another in the caller's task.
///
/// A failing stage turns the rest of the run into error propagation: later
/// stages only see the failure through [`SyncOperator::on_err`] and may
/// recover from it.
pub struct SyncPipeline<W: Workpiece> {
    context: PipelineContext,
    ctx: CancellationToken,
    stages: Vec<SyncStage<W>>,
}

impl<W: Workpiece> SyncPipeline<W> {
    /// Creates a sync pipeline.
    ///
    /// # Panics
    ///
    /// Panics if any operator was wired as an async operator.
    pub fn new(
        ctx: CancellationToken,
        name: impl Into<String>,
        operators: impl IntoIterator<Item = WiredOperator<W>>,
    ) -> Self {
        let operators: Vec<WiredOperator<W>> = operators.into_iter().collect();
        let context = PipelineContext::new(name, operators.iter().map(WiredOperator::name));
        let stages = operators
            .into_iter()
            .map(|wired| {
                let (name, op) = wired.into_sync(&context);
                SyncStage { name, op }
            })
            .collect();

        debug!(pipeline = context.name(), structure = context.structure(), "sync pipeline created");
        Self { context, ctx, stages }
    }

    /// Returns the pipeline context.
    #[must_use]
    pub const fn context(&self) -> &PipelineContext {
        &self.context
    }

    /// Runs the workpiece through every stage.
    ///
    /// Returns the failure still unhandled after the last stage, if any.
    pub async fn send_sync(&mut self, work: &mut W) -> Result<()> {
        if let Some(reason) = self.ctx.reason() {
            return Err(PipelineError::Cancelled(reason));
        }

        let mut failure: Option<OperatorError> = None;
        for stage in &mut self.stages {
            if let Some(err) = failure.take() {
                failure = stage.catch(err, work, &self.context);
                if failure.is_some() {
                    continue;
                }
            }
            if let Err(err) = stage.do_sync(&self.ctx, work).await {
                warn!(
                    pipeline = self.context.name(),
                    operator = %stage.name,
                    error = %err,
                    "stage failed"
                );
                failure = Some(err);
            }
        }

        match failure {
            Some(err) => Err(PipelineError::Operator(err)),
            None => Ok(()),
        }
    }

    /// Closes every operator in wiring order.
    pub async fn close(mut self) {
        self.close_stages().await;
    }

    async fn close_stages(&mut self) {
        for mut stage in std::mem::take(&mut self.stages) {
            stage.op.close().await;
            debug!(pipeline = self.context.name(), operator = %stage.name, "operator closed");
        }
    }
}

impl<W: Workpiece> std::fmt::Debug for SyncPipeline<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncPipeline")
            .field("name", &self.context.name())
            .field("structure", &self.context.structure())
            .finish_non_exhaustive()
    }
}

/// A sync pipeline nests as a stage or branch of another pipeline.
#[async_trait]
impl<W: Workpiece> SyncOperator<W> for SyncPipeline<W> {
    async fn do_sync(&mut self, _ctx: &CancellationToken, work: &mut W) -> Result<(), BoxError> {
        self.send_sync(work).await.map_err(Into::into)
    }

    async fn close(&mut self) {
        self.close_stages().await;
    }
}
