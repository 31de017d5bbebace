//! Pipelines running one worker task per stage.
//!
//! Stages are linked by capacity-one channels, so a stage blocks its
//! upstream neighbour as soon as it falls one workpiece behind. Closing the
//! pipeline's input cascades stage by stage: every worker flushes, closes its
//! operator and drops its output before the next one notices.

use super::WiredOperator;
use crate::cancellation::CancellationToken;
use crate::context::PipelineContext;
use crate::errors::{BoxError, ErrorPlace, OperatorError, PipelineError, Result};
use crate::operators::{AsyncFailure, AsyncOperator, Emitter};
use crate::workpiece::{Item, Workpiece};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info_span, warn, Instrument};

/// Capacity of every hand-off channel.
const HANDOFF_CAPACITY: usize = 1;

/// The implicit last stage: consumes every workpiece that made it through.
struct Releaser;

#[async_trait]
impl<W: Workpiece> AsyncOperator<W> for Releaser {
    async fn do_async(&mut self, _ctx: &CancellationToken, work: W) -> Result<Option<W>, AsyncFailure<W>> {
        work.release();
        Ok(None)
    }
}

/// One async operator bound to its channels.
struct AsyncStage<W: Workpiece> {
    name: String,
    op: Box<dyn AsyncOperator<W>>,
    ctx: CancellationToken,
    input: mpsc::Receiver<Item<W>>,
    output: mpsc::Sender<Item<W>>,
    flush_interval: Option<Duration>,
    flush_deadline: Option<Instant>,
    latched: Option<String>,
}

impl<W: Workpiece> AsyncStage<W> {
    fn is_active(&self) -> bool {
        self.latched.is_none() && !self.ctx.is_cancelled()
    }

    async fn run(mut self) {
        debug!("stage started");
        loop {
            tokio::select! {
                item = self.input.recv() => match item {
                    Some(item) => self.on_item(item).await,
                    None => break,
                },
                () = flush_timer(self.flush_deadline) => {
                    self.flush_deadline = None;
                    if self.is_active() {
                        self.flush(ErrorPlace::FlushTimer).await;
                    }
                }
            }
        }

        self.flush(ErrorPlace::FlushDisassembling).await;
        self.op.close().await;
        debug!("stage closed");
    }

    async fn on_item(&mut self, item: Item<W>) {
        if !self.is_active() {
            debug!("stage inactive, dropping item");
            item.release();
            return;
        }
        match item {
            Item::Failure { error, work } => {
                self.op.on_error(&self.ctx, &error);
                self.forward(Item::Failure { error, work }).await;
            }
            Item::Work(work) => self.do_async(work).await,
        }
    }

    async fn do_async(&mut self, work: W) {
        match self.op.do_async(&self.ctx, work).await {
            Ok(out) => {
                if let Some(out) = out {
                    self.forward(Item::Work(out)).await;
                }
                self.arm_flush_timer();
            }
            Err(AsyncFailure { error, work }) => {
                let place = if work.is_some() {
                    ErrorPlace::DoAsyncOutWorkNotNil
                } else {
                    ErrorPlace::DoAsyncOutWorkNil
                };
                self.fail(error, place, work).await;
            }
        }
    }

    /// Arms the one-shot flush timer unless one is already pending.
    fn arm_flush_timer(&mut self) {
        if let (Some(interval), None) = (self.flush_interval, self.flush_deadline) {
            self.flush_deadline = Some(Instant::now() + interval);
        }
    }

    async fn flush(&mut self, place: ErrorPlace) {
        let mut emitter = Emitter::new(&self.output, &self.ctx, self.latched.is_some());
        let result = self.op.flush(&mut emitter).await;
        let emitted = emitter.emitted();
        debug!(%place, emitted, "flushed");

        if let Err(err) = result {
            if self.latched.is_some() {
                warn!(%place, error = %err, "flush failed on a latched stage");
                return;
            }
            self.fail(err, place, None).await;
        }
    }

    /// Latches the stage and forwards the failure downstream.
    async fn fail(&mut self, err: BoxError, place: ErrorPlace, work: Option<W>) {
        let error = OperatorError::new(err, place, &self.name);
        warn!(%place, error = %error, "stage failed, latching");
        self.latched = Some(error.to_string());
        self.forward(Item::Failure { error, work }).await;
    }

    async fn forward(&mut self, item: Item<W>) {
        if let Err(SendError(item)) = self.output.send(item).await {
            item.release();
        }
    }
}

async fn flush_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// A pipeline running each operator in its own worker task.
///
/// Normal workpieces are released by an implicit final stage; only failures
/// reach the end of the chain, where [`send_async`](Self::send_async) and
/// [`close`](Self::close) pick them up.
pub struct AsyncPipeline<W: Workpiece> {
    context: Arc<PipelineContext>,
    ctx: CancellationToken,
    stdin: Option<mpsc::Sender<Item<W>>>,
    stdout: mpsc::Receiver<Item<W>>,
    workers: Vec<JoinHandle<()>>,
}

impl<W: Workpiece> AsyncPipeline<W> {
    /// Creates an async pipeline and starts one worker per stage.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if any operator was wired as a sync operator.
    pub fn new(
        ctx: CancellationToken,
        name: impl Into<String>,
        operators: impl IntoIterator<Item = WiredOperator<W>>,
    ) -> Self {
        let operators: Vec<WiredOperator<W>> = operators.into_iter().collect();
        let context = Arc::new(PipelineContext::new(name, operators.iter().map(WiredOperator::name)));

        let mut stages: Vec<(String, Box<dyn AsyncOperator<W>>, Option<Duration>)> = operators
            .into_iter()
            .map(|wired| wired.into_async(&context))
            .collect();
        stages.push(("releaser".to_string(), Box::new(Releaser), None));

        let (stdin, mut input) = mpsc::channel(HANDOFF_CAPACITY);
        let mut workers = Vec::with_capacity(stages.len());
        for (name, op, flush_interval) in stages {
            let (output, next_input) = mpsc::channel(HANDOFF_CAPACITY);
            let span = info_span!(
                "stage",
                pipeline = context.name(),
                instance = %context.instance_id(),
                operator = %name
            );
            let stage = AsyncStage {
                name,
                op,
                ctx: ctx.clone(),
                input,
                output,
                flush_interval,
                flush_deadline: None,
                latched: None,
            };
            workers.push(tokio::spawn(stage.run().instrument(span)));
            input = next_input;
        }

        debug!(pipeline = context.name(), structure = context.structure(), "async pipeline created");
        Self {
            context,
            ctx,
            stdin: Some(stdin),
            stdout: input,
            workers,
        }
    }

    /// Returns the pipeline context.
    #[must_use]
    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    /// Hands a workpiece to the first stage.
    ///
    /// Returns as soon as the first stage accepts the workpiece, or with the
    /// failure that reaches the end of the chain first. A workpiece that is
    /// not accepted is released here.
    pub async fn send_async(&mut self, work: W) -> Result<()> {
        if let Some(reason) = self.ctx.reason() {
            work.release();
            return Err(PipelineError::Cancelled(reason));
        }
        let Some(stdin) = self.stdin.as_ref() else {
            work.release();
            return Err(PipelineError::Closed);
        };

        tokio::select! {
            permit = stdin.reserve() => match permit {
                Ok(permit) => {
                    permit.send(Item::Work(work));
                    Ok(())
                }
                Err(_) => {
                    work.release();
                    Err(PipelineError::Closed)
                }
            },
            item = self.stdout.recv() => {
                work.release();
                match item {
                    Some(Item::Failure { error, work: offending }) => {
                        if let Some(offending) = offending {
                            offending.release();
                        }
                        Err(PipelineError::Operator(error))
                    }
                    Some(Item::Work(_)) => unreachable!("releaser forwards no workpieces"),
                    None => Err(PipelineError::Closed),
                }
            }
        }
    }

    /// Shuts the pipeline down and waits until every stage has flushed and
    /// closed its operator.
    pub async fn close(mut self) {
        self.shutdown().await;
    }

    pub(crate) async fn shutdown(&mut self) {
        if self.stdin.take().is_none() {
            return;
        }
        while let Some(item) = self.stdout.recv().await {
            if let Item::Failure { error, .. } = &item {
                debug!(
                    pipeline = self.context.name(),
                    operator = error.op_name(),
                    error = %error,
                    "failure drained on close"
                );
            }
            item.release();
        }
        for worker in std::mem::take(&mut self.workers) {
            if let Err(err) = worker.await {
                error!(pipeline = self.context.name(), error = %err, "stage worker panicked");
            }
        }
        debug!(pipeline = self.context.name(), "async pipeline closed");
    }
}

impl<W: Workpiece> std::fmt::Debug for AsyncPipeline<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncPipeline")
            .field("name", &self.context.name())
            .field("structure", &self.context.structure())
            .field("open", &self.stdin.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::Noop;
    use crate::testing::{assert_cancelled, CallLog, RecordingOperator, SlowOperator};
    use crate::pipeline::{wire_async_func, wire_async_operator, wire_async_operator_with_flush, wire_func};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Tracked {
        id: usize,
        released: Arc<AtomicUsize>,
    }

    impl Workpiece for Tracked {
        fn release(self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Buffers workpieces and emits them on flush.
    struct Buffer {
        items: Vec<Tracked>,
        flushes: Arc<AtomicUsize>,
        flushed: Arc<Mutex<Vec<usize>>>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AsyncOperator<Tracked> for Buffer {
        async fn do_async(
            &mut self,
            _ctx: &CancellationToken,
            work: Tracked,
        ) -> Result<Option<Tracked>, AsyncFailure<Tracked>> {
            self.items.push(work);
            Ok(None)
        }

        async fn flush(&mut self, emitter: &mut Emitter<'_, Tracked>) -> Result<(), BoxError> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            for work in self.items.drain(..) {
                self.flushed.lock().push(work.id);
                emitter.emit(work).await;
            }
            Ok(())
        }

        async fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn buffer() -> (Buffer, Arc<AtomicUsize>, Arc<Mutex<Vec<usize>>>, Arc<AtomicUsize>) {
        let flushes = Arc::new(AtomicUsize::new(0));
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicUsize::new(0));
        let op = Buffer {
            items: Vec::new(),
            flushes: flushes.clone(),
            flushed: flushed.clone(),
            closed: closed.clone(),
        };
        (op, flushes, flushed, closed)
    }

    fn tracked(id: usize, released: &Arc<AtomicUsize>) -> Tracked {
        Tracked {
            id,
            released: released.clone(),
        }
    }

    #[tokio::test]
    async fn test_every_workpiece_released_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut pipeline = AsyncPipeline::new(
            CancellationToken::new(),
            "release",
            vec![
                wire_async_operator("a", Noop),
                wire_async_func("drop-odd", |_, work: Tracked| {
                    if work.id % 2 == 1 {
                        work.release();
                        Ok(None)
                    } else {
                        Ok(Some(work))
                    }
                }),
            ],
        );

        for id in 0..10 {
            pipeline.send_async(tracked(id, &released)).await.unwrap();
        }
        pipeline.close().await;

        assert_eq!(released.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_order_preserved() {
        let released = Arc::new(AtomicUsize::new(0));
        let (op, _, flushed, _) = buffer();
        let mut pipeline = AsyncPipeline::new(
            CancellationToken::new(),
            "fifo",
            vec![wire_async_operator("pass", Noop), wire_async_operator("buffer", op)],
        );

        for id in 0..20 {
            pipeline.send_async(tracked(id, &released)).await.unwrap();
        }
        pipeline.close().await;

        assert_eq!(*flushed.lock(), (0..20).collect::<Vec<_>>());
        assert_eq!(released.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn test_close_flushes_and_closes_every_stage() {
        let released = Arc::new(AtomicUsize::new(0));
        let (first, first_flushes, _, first_closed) = buffer();
        let (second, second_flushes, flushed, second_closed) = buffer();
        let mut pipeline = AsyncPipeline::new(
            CancellationToken::new(),
            "drain",
            vec![
                wire_async_operator("first", first),
                wire_async_operator("second", second),
            ],
        );

        pipeline.send_async(tracked(1, &released)).await.unwrap();
        pipeline.send_async(tracked(2, &released)).await.unwrap();
        pipeline.close().await;

        assert_eq!(first_flushes.load(Ordering::SeqCst), 1);
        assert_eq!(second_flushes.load(Ordering::SeqCst), 1);
        assert_eq!(first_closed.load(Ordering::SeqCst), 1);
        assert_eq!(second_closed.load(Ordering::SeqCst), 1);
        assert_eq!(*flushed.lock(), vec![1, 2]);
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_flush_timer_coalesces_burst() {
        let released = Arc::new(AtomicUsize::new(0));
        let (op, flushes, flushed, _) = buffer();
        let mut pipeline = AsyncPipeline::new(
            CancellationToken::new(),
            "timer",
            vec![wire_async_operator_with_flush("buffer", op, Duration::from_millis(50))],
        );

        for id in 0..3 {
            pipeline.send_async(tracked(id, &released)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(flushes.load(Ordering::SeqCst), 1);
        assert_eq!(*flushed.lock(), vec![0, 1, 2]);
        assert_eq!(released.load(Ordering::SeqCst), 3);

        pipeline.close().await;
        assert_eq!(flushes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_timer_flush_without_success() {
        let released = Arc::new(AtomicUsize::new(0));
        let (op, flushes, _, _) = buffer();
        let mut pipeline = AsyncPipeline::new(
            CancellationToken::new(),
            "idle",
            vec![
                wire_async_func("filter-all", |_, work: Tracked| {
                    work.release();
                    Ok(None)
                }),
                wire_async_operator_with_flush("buffer", op, Duration::from_millis(20)),
            ],
        );

        for id in 0..3 {
            pipeline.send_async(tracked(id, &released)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        assert_eq!(flushes.load(Ordering::SeqCst), 0);
        pipeline.close().await;
    }

    #[tokio::test]
    async fn test_failure_surfaces_and_latches() {
        let released = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let errors_seen = Arc::new(AtomicUsize::new(0));

        struct Observer {
            errors_seen: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl AsyncOperator<Tracked> for Observer {
            async fn do_async(
                &mut self,
                _ctx: &CancellationToken,
                work: Tracked,
            ) -> Result<Option<Tracked>, AsyncFailure<Tracked>> {
                Ok(Some(work))
            }

            fn on_error(&mut self, _ctx: &CancellationToken, err: &OperatorError) {
                assert_eq!(err.op_name(), "fail-on-two");
                assert_eq!(err.place(), ErrorPlace::DoAsyncOutWorkNotNil);
                self.errors_seen.fetch_add(1, Ordering::SeqCst);
            }
        }

        let counter = calls.clone();
        let mut pipeline = AsyncPipeline::new(
            CancellationToken::new(),
            "latching",
            vec![
                wire_async_func("fail-on-two", move |_, work: Tracked| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if work.id == 2 {
                        Err(AsyncFailure::with_work("two is not allowed", work))
                    } else {
                        Ok(Some(work))
                    }
                }),
                wire_async_operator(
                    "observer",
                    Observer {
                        errors_seen: errors_seen.clone(),
                    },
                ),
            ],
        );

        pipeline.send_async(tracked(1, &released)).await.unwrap();
        pipeline.send_async(tracked(2, &released)).await.unwrap();

        // The failure parks at the end of the chain until a later send picks it up.
        let mut sent = 2;
        let mut surfaced = None;
        while surfaced.is_none() && sent < 1000 {
            sent += 1;
            surfaced = pipeline.send_async(tracked(sent, &released)).await.err();
        }
        let err = surfaced.expect("failure should surface");
        assert_eq!(err.to_string(), "two is not allowed");
        let op_err = err.as_operator_error().unwrap();
        assert_eq!(op_err.op_name(), "fail-on-two");
        assert_eq!(op_err.place(), ErrorPlace::DoAsyncOutWorkNotNil);

        pipeline.close().await;

        // Only items 1 and 2 reached the operator; everything after the latch was dropped.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(errors_seen.load(Ordering::SeqCst), 1);
        assert_eq!(released.load(Ordering::SeqCst), sent);
    }

    #[tokio::test]
    async fn test_flush_failure_latches_with_timer_place() {
        struct FailingFlush;

        #[async_trait]
        impl AsyncOperator<String> for FailingFlush {
            async fn do_async(
                &mut self,
                _ctx: &CancellationToken,
                _work: String,
            ) -> Result<Option<String>, AsyncFailure<String>> {
                Ok(None)
            }

            async fn flush(&mut self, _emitter: &mut Emitter<'_, String>) -> Result<(), BoxError> {
                Err("flush broke".into())
            }
        }

        let mut pipeline = AsyncPipeline::new(
            CancellationToken::new(),
            "flush-fail",
            vec![wire_async_operator_with_flush("agg", FailingFlush, Duration::from_millis(10))],
        );

        pipeline.send_async("a".to_string()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut surfaced = None;
        for _ in 0..1000 {
            if let Err(err) = pipeline.send_async("b".to_string()).await {
                surfaced = Some(err);
                break;
            }
        }
        let err = surfaced.expect("flush failure should surface");
        let op_err = err.as_operator_error().unwrap();
        assert_eq!(op_err.place(), ErrorPlace::FlushTimer);
        assert_eq!(op_err.to_string(), "flush broke");
        pipeline.close().await;
    }

    #[tokio::test]
    async fn test_failure_without_work_has_nil_place() {
        let mut pipeline = AsyncPipeline::new(
            CancellationToken::new(),
            "swallow",
            vec![wire_async_func("reject", |_, work: String| {
                if work == "bad" {
                    work.release();
                    Err(AsyncFailure::new("rejected"))
                } else {
                    Ok(Some(work))
                }
            })],
        );

        pipeline.send_async("bad".to_string()).await.unwrap();
        let mut surfaced = None;
        for _ in 0..1000 {
            if let Err(err) = pipeline.send_async("good".to_string()).await {
                surfaced = Some(err);
                break;
            }
        }
        let err = surfaced.expect("failure should surface");
        let op_err = err.as_operator_error().unwrap();
        assert_eq!(op_err.op_name(), "reject");
        assert_eq!(op_err.place(), ErrorPlace::DoAsyncOutWorkNil);
        pipeline.close().await;
    }

    #[tokio::test]
    async fn test_final_flush_failure_reaches_downstream() {
        struct BrokenFinalFlush;

        #[async_trait]
        impl AsyncOperator<String> for BrokenFinalFlush {
            async fn do_async(
                &mut self,
                _ctx: &CancellationToken,
                work: String,
            ) -> Result<Option<String>, AsyncFailure<String>> {
                Ok(Some(work))
            }

            async fn flush(&mut self, _emitter: &mut Emitter<'_, String>) -> Result<(), BoxError> {
                Err("final flush broke".into())
            }
        }

        struct PlaceObserver {
            places: Arc<Mutex<Vec<(String, ErrorPlace)>>>,
        }

        #[async_trait]
        impl AsyncOperator<String> for PlaceObserver {
            async fn do_async(
                &mut self,
                _ctx: &CancellationToken,
                work: String,
            ) -> Result<Option<String>, AsyncFailure<String>> {
                Ok(Some(work))
            }

            fn on_error(&mut self, _ctx: &CancellationToken, err: &OperatorError) {
                self.places.lock().push((err.to_string(), err.place()));
            }
        }

        let log = CallLog::new();
        let places = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = AsyncPipeline::new(
            CancellationToken::new(),
            "final-flush",
            vec![
                wire_async_operator("broken", BrokenFinalFlush),
                wire_async_operator("places", PlaceObserver { places: places.clone() }),
                wire_async_operator("obs", RecordingOperator::new("obs", &log)),
            ],
        );

        pipeline.send_async("w".to_string()).await.unwrap();
        pipeline.close().await;

        assert_eq!(
            *places.lock(),
            vec![("final flush broke".to_string(), ErrorPlace::FlushDisassembling)]
        );
        assert_eq!(log.entries(), vec!["obs: do", "obs: error final flush broke", "obs: close"]);
    }

    #[tokio::test]
    async fn test_slow_stage_keeps_order() {
        let released = Arc::new(AtomicUsize::new(0));
        let (op, _, flushed, _) = buffer();
        let mut pipeline = AsyncPipeline::new(
            CancellationToken::new(),
            "slow",
            vec![
                wire_async_operator("slow", SlowOperator::with_delay_ms(5)),
                wire_async_operator("buffer", op),
            ],
        );

        for id in 0..5 {
            pipeline.send_async(tracked(id, &released)).await.unwrap();
        }
        pipeline.close().await;

        assert_eq!(*flushed.lock(), vec![0, 1, 2, 3, 4]);
        assert_eq!(released.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_cancelled_pipeline_rejects_and_releases() {
        let released = Arc::new(AtomicUsize::new(0));
        let ctx = CancellationToken::new();
        let mut pipeline = AsyncPipeline::new(ctx.clone(), "cancelled", vec![wire_async_operator("a", Noop)]);
        ctx.cancel("stopping");

        let result = pipeline.send_async(tracked(1, &released)).await;

        assert_cancelled(&result);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        pipeline.close().await;
    }

    #[tokio::test]
    async fn test_empty_pipeline_releases() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut pipeline = AsyncPipeline::<Tracked>::new(CancellationToken::new(), "empty", Vec::new());

        pipeline.send_async(tracked(1, &released)).await.unwrap();
        pipeline.close().await;

        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    #[should_panic(expected = "is not an async operator")]
    async fn test_sync_operator_rejected() {
        let _ = AsyncPipeline::<String>::new(
            CancellationToken::new(),
            "mixed",
            vec![wire_func("s", |_, _: &mut String| Ok(()))],
        );
    }
}
