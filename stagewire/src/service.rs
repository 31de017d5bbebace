//! Background services as sync pipeline stages.
//!
//! A [`ServiceOperator`] starts its [`Service`] on the first `do_sync` and
//! returns only once the service reports that it is up. Closing the operator
//! stops the service and waits for its task to finish; cancel the pipeline
//! token first if the service's `run` only returns on cancellation.

use crate::cancellation::CancellationToken;
use crate::errors::{BoxError, ServiceError};
use crate::operators::SyncOperator;
use crate::workpiece::Workpiece;
use async_trait::async_trait;
use std::any::{type_name, Any};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// A long-running background service.
#[async_trait]
pub trait Service<W: Workpiece>: Send + Sync + 'static {
    /// Prepares the service from the first workpiece.
    ///
    /// An error here keeps the service from ever running.
    async fn prepare(&self, _work: &mut W) -> Result<(), BoxError> {
        Ok(())
    }

    /// Runs until the service is stopped or `ctx` is cancelled.
    async fn run(&self, ctx: CancellationToken);

    /// Asks a running service to stop.
    fn stop(&self) {}

    /// Runs the service, signalling `started` once it is up.
    ///
    /// Override this when the service needs setup before it counts as
    /// started. Dropping `started` without sending fails the starting
    /// `do_sync` with [`ServiceError::NotStarted`].
    async fn run_ex(&self, ctx: CancellationToken, started: oneshot::Sender<()>) {
        let _ = started.send(());
        self.run(ctx).await;
    }
}

/// A [`Service`] backed by an async closure.
pub struct FnService<F> {
    run: F,
}

impl<F> std::fmt::Debug for FnService<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnService").finish_non_exhaustive()
    }
}

#[async_trait]
impl<W, F, Fut> Service<W> for FnService<F>
where
    W: Workpiece,
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn run(&self, ctx: CancellationToken) {
        (self.run)(ctx).await;
    }
}

/// Wraps an async closure as a service.
pub fn fn_service<F, Fut>(run: F) -> FnService<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    FnService { run }
}

/// Adapts a [`Service`] to a sync pipeline stage.
pub struct ServiceOperator<W, S> {
    service: Arc<S>,
    handle: Option<JoinHandle<()>>,
    _work: PhantomData<fn() -> W>,
}

impl<W: Workpiece, S: Service<W>> ServiceOperator<W, S> {
    /// Creates an operator for `service`; nothing runs until the first `do_sync`.
    pub fn new(service: S) -> Self {
        Self {
            service: Arc::new(service),
            handle: None,
            _work: PhantomData,
        }
    }

    /// Returns whether the service task has been started.
    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.handle.is_some()
    }
}

impl<W, S> std::fmt::Debug for ServiceOperator<W, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceOperator")
            .field("service", &type_name::<S>())
            .field("started", &self.handle.is_some())
            .finish()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map_or_else(|| "non-string panic payload".to_string(), |message| (*message).to_string()),
    }
}

#[async_trait]
impl<W: Workpiece, S: Service<W>> SyncOperator<W> for ServiceOperator<W, S> {
    async fn do_sync(&mut self, ctx: &CancellationToken, work: &mut W) -> Result<(), BoxError> {
        let service = type_name::<S>();
        if self.handle.is_some() {
            warn!(service, "service already started, ignoring workpiece");
            return Ok(());
        }

        self.service.prepare(work).await?;

        let (started_tx, started_rx) = oneshot::channel();
        let runner = Arc::clone(&self.service);
        let run_ctx = ctx.clone();
        let handle = tokio::spawn(async move { runner.run_ex(run_ctx, started_tx).await });

        if started_rx.await.is_err() {
            let err = match handle.await {
                Err(join_err) if join_err.is_panic() => ServiceError::Panicked {
                    service: service.to_string(),
                    message: panic_message(join_err.into_panic()),
                },
                _ => ServiceError::NotStarted {
                    service: service.to_string(),
                },
            };
            error!(service, error = %err, "service failed to start");
            return Err(Box::new(err));
        }

        debug!(service, "service started");
        self.handle = Some(handle);
        Ok(())
    }

    async fn close(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let service = type_name::<S>();
        self.service.stop();
        match handle.await {
            Ok(()) => debug!(service, "service stopped"),
            Err(err) => error!(service, error = %err, "service task failed"),
        }
    }
}
