//! Output handle given to [`AsyncOperator::flush`](super::AsyncOperator::flush).

use crate::cancellation::CancellationToken;
use crate::workpiece::{Item, Workpiece};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendError;

/// Forwards workpieces emitted during a flush to the next stage.
///
/// Emitting into a stage that is no longer active releases the workpiece
/// instead of forwarding it.
pub struct Emitter<'a, W: Workpiece> {
    output: &'a mpsc::Sender<Item<W>>,
    ctx: &'a CancellationToken,
    latched: bool,
    emitted: usize,
}

impl<'a, W: Workpiece> Emitter<'a, W> {
    pub(crate) fn new(output: &'a mpsc::Sender<Item<W>>, ctx: &'a CancellationToken, latched: bool) -> Self {
        Self {
            output,
            ctx,
            latched,
            emitted: 0,
        }
    }

    /// Forwards a workpiece downstream.
    pub async fn emit(&mut self, work: W) {
        if self.latched || self.ctx.is_cancelled() {
            work.release();
            return;
        }
        match self.output.send(Item::Work(work)).await {
            Ok(()) => self.emitted += 1,
            Err(SendError(item)) => item.release(),
        }
    }

    /// Returns how many workpieces were forwarded.
    #[must_use]
    pub const fn emitted(&self) -> usize {
        self.emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unwrap_work(item: Option<Item<String>>) -> String {
        match item {
            Some(Item::Work(work)) => work,
            _ => panic!("expected a workpiece"),
        }
    }

    #[tokio::test]
    async fn test_emit_forwards() {
        let (tx, mut rx) = mpsc::channel(4);
        let ctx = CancellationToken::new();
        let mut emitter = Emitter::new(&tx, &ctx, false);

        emitter.emit("a".to_string()).await;
        emitter.emit("b".to_string()).await;

        assert_eq!(emitter.emitted(), 2);
        assert_eq!(unwrap_work(rx.recv().await), "a");
        assert_eq!(unwrap_work(rx.recv().await), "b");
    }

    #[tokio::test]
    async fn test_emit_drops_when_inactive() {
        let (tx, mut rx) = mpsc::channel(4);
        let ctx = CancellationToken::new();

        let mut latched = Emitter::new(&tx, &ctx, true);
        latched.emit("x".to_string()).await;
        assert_eq!(latched.emitted(), 0);

        ctx.cancel("stop");
        let mut cancelled = Emitter::new(&tx, &ctx, false);
        cancelled.emit("y".to_string()).await;
        assert_eq!(cancelled.emitted(), 0);

        drop(tx);
        assert!(rx.recv().await.is_none());
    }
}
