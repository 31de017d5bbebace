//! Mock operators for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::cancellation::CancellationToken;
use crate::errors::{BoxError, OperatorError};
use crate::operators::{AsyncFailure, AsyncOperator, SyncOperator};
use crate::workpiece::Workpiece;

/// A shared, ordered log of operator calls.
///
/// Entries look like `"a: do"`, `"a: error boom"` and `"a: close"`.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of every entry.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Returns how many entries equal `entry`.
    #[must_use]
    pub fn count(&self, entry: &str) -> usize {
        self.entries.lock().iter().filter(|e| *e == entry).count()
    }

    fn push(&self, entry: String) {
        self.entries.lock().push(entry);
    }
}

/// An operator that records every call and otherwise does nothing.
///
/// Works in both pipeline kinds; as an async operator it forwards its input.
#[derive(Debug, Clone)]
pub struct RecordingOperator {
    name: String,
    log: CallLog,
}

impl RecordingOperator {
    /// Creates a recording operator writing to `log`.
    #[must_use]
    pub fn new(name: impl Into<String>, log: &CallLog) -> Self {
        Self {
            name: name.into(),
            log: log.clone(),
        }
    }
}

#[async_trait]
impl<W: Workpiece> SyncOperator<W> for RecordingOperator {
    async fn do_sync(&mut self, _ctx: &CancellationToken, _work: &mut W) -> Result<(), BoxError> {
        self.log.push(format!("{}: do", self.name));
        Ok(())
    }

    async fn close(&mut self) {
        self.log.push(format!("{}: close", self.name));
    }
}

#[async_trait]
impl<W: Workpiece> AsyncOperator<W> for RecordingOperator {
    async fn do_async(&mut self, _ctx: &CancellationToken, work: W) -> Result<Option<W>, AsyncFailure<W>> {
        self.log.push(format!("{}: do", self.name));
        Ok(Some(work))
    }

    fn on_error(&mut self, _ctx: &CancellationToken, err: &OperatorError) {
        self.log.push(format!("{}: error {}", self.name, err));
    }

    async fn close(&mut self) {
        self.log.push(format!("{}: close", self.name));
    }
}

/// An operator that fails with a fixed message.
///
/// As an async operator it hands the offending workpiece back with the error.
#[derive(Debug, Clone)]
pub struct FailingOperator {
    message: String,
    succeed_first: usize,
    calls: usize,
}

impl FailingOperator {
    /// Creates an operator that fails on every call.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            succeed_first: 0,
            calls: 0,
        }
    }

    /// Lets the first `n` calls succeed.
    #[must_use]
    pub fn after(mut self, n: usize) -> Self {
        self.succeed_first = n;
        self
    }

    fn should_fail(&mut self) -> bool {
        self.calls += 1;
        self.calls > self.succeed_first
    }
}

#[async_trait]
impl<W: Workpiece> SyncOperator<W> for FailingOperator {
    async fn do_sync(&mut self, _ctx: &CancellationToken, _work: &mut W) -> Result<(), BoxError> {
        if self.should_fail() {
            return Err(self.message.clone().into());
        }
        Ok(())
    }
}

#[async_trait]
impl<W: Workpiece> AsyncOperator<W> for FailingOperator {
    async fn do_async(&mut self, _ctx: &CancellationToken, work: W) -> Result<Option<W>, AsyncFailure<W>> {
        if self.should_fail() {
            return Err(AsyncFailure::with_work(self.message.clone(), work));
        }
        Ok(Some(work))
    }
}

/// An operator that sleeps before passing its input on.
#[derive(Debug, Clone)]
pub struct SlowOperator {
    delay: Duration,
}

impl SlowOperator {
    /// Creates a slow operator with a delay in milliseconds.
    #[must_use]
    pub const fn with_delay_ms(ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(ms),
        }
    }
}

#[async_trait]
impl<W: Workpiece> SyncOperator<W> for SlowOperator {
    async fn do_sync(&mut self, _ctx: &CancellationToken, _work: &mut W) -> Result<(), BoxError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

#[async_trait]
impl<W: Workpiece> AsyncOperator<W> for SlowOperator {
    async fn do_async(&mut self, _ctx: &CancellationToken, work: W) -> Result<Option<W>, AsyncFailure<W>> {
        tokio::time::sleep(self.delay).await;
        Ok(Some(work))
    }
}
