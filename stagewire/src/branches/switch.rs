//! Routing to one named branch.

use crate::cancellation::CancellationToken;
use crate::errors::{BoxError, UnknownBranchError};
use crate::operators::{AsyncFailure, AsyncOperator, SyncOperator};
use crate::pipeline::AsyncPipeline;
use crate::workpiece::Workpiece;
use async_trait::async_trait;
use tracing::debug;

/// Picks the branch a workpiece goes to.
///
/// Implemented for any `Fn(&W) -> Result<String, BoxError>` closure.
pub trait Switch<W>: Send + Sync {
    /// Returns the name of the branch for `work`.
    fn switch(&self, work: &W) -> Result<String, BoxError>;
}

impl<W, F> Switch<W> for F
where
    F: Fn(&W) -> Result<String, BoxError> + Send + Sync,
{
    fn switch(&self, work: &W) -> Result<String, BoxError> {
        self(work)
    }
}

fn insert_branch<T>(branches: &mut Vec<(String, T)>, name: String, branch: T) {
    assert!(
        branches.iter().all(|(existing, _)| *existing != name),
        "switch branch '{name}' is wired twice"
    );
    branches.push((name, branch));
}

/// Runs the one sync branch the selector names.
pub struct SwitchOperator<W: Workpiece> {
    selector: Box<dyn Switch<W>>,
    branches: Vec<(String, Box<dyn SyncOperator<W>>)>,
}

impl<W: Workpiece> SwitchOperator<W> {
    /// Creates a switch with no branches.
    pub fn new(selector: impl Switch<W> + 'static) -> Self {
        Self {
            selector: Box::new(selector),
            branches: Vec::new(),
        }
    }

    /// Adds a named branch.
    ///
    /// # Panics
    ///
    /// Panics if a branch with the same name already exists.
    #[must_use]
    pub fn with_branch<O: SyncOperator<W> + 'static>(mut self, name: impl Into<String>, branch: O) -> Self {
        insert_branch(&mut self.branches, name.into(), Box::new(branch) as Box<dyn SyncOperator<W>>);
        self
    }

    /// Returns the branch names in wiring order.
    pub fn branch_names(&self) -> impl Iterator<Item = &str> {
        self.branches.iter().map(|(name, _)| name.as_str())
    }
}

impl<W: Workpiece> std::fmt::Debug for SwitchOperator<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwitchOperator")
            .field("branches", &self.branch_names().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<W: Workpiece> SyncOperator<W> for SwitchOperator<W> {
    async fn do_sync(&mut self, ctx: &CancellationToken, work: &mut W) -> Result<(), BoxError> {
        let name = self.selector.switch(work)?;
        let Some((_, branch)) = self.branches.iter_mut().find(|(branch, _)| *branch == name) else {
            return Err(Box::new(UnknownBranchError::new(name)));
        };
        debug!(branch = %name, "switching");
        branch.do_sync(ctx, work).await
    }

    async fn close(&mut self) {
        for (_, branch) in &mut self.branches {
            branch.close().await;
        }
    }
}

/// Hands each workpiece to the one nested async pipeline the selector names.
///
/// The chosen branch owns the workpiece from then on, so this operator never
/// emits anything itself. Closing it closes every branch pipeline.
pub struct AsyncSwitchOperator<W: Workpiece> {
    selector: Box<dyn Switch<W>>,
    branches: Vec<(String, AsyncPipeline<W>)>,
}

impl<W: Workpiece> AsyncSwitchOperator<W> {
    /// Creates a switch with no branches.
    pub fn new(selector: impl Switch<W> + 'static) -> Self {
        Self {
            selector: Box::new(selector),
            branches: Vec::new(),
        }
    }

    /// Adds a named branch pipeline.
    ///
    /// # Panics
    ///
    /// Panics if a branch with the same name already exists.
    #[must_use]
    pub fn with_branch(mut self, name: impl Into<String>, branch: AsyncPipeline<W>) -> Self {
        insert_branch(&mut self.branches, name.into(), branch);
        self
    }

    /// Returns the branch names in wiring order.
    pub fn branch_names(&self) -> impl Iterator<Item = &str> {
        self.branches.iter().map(|(name, _)| name.as_str())
    }
}

impl<W: Workpiece> std::fmt::Debug for AsyncSwitchOperator<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncSwitchOperator")
            .field("branches", &self.branch_names().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<W: Workpiece> AsyncOperator<W> for AsyncSwitchOperator<W> {
    async fn do_async(&mut self, _ctx: &CancellationToken, work: W) -> Result<Option<W>, AsyncFailure<W>> {
        let name = match self.selector.switch(&work) {
            Ok(name) => name,
            Err(err) => return Err(AsyncFailure::with_work(err, work)),
        };
        let Some((_, branch)) = self.branches.iter_mut().find(|(branch, _)| *branch == name) else {
            return Err(AsyncFailure::with_work(UnknownBranchError::new(name), work));
        };
        debug!(branch = %name, "switching");
        branch.send_async(work).await.map_err(AsyncFailure::new)?;
        Ok(None)
    }

    async fn close(&mut self) {
        for (_, branch) in std::mem::take(&mut self.branches) {
            branch.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorPlace, PipelineError};
    use crate::operators::sync_op;
    use crate::pipeline::{wire_async_operator, wire_sync_operator, SyncPipeline};
    use crate::testing::{CallLog, FailingOperator, RecordingOperator};
    use pretty_assertions::assert_eq;

    fn by_prefix(work: &String) -> Result<String, BoxError> {
        match work.split(':').next() {
            Some(prefix) if !prefix.is_empty() => Ok(prefix.to_string()),
            _ => Err("no prefix".into()),
        }
    }

    fn append(suffix: &'static str) -> impl SyncOperator<String> {
        sync_op(move |_: &CancellationToken, work: &mut String| {
            work.push_str(suffix);
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_routes_to_named_branch() {
        let mut switch = SwitchOperator::new(by_prefix)
            .with_branch("a", append("+a"))
            .with_branch("b", append("+b"));
        let ctx = CancellationToken::new();

        for _ in 0..3 {
            let mut work = "b:1".to_string();
            switch.do_sync(&ctx, &mut work).await.unwrap();
            assert_eq!(work, "b:1+b");
        }
        assert_eq!(switch.branch_names().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_selector_error_propagates() {
        let mut switch = SwitchOperator::new(by_prefix).with_branch("a", append("+a"));
        let mut work = ":x".to_string();

        let err = switch.do_sync(&CancellationToken::new(), &mut work).await.unwrap_err();

        assert_eq!(err.to_string(), "no prefix");
        assert_eq!(work, ":x");
    }

    #[tokio::test]
    async fn test_unknown_branch_in_pipeline() {
        let switch = SwitchOperator::new(by_prefix).with_branch("a", append("+a"));
        let mut pipeline = SyncPipeline::new(
            CancellationToken::new(),
            "routing",
            vec![wire_sync_operator("switch", switch)],
        );

        let err = pipeline.send_sync(&mut "c:1".to_string()).await.unwrap_err();

        let op_err = err.as_operator_error().unwrap();
        assert_eq!(op_err.op_name(), "switch");
        assert_eq!(op_err.place(), ErrorPlace::DoSync);
        assert_eq!(err.find::<UnknownBranchError>(), Some(&UnknownBranchError::new("c")));
        pipeline.close().await;
    }

    #[test]
    #[should_panic(expected = "switch branch 'a' is wired twice")]
    fn test_duplicate_branch_panics() {
        let _ = SwitchOperator::new(by_prefix)
            .with_branch("a", append("1"))
            .with_branch("a", append("2"));
    }

    #[tokio::test]
    async fn test_close_closes_every_branch() {
        let log = CallLog::new();
        let mut switch: SwitchOperator<String> = SwitchOperator::new(by_prefix)
            .with_branch("a", RecordingOperator::new("a", &log))
            .with_branch("b", RecordingOperator::new("b", &log));

        SyncOperator::close(&mut switch).await;

        assert_eq!(log.entries(), vec!["a: close", "b: close"]);
    }

    #[tokio::test]
    async fn test_async_switch_routes_to_branch_pipeline() {
        let ctx = CancellationToken::new();
        let log = CallLog::new();
        let branch = |name: &str| {
            AsyncPipeline::new(
                ctx.clone(),
                name,
                vec![wire_async_operator(name, RecordingOperator::new(name, &log))],
            )
        };
        let switch = AsyncSwitchOperator::<String>::new(by_prefix)
            .with_branch("a", branch("a"))
            .with_branch("b", branch("b"));
        let mut pipeline = AsyncPipeline::new(ctx.clone(), "outer", vec![wire_async_operator("switch", switch)]);

        for work in ["a:1", "b:2", "a:3"] {
            pipeline.send_async(work.to_string()).await.unwrap();
        }
        pipeline.close().await;

        assert_eq!(log.count("a: do"), 2);
        assert_eq!(log.count("b: do"), 1);
        assert_eq!(log.count("a: close"), 1);
        assert_eq!(log.count("b: close"), 1);
    }

    #[tokio::test]
    async fn test_async_switch_unknown_branch_hands_work_back() {
        let ctx = CancellationToken::new();
        let mut switch = AsyncSwitchOperator::new(by_prefix).with_branch(
            "a",
            AsyncPipeline::<String>::new(ctx.clone(), "a", Vec::new()),
        );

        let failure = switch.do_async(&ctx, "z:1".to_string()).await.unwrap_err();

        assert_eq!(failure.error.to_string(), "unknown switch branch 'z'");
        assert_eq!(failure.work.as_deref(), Some("z:1"));
        AsyncOperator::close(&mut switch).await;
    }

    #[tokio::test]
    async fn test_async_switch_branch_failure_becomes_own() {
        let ctx = CancellationToken::new();
        let failing = AsyncPipeline::<String>::new(
            ctx.clone(),
            "a",
            vec![wire_async_operator("reject", FailingOperator::new("rejected"))],
        );
        let mut switch = AsyncSwitchOperator::new(by_prefix).with_branch("a", failing);

        let mut surfaced = None;
        for _ in 0..1000 {
            if let Err(failure) = switch.do_async(&ctx, "a:1".to_string()).await {
                surfaced = Some(failure);
                break;
            }
        }
        let failure = surfaced.expect("branch failure should surface");

        assert!(failure.work.is_none());
        let err = failure.error.downcast_ref::<PipelineError>().unwrap();
        assert_eq!(err.to_string(), "rejected");
        AsyncOperator::close(&mut switch).await;
    }
}
