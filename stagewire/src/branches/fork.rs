//! Concurrent fan-out to sync branches.

use crate::cancellation::CancellationToken;
use crate::errors::{BoxError, BranchErrors};
use crate::operators::SyncOperator;
use crate::workpiece::Workpiece;
use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

type ForkFn<W> = Box<dyn Fn(&W, usize) -> Result<W, BoxError> + Send + Sync>;

/// Fork function handing every branch its own clone of the workpiece.
pub fn fork_same<W: Workpiece + Clone>(work: &W, _branch: usize) -> Result<W, BoxError> {
    Ok(work.clone())
}

/// Runs every branch on its own forked copy of the workpiece.
///
/// The fork function builds each branch's input from the original. Branches
/// run concurrently and all of them finish before `do_sync` returns; their
/// failures are collected into [`BranchErrors`] in branch order. Forked
/// workpieces are released once every branch is done.
pub struct ForkOperator<W: Workpiece> {
    fork: ForkFn<W>,
    branches: Vec<Box<dyn SyncOperator<W>>>,
}

impl<W: Workpiece> ForkOperator<W> {
    /// Creates a fork with its first branch.
    pub fn new<F, O>(fork: F, first: O) -> Self
    where
        F: Fn(&W, usize) -> Result<W, BoxError> + Send + Sync + 'static,
        O: SyncOperator<W> + 'static,
    {
        Self {
            fork: Box::new(fork),
            branches: vec![Box::new(first)],
        }
    }

    /// Adds another branch.
    #[must_use]
    pub fn with_branch<O: SyncOperator<W> + 'static>(mut self, branch: O) -> Self {
        self.branches.push(Box::new(branch));
        self
    }

    /// Returns the number of branches.
    #[must_use]
    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }

    fn fork_all(&self, work: &W) -> Result<Vec<W>, BoxError> {
        let mut forks = Vec::with_capacity(self.branches.len());
        for branch in 0..self.branches.len() {
            match (self.fork)(work, branch) {
                Ok(fork) => forks.push(fork),
                Err(err) => {
                    debug!(branch, error = %err, "fork failed");
                    forks.into_iter().for_each(Workpiece::release);
                    return Err(err);
                }
            }
        }
        Ok(forks)
    }
}

impl<W: Workpiece> std::fmt::Debug for ForkOperator<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForkOperator")
            .field("branches", &self.branches.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<W: Workpiece> SyncOperator<W> for ForkOperator<W> {
    async fn do_sync(&mut self, ctx: &CancellationToken, work: &mut W) -> Result<(), BoxError> {
        let mut forks = self.fork_all(work)?;

        let results = join_all(
            self.branches
                .iter_mut()
                .zip(forks.iter_mut())
                .map(|(branch, fork)| branch.do_sync(ctx, fork)),
        )
        .await;
        forks.into_iter().for_each(Workpiece::release);

        let errors: Vec<BoxError> = results
            .into_iter()
            .enumerate()
            .filter_map(|(branch, result)| {
                result
                    .map_err(|err| {
                        warn!(branch, error = %err, "fork branch failed");
                        err
                    })
                    .err()
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Box::new(BranchErrors::new(errors)))
        }
    }

    async fn close(&mut self) {
        for branch in &mut self.branches {
            branch.close().await;
        }
    }
}
