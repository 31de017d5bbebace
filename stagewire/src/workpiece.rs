//! The unit of data that flows through a pipeline.

use crate::errors::OperatorError;
use std::sync::Arc;

/// A value carried through a pipeline.
///
/// Ownership moves from stage to stage; whichever stage owns the workpiece
/// last is responsible for calling [`release`](Workpiece::release). Releasing
/// consumes the value, so it can only happen once.
pub trait Workpiece: Send + Sized + 'static {
    /// Returns any resources held by the workpiece. Defaults to dropping it.
    fn release(self) {}
}

macro_rules! plain_workpiece {
    ($($ty:ty),* $(,)?) => {
        $(impl Workpiece for $ty {})*
    };
}

plain_workpiece!((), bool, i32, i64, u32, u64, usize, String);

impl<T: Send + 'static> Workpiece for Vec<T> {}
impl<T: ?Sized + Send + 'static> Workpiece for Box<T> {}
impl<T: ?Sized + Send + Sync + 'static> Workpiece for Arc<T> {}

/// What travels between async stages: either data or a failure.
pub(crate) enum Item<W> {
    Work(W),
    Failure {
        error: OperatorError,
        work: Option<W>,
    },
}

impl<W: Workpiece> Item<W> {
    /// Releases whatever workpiece the item carries.
    pub(crate) fn release(self) {
        match self {
            Self::Work(work) => work.release(),
            Self::Failure { work, .. } => {
                if let Some(work) = work {
                    work.release();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorPlace;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counted(Arc<AtomicUsize>);

    impl Workpiece for Counted {
        fn release(self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_item_release_work() {
        let released = Arc::new(AtomicUsize::new(0));
        Item::Work(Counted(released.clone())).release();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_item_release_failure() {
        let released = Arc::new(AtomicUsize::new(0));
        let error = OperatorError::new("boom", ErrorPlace::DoAsyncOutWorkNotNil, "op");
        Item::Failure {
            error,
            work: Some(Counted(released.clone())),
        }
        .release();
        Item::<Counted>::Failure {
            error: OperatorError::new("boom", ErrorPlace::DoAsyncOutWorkNil, "op"),
            work: None,
        }
        .release();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
