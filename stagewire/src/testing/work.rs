//! A workpiece that counts its releases.

use crate::workpiece::Workpiece;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Hands out [`CountingWork`] and tracks how many were created and released.
#[derive(Debug, Clone, Default)]
pub struct ReleaseCounter {
    created: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl ReleaseCounter {
    /// Creates a counter with nothing created yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new workpiece with the given value.
    #[must_use]
    pub fn work(&self, value: impl Into<String>) -> CountingWork {
        self.created.fetch_add(1, Ordering::SeqCst);
        CountingWork {
            value: value.into(),
            tags: Vec::new(),
            counter: self.clone(),
        }
    }

    /// Returns how many workpieces were created, clones included.
    #[must_use]
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Returns how many workpieces were released.
    #[must_use]
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Returns how many workpieces are still alive or were dropped unreleased.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.created().saturating_sub(self.released())
    }
}

/// A workpiece reporting its release to a [`ReleaseCounter`].
///
/// Dropping one without releasing it is a leak the counter will show.
#[derive(Debug)]
pub struct CountingWork {
    /// Payload.
    pub value: String,
    /// Free-form marks left by operators.
    pub tags: Vec<String>,
    counter: ReleaseCounter,
}

impl Clone for CountingWork {
    fn clone(&self) -> Self {
        let mut copy = self.counter.work(self.value.clone());
        copy.tags.clone_from(&self.tags);
        copy
    }
}

impl Workpiece for CountingWork {
    fn release(self) {
        self.counter.released.fetch_add(1, Ordering::SeqCst);
    }
}
