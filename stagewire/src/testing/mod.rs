//! Testing utilities for stagewire pipelines.
//!
//! This module provides:
//! - Mock operators that record, fail or stall
//! - A release-counting workpiece
//! - Assertions for send results

mod assertions;
mod mocks;
mod work;

pub use assertions::{assert_cancelled, assert_failed_at, assert_operator_failed, assert_sent};
pub use mocks::{CallLog, FailingOperator, RecordingOperator, SlowOperator};
pub use work::{CountingWork, ReleaseCounter};
