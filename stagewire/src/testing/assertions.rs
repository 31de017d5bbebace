//! Test assertions for pipeline results.

use crate::errors::{ErrorPlace, OperatorError, PipelineError, Result};

/// Asserts that a send succeeded.
pub fn assert_sent(result: &Result<()>) {
    assert!(result.is_ok(), "Expected success, got error: {:?}", result.as_ref().err());
}

/// Asserts that a send failed inside an operator and returns the failure.
pub fn assert_operator_failed(result: &Result<()>) -> &OperatorError {
    match result {
        Err(PipelineError::Operator(err)) => err,
        other => panic!("Expected an operator failure, got {other:?}"),
    }
}

/// Asserts that a send failed in operator `op_name` at `place`.
pub fn assert_failed_at(result: &Result<()>, op_name: &str, place: ErrorPlace) {
    let err = assert_operator_failed(result);
    assert_eq!(
        (err.op_name(), err.place()),
        (op_name, place),
        "Expected failure in '{}' at {}, got '{}' at {}: {}",
        op_name,
        place,
        err.op_name(),
        err.place(),
        err
    );
}

/// Asserts that a send was rejected because the pipeline was cancelled.
pub fn assert_cancelled(result: &Result<()>) {
    assert!(
        matches!(result, Err(PipelineError::Cancelled(_))),
        "Expected cancellation, got {result:?}"
    );
}
