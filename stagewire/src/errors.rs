//! Error types for the stagewire engine.
//!
//! Operators report plain business errors as [`BoxError`]. The engine wraps
//! every such error into an [`OperatorError`] that remembers which operator
//! failed and where, and hands it to callers inside a [`PipelineError`].

use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// The business-error currency operators return.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result type for pipeline calls.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// The error type returned by `send_sync`/`send_async`.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The pipeline's cancellation token was cancelled.
    #[error("pipeline cancelled: {0}")]
    Cancelled(String),

    /// An operator failed and no stage recovered the failure.
    #[error(transparent)]
    Operator(#[from] OperatorError),

    /// The asynchronous chain is no longer accepting workpieces.
    #[error("pipeline is closed")]
    Closed,
}

impl PipelineError {
    /// Returns the operator failure, if this is one.
    #[must_use]
    pub fn as_operator_error(&self) -> Option<&OperatorError> {
        match self {
            Self::Operator(err) => Some(err),
            _ => None,
        }
    }

    /// Finds the first error of type `T` anywhere in the error chain.
    #[must_use]
    pub fn find<T: StdError + 'static>(&self) -> Option<&T> {
        match self {
            Self::Operator(err) => err.find(),
            other => find_in_chain(other),
        }
    }

    /// Returns true when the error chain contains an error of type `T`.
    #[must_use]
    pub fn is<T: StdError + 'static>(&self) -> bool {
        self.find::<T>().is_some()
    }
}

/// Where an operator failure was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorPlace {
    /// A sync operator's `do_sync` failed.
    DoSync,
    /// An async operator's `do_async` failed without handing back a workpiece.
    DoAsyncOutWorkNil,
    /// An async operator's `do_async` failed and handed back a workpiece.
    DoAsyncOutWorkNotNil,
    /// A timer-triggered flush failed.
    FlushTimer,
    /// The final flush during pipeline shutdown failed.
    FlushDisassembling,
    /// A catching stage rethrew the error it caught.
    CatchOnErr,
}

impl ErrorPlace {
    /// Returns the diagnostic tag for this place.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DoSync => "doSync",
            Self::DoAsyncOutWorkNil => "doAsync-outWork-nil",
            Self::DoAsyncOutWorkNotNil => "doAsync-outWork-not-nil",
            Self::FlushTimer => "flush-timer",
            Self::FlushDisassembling => "flush-disassembling",
            Self::CatchOnErr => "catch-onErr",
        }
    }
}

impl fmt::Display for ErrorPlace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure of one wired operator.
///
/// Displays as the underlying cause so messages stay what the operator
/// produced; [`source`](StdError::source) yields the cause.
#[derive(Debug)]
pub struct OperatorError {
    cause: BoxError,
    place: ErrorPlace,
    op_name: String,
}

impl OperatorError {
    /// Creates a new operator error.
    #[must_use]
    pub fn new(cause: impl Into<BoxError>, place: ErrorPlace, op_name: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
            place,
            op_name: op_name.into(),
        }
    }

    /// Returns the name of the failing operator.
    #[must_use]
    pub fn op_name(&self) -> &str {
        &self.op_name
    }

    /// Returns where the failure was observed.
    #[must_use]
    pub const fn place(&self) -> ErrorPlace {
        self.place
    }

    /// Returns the underlying cause.
    #[must_use]
    pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.cause.as_ref()
    }

    /// Consumes the error and returns the underlying cause.
    #[must_use]
    pub fn into_cause(self) -> BoxError {
        self.cause
    }

    /// Finds the first error of type `T` in the chain starting at `self`.
    #[must_use]
    pub fn find<T: StdError + 'static>(&self) -> Option<&T> {
        find_in_chain(self)
    }

    /// Returns true when the chain contains an error of type `T`.
    #[must_use]
    pub fn is<T: StdError + 'static>(&self) -> bool {
        self.find::<T>().is_some()
    }
}

impl fmt::Display for OperatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.cause, f)
    }
}

impl StdError for OperatorError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        let cause: &(dyn StdError + 'static) = self.cause.as_ref();
        Some(cause)
    }
}

/// The error a catching stage produced when it rethrew a caught failure.
///
/// Displays as the new error; its source is the caught [`OperatorError`], so
/// the original cause remains reachable through the chain.
#[derive(Debug)]
pub struct Rethrown {
    error: BoxError,
    caught: OperatorError,
}

impl Rethrown {
    /// Creates a rethrown error.
    #[must_use]
    pub fn new(error: BoxError, caught: OperatorError) -> Self {
        Self { error, caught }
    }

    /// Returns the error produced by the catching stage.
    #[must_use]
    pub fn error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.error.as_ref()
    }

    /// Returns the failure that was caught.
    #[must_use]
    pub fn caught(&self) -> &OperatorError {
        &self.caught
    }
}

impl fmt::Display for Rethrown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl StdError for Rethrown {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.caught)
    }
}

/// Errors collected from fork branches, in branch order.
#[derive(Debug)]
pub struct BranchErrors {
    /// The per-branch errors.
    pub errors: Vec<BoxError>,
}

impl BranchErrors {
    /// Creates an aggregate from the failed branches' errors.
    #[must_use]
    pub fn new(errors: Vec<BoxError>) -> Self {
        Self { errors }
    }

    /// Returns the number of failed branches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Returns true when no branch failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Iterates over the branch errors.
    pub fn iter(&self) -> impl Iterator<Item = &(dyn StdError + Send + Sync + 'static)> {
        self.errors.iter().map(|err| &**err)
    }

    /// Finds the first branch error whose chain contains a `T`.
    #[must_use]
    pub fn find<T: StdError + 'static>(&self) -> Option<&T> {
        self.errors.iter().find_map(|err| {
            let err: &(dyn StdError + 'static) = err.as_ref();
            find_in_chain(err)
        })
    }

    /// Returns true when any branch error's chain contains a `T`.
    #[must_use]
    pub fn any<T: StdError + 'static>(&self) -> bool {
        self.find::<T>().is_some()
    }
}

impl fmt::Display for BranchErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("errors in fork branches: [")?;
        for (idx, err) in self.errors.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{err}")?;
        }
        f.write_str("]")
    }
}

impl StdError for BranchErrors {}

/// A switch selector named a branch that was never wired.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown switch branch '{branch}'")]
pub struct UnknownBranchError {
    /// The branch name the selector returned.
    pub branch: String,
}

impl UnknownBranchError {
    /// Creates a new unknown branch error.
    #[must_use]
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
        }
    }
}

/// Errors raised by the service operator itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// The service task finished without signalling that it started.
    #[error("service {service} exited before signalling start")]
    NotStarted {
        /// The service type name.
        service: String,
    },

    /// The service task panicked.
    #[error("service {service} panicked: {message}")]
    Panicked {
        /// The service type name.
        service: String,
        /// The panic message, if it was a string.
        message: String,
    },
}

/// Errors raised while loading engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// The logging subscriber could not be installed.
    #[error("failed to initialize logging: {0}")]
    Logging(String),
}

/// Walks `start` and its sources looking for a `T`.
///
/// A [`Rethrown`] link is searched on both sides: the new error's own chain
/// and the caught failure.
fn find_in_chain<'a, T: StdError + 'static>(start: &'a (dyn StdError + 'static)) -> Option<&'a T> {
    let mut current = Some(start);
    while let Some(err) = current {
        if let Some(found) = err.downcast_ref::<T>() {
            return Some(found);
        }
        if let Some(PipelineError::Operator(inner)) = err.downcast_ref::<PipelineError>() {
            if let Some(found) = find_in_chain(inner) {
                return Some(found);
            }
        }
        if let Some(rethrown) = err.downcast_ref::<Rethrown>() {
            let inner: &(dyn StdError + 'static) = rethrown.error.as_ref();
            if let Some(found) = find_in_chain(inner) {
                return Some(found);
            }
        }
        current = err.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Error)]
    #[error("disk full")]
    struct DiskFull;

    #[derive(Debug, Error)]
    #[error("bad request")]
    struct BadRequest;

    #[test]
    fn test_place_tags() {
        assert_eq!(ErrorPlace::DoSync.as_str(), "doSync");
        assert_eq!(ErrorPlace::DoAsyncOutWorkNil.to_string(), "doAsync-outWork-nil");
        assert_eq!(ErrorPlace::DoAsyncOutWorkNotNil.to_string(), "doAsync-outWork-not-nil");
        assert_eq!(ErrorPlace::FlushTimer.to_string(), "flush-timer");
        assert_eq!(ErrorPlace::FlushDisassembling.to_string(), "flush-disassembling");
        assert_eq!(ErrorPlace::CatchOnErr.to_string(), "catch-onErr");
    }

    #[test]
    fn test_operator_error_displays_cause() {
        let err = OperatorError::new(DiskFull, ErrorPlace::DoSync, "write");

        assert_eq!(err.to_string(), "disk full");
        assert_eq!(err.op_name(), "write");
        assert_eq!(err.place(), ErrorPlace::DoSync);
        assert!(err.is::<DiskFull>());
        assert!(err.is::<OperatorError>());
        assert!(!err.is::<BadRequest>());
    }

    #[test]
    fn test_rethrown_reaches_both_errors() {
        let caught = OperatorError::new(DiskFull, ErrorPlace::DoSync, "write");
        let rethrown = Rethrown::new(Box::new(BadRequest), caught);
        let err = OperatorError::new(rethrown, ErrorPlace::CatchOnErr, "catcher");

        assert_eq!(err.to_string(), "bad request");
        assert!(err.is::<BadRequest>());
        assert!(err.is::<DiskFull>());
        let inner = err.find::<Rethrown>().unwrap();
        assert_eq!(inner.caught().op_name(), "write");
    }

    #[test]
    fn test_pipeline_error_find() {
        let err: PipelineError = OperatorError::new(DiskFull, ErrorPlace::FlushTimer, "agg").into();

        assert_eq!(err.to_string(), "disk full");
        assert!(err.is::<DiskFull>());
        assert_eq!(err.find::<OperatorError>().unwrap().op_name(), "agg");
        assert!(PipelineError::Cancelled("stop".into()).find::<DiskFull>().is_none());
    }

    #[test]
    fn test_branch_errors() {
        let err = BranchErrors::new(vec![Box::new(DiskFull), "plain".into()]);

        assert_eq!(err.len(), 2);
        assert!(err.any::<DiskFull>());
        assert!(!err.any::<BadRequest>());
        assert_eq!(err.to_string(), "errors in fork branches: [disk full, plain]");
    }

    #[test]
    fn test_branch_errors_reach_nested_pipeline_failure() {
        let nested: BoxError = Box::new(PipelineError::from(OperatorError::new(
            DiskFull,
            ErrorPlace::DoSync,
            "inner",
        )));
        let err = BranchErrors::new(vec![nested]);

        assert!(err.any::<DiskFull>());
        assert!(err.any::<PipelineError>());
        assert_eq!(err.find::<OperatorError>().unwrap().op_name(), "inner");
    }

    #[test]
    fn test_unknown_branch_message() {
        assert_eq!(
            UnknownBranchError::new("missing").to_string(),
            "unknown switch branch 'missing'"
        );
    }
}
