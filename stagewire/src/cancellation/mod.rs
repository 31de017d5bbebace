//! Cooperative cancellation shared by every stage of a pipeline.

mod token;

pub use token::{CancelCallback, CancellationToken};
