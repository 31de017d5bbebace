//! Pipeline assembly and execution.
//!
//! This module provides:
//! - Wiring of operators into named stages
//! - [`SyncPipeline`], running stages in sequence on the caller's task
//! - [`AsyncPipeline`], running one worker task per stage

mod async_pipeline;
mod sync_pipeline;
mod wired;


pub use async_pipeline::AsyncPipeline;
pub use sync_pipeline::SyncPipeline;
pub use wired::{
    wire_async_func, wire_async_operator, wire_async_operator_with_config,
    wire_async_operator_with_flush, wire_func, wire_sync_operator, WiredOperator,
};
