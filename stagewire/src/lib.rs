//! # Stagewire
//!
//! Operator pipelines for workpieces flowing through named stages.
//!
//! Stagewire provides:
//!
//! - **Sync pipelines**: stages run in sequence on the caller's task, with
//!   catch-and-resume error handling
//! - **Async pipelines**: one worker task per stage, capacity-one hand-off
//!   channels, timed and final flushes
//! - **Branching**: concurrent fork fan-out and named switch routing
//! - **Services**: long-running background tasks started as a pipeline stage
//! - **Cancellation**: one shared token governing a whole pipeline
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagewire::prelude::*;
//!
//! let mut pipeline = SyncPipeline::new(
//!     CancellationToken::new(),
//!     "greeting",
//!     vec![
//!         wire_func("trim", |_, work: &mut String| {
//!             *work = work.trim().to_string();
//!             Ok(())
//!         }),
//!         wire_func("shout", |_, work: &mut String| {
//!             work.make_ascii_uppercase();
//!             Ok(())
//!         }),
//!     ],
//! );
//!
//! let mut work = "  hello ".to_string();
//! pipeline.send_sync(&mut work).await?;
//! pipeline.close().await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod branches;
pub mod cancellation;
pub mod config;
pub mod context;
pub mod errors;
pub mod observability;
pub mod operators;
pub mod pipeline;
pub mod service;
pub mod testing;
pub mod workpiece;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::branches::{fork_same, AsyncSwitchOperator, ForkOperator, Switch, SwitchOperator};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{EngineConfig, LogConfig, LogFormat};
    pub use crate::context::PipelineContext;
    pub use crate::errors::{
        BoxError, BranchErrors, ErrorPlace, OperatorError, PipelineError, Rethrown,
        ServiceError, UnknownBranchError,
    };
    pub use crate::operators::{
        async_op, sync_op, AsyncFailure, AsyncOperator, Catch, Emitter, Noop, SyncOperator,
    };
    pub use crate::pipeline::{
        wire_async_func, wire_async_operator, wire_async_operator_with_config,
        wire_async_operator_with_flush, wire_func, wire_sync_operator, AsyncPipeline,
        SyncPipeline, WiredOperator,
    };
    pub use crate::service::{fn_service, FnService, Service, ServiceOperator};
    pub use crate::workpiece::Workpiece;
}
