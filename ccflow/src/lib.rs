//! # ccflow
//!
//! A separate-compilation build orchestrator for C and C++.
//!
//! Each translation unit is driven independently through explicit stages
//! (preprocess, compile to assembly, assemble) to a linkable object, and the
//! objects are linked with an explicitly ordered set of runtime objects. The
//! compiler, assembler and linker are external tools run as black boxes.
//!
//! - **Stage graph**: unit states only ever move forward
//! - **Failure isolation**: a failing unit stops at its last good state
//! - **Ordered linking**: runtime start objects, units, libraries, runtime end
//!   objects
//! - **Interruption**: one cancellation token kills in-flight tools
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ccflow::prelude::*;
//!
//! let orchestrator = PipelineOrchestrator::new(
//!     ToolchainConfig::default(),
//!     Arc::new(ProcessInvoker::new()),
//!     Arc::new(LoggingEventSink::new()),
//!     Arc::new(CancellationToken::new()),
//! );
//!
//! let request = BuildRequest::new(vec!["main.c".into(), "util.c".into()], TargetStage::Link)
//!     .with_output("app");
//! let result = orchestrator.build(&request).await?;
//! print!("{}", result.render());
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

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod link;
pub mod mirror;
pub mod observability;
pub mod pipeline;
pub mod runner;
pub mod units;

#[cfg(test)]
pub(crate) mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{ToolSpec, ToolchainConfig};
    pub use crate::core::{
        BuildEvent, Language, Route, Stage, StageResult, StageStatus, TargetStage, UnitState,
    };
    pub use crate::errors::{
        CcflowError, ConfigError, LinkFailureError, MissingObjectError, StageFailureError,
        ToolInvocationError, UsageError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::link::{LinkOptions, LinkPlan, LinkPlanner, Linkage, RuntimeObjects};
    pub use crate::mirror::MirrorRequest;
    pub use crate::pipeline::{
        BuildRequest, BuildResult, BuildStatus, FailureMode, LinkOutcome, PipelineOrchestrator,
    };
    pub use crate::runner::{ProcessInvoker, StageRunner, ToolInvocation, ToolInvoker};
    pub use crate::units::{PipelineState, SourceUnit};
}
