//! Build orchestration.
//!
//! This module provides:
//! - The pipeline orchestrator and its build request
//! - Failure tolerance modes
//! - Build results and the status report

mod failure_tolerance;
mod orchestrator;
mod result;

pub use failure_tolerance::{FailureCollector, FailureMode};
pub use orchestrator::{BuildRequest, PipelineOrchestrator};
pub use result::{BuildResult, BuildStatus, LinkOutcome, UnitReport};
