//! Core types for the compilation pipeline.
//!
//! This module provides the fundamental types used throughout ccflow:
//! - The stage graph (`Stage`, `UnitState`, `TargetStage`, `Route`)
//! - `StageStatus`: Outcome of a single tool invocation
//! - `StageResult`: Captured result of a stage
//! - `BuildEvent`: Lifecycle events for observability

mod event;
mod result;
mod stage;
mod status;

pub use event::BuildEvent;
pub use result::{artifact_digest, StageResult};
pub use stage::{stages_between, Language, Route, Stage, TargetStage, UnitState};
pub use status::StageStatus;
