//! Testing utilities for builds.
//!
//! This module provides:
//! - A scripted tool invoker that never spawns processes
//! - Scratch workspaces and a stage runner harness

mod fixtures;
mod mocks;

pub use fixtures::{RunnerHarness, Workspace};
pub use mocks::ScriptedInvoker;
