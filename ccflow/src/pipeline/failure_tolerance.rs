//! Failure handling across the units of a build.
//!
//! A failing unit always stops at its last good state. Whether its siblings
//! keep going is decided by the [`FailureMode`].

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// How to handle a unit failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Stop starting stages anywhere after the first failure. Stages
    /// already running finish.
    FailFast,
    /// Record the failure and keep driving the other units.
    #[default]
    ContinueOnFailure,
}

/// Collects failures during a build and decides when to stop.
///
/// Shared between unit workers; every method takes `&self`.
#[derive(Debug)]
pub struct FailureCollector {
    mode: FailureMode,
    halted: AtomicBool,
    failed_units: Mutex<Vec<String>>,
}

impl FailureCollector {
    /// Creates a new failure collector.
    #[must_use]
    pub fn new(mode: FailureMode) -> Self {
        Self {
            mode,
            halted: AtomicBool::new(false),
            failed_units: Mutex::new(Vec::new()),
        }
    }

    /// Records a unit failure. In fail-fast mode this halts the build.
    pub fn record_failure(&self, unit: &str) {
        self.failed_units.lock().push(unit.to_string());
        if self.mode == FailureMode::FailFast {
            self.halt();
        }
    }

    /// Stops any further stage from starting.
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    /// Returns true if no new stage may start.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Failed units, in the order they failed.
    #[must_use]
    pub fn failed_units(&self) -> Vec<String> {
        self.failed_units.lock().clone()
    }
}
