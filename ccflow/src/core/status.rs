//! Stage status enum.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The outcome status of a single tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// The tool exited with status zero.
    Ok,
    /// The tool exited with a non-zero status.
    Fail,
    /// The tool exceeded its per-invocation timeout and was killed.
    TimedOut,
    /// The build was interrupted while the tool was running.
    Cancelled,
}

impl Default for StageStatus {
    fn default() -> Self {
        Self::Fail
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Fail => write!(f, "fail"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    /// Returns true if the tool did not run to completion.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::TimedOut | Self::Cancelled)
    }
}
