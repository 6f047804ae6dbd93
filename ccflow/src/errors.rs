//! Error types for ccflow.
//!
//! The taxonomy follows the failure boundaries of the build: usage errors
//! abort before anything runs, tool and stage failures are isolated per unit,
//! and missing-object or link failures only concern the final link step.

use crate::core::{Stage, StageStatus};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Exit code for a build where every requested step succeeded.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for a build where at least one unit failed a stage.
pub const EXIT_STAGE_FAILURE: i32 = 1;
/// Exit code for malformed requests and configuration problems.
pub const EXIT_USAGE: i32 = 2;
/// Exit code for a failed link step.
pub const EXIT_LINK_FAILURE: i32 = 3;
/// Exit code for an interrupted build.
pub const EXIT_INTERRUPTED: i32 = 130;

/// The main error type for ccflow operations.
#[derive(Debug, Error)]
pub enum CcflowError {
    /// The request itself is malformed.
    #[error("{0}")]
    Usage(#[from] UsageError),

    /// An external tool could not be started.
    #[error("{0}")]
    ToolInvocation(#[from] ToolInvocationError),

    /// An external tool ran and failed.
    #[error("{0}")]
    StageFailure(#[from] StageFailureError),

    /// A link was requested before every object existed.
    #[error("{0}")]
    MissingObject(#[from] MissingObjectError),

    /// The external linker failed.
    #[error("{0}")]
    LinkFailure(#[from] LinkFailureError),

    /// Configuration could not be loaded or resolved.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The build was interrupted.
    #[error("Build interrupted: {0}")]
    Cancelled(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CcflowError {
    /// Process exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) | Self::Config(_) => EXIT_USAGE,
            Self::ToolInvocation(_) | Self::StageFailure(_) | Self::MissingObject(_) | Self::Io(_) => {
                EXIT_STAGE_FAILURE
            }
            Self::LinkFailure(_) => EXIT_LINK_FAILURE,
            Self::Cancelled(_) => EXIT_INTERRUPTED,
        }
    }

    /// Short machine-readable name of the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Usage(_) => "usage_error",
            Self::ToolInvocation(_) => "tool_invocation_error",
            Self::StageFailure(_) => "stage_failure",
            Self::MissingObject(_) => "missing_object",
            Self::LinkFailure(_) => "link_failure",
            Self::Config(_) => "config_error",
            Self::Cancelled(_) => "cancelled",
            Self::Io(_) => "io_error",
        }
    }
}

/// Error raised for a malformed request: a bad stage, a missing declared
/// file, or inconsistent options.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("usage error: {message}")]
pub struct UsageError {
    /// The error message.
    pub message: String,
}

impl UsageError {
    /// Creates a new usage error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors raised when an external tool cannot be run at all.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ToolInvocationError {
    /// The program was not found on `PATH`.
    #[error("tool not found: '{program}'")]
    NotFound {
        /// The program that was requested.
        program: String,
    },

    /// The program exists but may not be executed.
    #[error("tool not executable: '{program}'")]
    NotExecutable {
        /// The program that was requested.
        program: String,
    },

    /// Spawning or waiting on the process failed.
    #[error("failed to run '{program}': {message}")]
    Io {
        /// The program that was requested.
        program: String,
        /// The underlying error.
        message: String,
    },
}

impl ToolInvocationError {
    /// Classifies an IO error from spawning `program`.
    #[must_use]
    pub fn from_spawn(program: impl Into<String>, err: &std::io::Error) -> Self {
        let program = program.into();
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { program },
            std::io::ErrorKind::PermissionDenied => Self::NotExecutable { program },
            _ => Self::Io {
                program,
                message: err.to_string(),
            },
        }
    }

    /// The program the error refers to.
    #[must_use]
    pub fn program(&self) -> &str {
        match self {
            Self::NotFound { program } | Self::NotExecutable { program } | Self::Io { program, .. } => {
                program
            }
        }
    }
}

/// Error raised when a stage tool ran and did not succeed.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{stage} failed for unit '{unit}' ({status}):\n{diagnostic}")]
pub struct StageFailureError {
    /// The unit being built.
    pub unit: String,
    /// The stage that failed.
    pub stage: Stage,
    /// How the tool ended.
    pub status: StageStatus,
    /// The raw diagnostic text of the tool.
    pub diagnostic: String,
}

impl StageFailureError {
    /// Creates a new stage failure.
    #[must_use]
    pub fn new(
        unit: impl Into<String>,
        stage: Stage,
        status: StageStatus,
        diagnostic: impl Into<String>,
    ) -> Self {
        Self {
            unit: unit.into(),
            stage,
            status,
            diagnostic: diagnostic.into(),
        }
    }
}

/// Error raised when a link is requested before every unit has an object.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("cannot link: no object for unit(s) {}", .units.join(", "))]
pub struct MissingObjectError {
    /// Units that did not reach the object state, in declaration order.
    pub units: Vec<String>,
}

impl MissingObjectError {
    /// Creates a new missing object error.
    #[must_use]
    pub fn new(units: Vec<String>) -> Self {
        Self { units }
    }
}

/// Error raised when the external linker fails.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("link of '{output}' failed:\n{diagnostic}")]
pub struct LinkFailureError {
    /// The requested output name.
    pub output: String,
    /// The linker's exit code, absent if it was killed.
    pub exit_code: Option<i32>,
    /// The raw linker diagnostic.
    pub diagnostic: String,
    /// Symbol names the linker reported as unresolved.
    #[serde(default)]
    pub unresolved_symbols: Vec<String>,
}

/// Error raised when configuration cannot be loaded or resolved.
#[derive(Debug, Clone, Error)]
#[error("configuration error{}: {message}", file_suffix(.path.as_deref()))]
pub struct ConfigError {
    /// The configuration file involved, if any.
    pub path: Option<PathBuf>,
    /// The error message.
    pub message: String,
}

impl ConfigError {
    /// Creates a configuration error not tied to a file.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            path: None,
            message: message.into(),
        }
    }

    /// Creates a configuration error for a file.
    #[must_use]
    pub fn in_file(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            message: message.into(),
        }
    }
}

fn file_suffix(path: Option<&std::path::Path>) -> String {
    path.map(|p| format!(" in '{}'", p.display())).unwrap_or_default()
}
