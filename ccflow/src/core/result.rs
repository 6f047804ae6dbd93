//! Stage result type.

use super::{Stage, StageStatus};
use crate::runner::{Termination, ToolInvocation, ToolOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Outcome of one external tool invocation.
///
/// Immutable once created. The orchestrator reads it to decide whether a
/// unit advances or halts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// The stage that ran.
    pub stage: Stage,
    /// Unit name, or the output name for the link step.
    pub subject: String,
    /// Outcome status.
    pub status: StageStatus,
    /// Exit code, absent when the process was killed.
    pub exit_code: Option<i32>,
    /// The command line that was run.
    pub command: Vec<String>,
    /// Captured standard output.
    #[serde(default)]
    pub stdout: String,
    /// Captured standard error.
    #[serde(default)]
    pub stderr: String,
    /// Produced artifact. Absent on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    /// SHA-256 of the produced artifact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// When the tool was started.
    pub started_at: DateTime<Utc>,
    /// When the tool finished.
    pub ended_at: DateTime<Utc>,
}

impl StageResult {
    /// Creates a result from a finished invocation.
    ///
    /// The artifact and digest are dropped unless the outcome is a success,
    /// so a failed result never points at a file.
    #[must_use]
    pub fn from_outcome(
        stage: Stage,
        subject: impl Into<String>,
        invocation: &ToolInvocation,
        outcome: ToolOutcome,
        artifact: Option<PathBuf>,
        digest: Option<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let status = outcome.status();
        let (artifact, digest) = if status.is_success() {
            (artifact, digest)
        } else {
            (None, None)
        };

        Self {
            stage,
            subject: subject.into(),
            status,
            exit_code: outcome.exit_code,
            command: invocation.command_line(),
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            artifact,
            digest,
            started_at,
            ended_at: Utc::now(),
        }
    }

    /// Returns true if the stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns true if the stage failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status.is_failure()
    }

    /// Returns the duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        (self.ended_at - self.started_at).num_milliseconds() as f64
    }

    /// The diagnostic text to surface for this result.
    ///
    /// Captured stderr verbatim when the tool wrote any, otherwise stdout,
    /// otherwise a one-line description of how the tool ended.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        if !self.stderr.trim().is_empty() {
            return self.stderr.trim_end().to_string();
        }
        if !self.stdout.trim().is_empty() {
            return self.stdout.trim_end().to_string();
        }

        let program = self.command.first().map_or("tool", String::as_str);
        match (self.status, self.exit_code) {
            (StageStatus::Ok, _) => String::new(),
            (StageStatus::TimedOut, _) => format!("{program} timed out and was killed"),
            (StageStatus::Cancelled, _) => format!("{program} was interrupted"),
            (StageStatus::Fail, Some(code)) => format!("{program} exited with status {code}"),
            (StageStatus::Fail, None) => format!("{program} was terminated by a signal"),
        }
    }
}

impl ToolOutcome {
    /// Maps how the tool ended onto a stage status.
    #[must_use]
    pub fn status(&self) -> StageStatus {
        match self.termination {
            Termination::Exited if self.exit_code == Some(0) => StageStatus::Ok,
            Termination::Exited => StageStatus::Fail,
            Termination::TimedOut => StageStatus::TimedOut,
            Termination::Cancelled => StageStatus::Cancelled,
        }
    }
}

/// Computes the hex SHA-256 digest of an artifact on disk.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn artifact_digest(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
