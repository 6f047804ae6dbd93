//! Build results and the user-facing status report.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Language, StageResult, TargetStage, UnitState};
use crate::errors::{
    LinkFailureError, EXIT_INTERRUPTED, EXIT_LINK_FAILURE, EXIT_STAGE_FAILURE, EXIT_SUCCESS,
};
use crate::units::{UnitFailure, UnitRecord};

/// Overall outcome of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    /// Every unit reached the target and the link, if requested, succeeded.
    Succeeded,
    /// At least one unit failed a stage, or the link was skipped for
    /// missing objects.
    StageFailed,
    /// The linker ran and failed.
    LinkFailed,
    /// The build was interrupted.
    Interrupted,
}

impl BuildStatus {
    /// Process exit code for this status.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Succeeded => EXIT_SUCCESS,
            Self::StageFailed => EXIT_STAGE_FAILURE,
            Self::LinkFailed => EXIT_LINK_FAILURE,
            Self::Interrupted => EXIT_INTERRUPTED,
        }
    }

    /// Short name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::StageFailed => "stage_failed",
            Self::LinkFailed => "link_failed",
            Self::Interrupted => "interrupted",
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to the link step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LinkOutcome {
    /// The build target did not include linking.
    NotRequested,
    /// The link was not attempted.
    Skipped {
        /// Why it was skipped.
        reason: String,
        /// Units without an object, if that was the reason.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        missing_units: Vec<String>,
    },
    /// The linker succeeded.
    Completed {
        /// The link result.
        result: StageResult,
    },
    /// The linker failed or could not be started.
    Failed {
        /// The link result, absent if the linker never ran.
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<StageResult>,
        /// The failure, with the linker's diagnostic verbatim.
        error: LinkFailureError,
    },
}

impl LinkOutcome {
    /// The link stage result, if the linker ran.
    #[must_use]
    pub fn result(&self) -> Option<&StageResult> {
        match self {
            Self::Completed { result } => Some(result),
            Self::Failed { result, .. } => result.as_ref(),
            Self::NotRequested | Self::Skipped { .. } => None,
        }
    }

    fn label(&self) -> String {
        match self {
            Self::NotRequested => "not requested".to_string(),
            Self::Skipped { reason, .. } => format!("skipped: {reason}"),
            Self::Completed { .. } => "ok".to_string(),
            Self::Failed { error, .. } => match error.exit_code {
                Some(code) => format!("failed (exit {code})"),
                None => "failed".to_string(),
            },
        }
    }
}

/// Final report for one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitReport {
    /// Unit name.
    pub name: String,
    /// Declared source path.
    pub source: PathBuf,
    /// Unit language.
    pub language: Language,
    /// Furthest state reached.
    pub state: UnitState,
    /// State the unit was asked to reach.
    pub target: UnitState,
    /// Every state the unit passed through.
    pub history: Vec<UnitState>,
    /// Results of the stages that ran.
    pub stages: Vec<StageResult>,
    /// The failure that stopped the unit, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<UnitFailure>,
    /// True if fail-fast or an interrupt stopped the unit before it failed
    /// or finished.
    #[serde(default)]
    pub halted: bool,
}

impl UnitReport {
    pub(crate) fn from_record(record: &UnitRecord, target: UnitState) -> Self {
        Self {
            name: record.unit.name().to_string(),
            source: record.unit.path().to_path_buf(),
            language: record.unit.language(),
            state: record.unit.state(),
            target,
            history: record.unit.history().to_vec(),
            stages: record.results.clone(),
            failure: record.failure.clone(),
            halted: record.halted,
        }
    }

    /// Returns true if the unit reached its target.
    #[must_use]
    pub fn reached_target(&self) -> bool {
        self.state >= self.target
    }

    fn label(&self) -> String {
        match &self.failure {
            Some(UnitFailure::Stage(e)) if e.status.is_interrupted() => {
                format!("{} at {}", e.status, e.stage)
            }
            Some(UnitFailure::Stage(e)) => {
                let code = self
                    .stages
                    .last()
                    .and_then(|r| r.exit_code)
                    .map(|c| format!(" (exit {c})"))
                    .unwrap_or_default();
                format!("failed at {}{code}", e.stage)
            }
            Some(UnitFailure::ToolInvocation(e)) => format!("tool error: {e}"),
            None if self.reached_target() => "ok".to_string(),
            None if self.halted => "not started".to_string(),
            None => "incomplete".to_string(),
        }
    }
}

/// Outcome of a whole build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResult {
    /// Unique id of this build.
    pub build_id: String,
    /// The requested target.
    pub target: TargetStage,
    /// Overall status.
    pub status: BuildStatus,
    /// Per-unit reports, in declaration order.
    pub units: Vec<UnitReport>,
    /// Requested executable path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    /// Link outcome.
    pub link: LinkOutcome,
    /// When the build started.
    pub started_at: DateTime<Utc>,
    /// Build duration in milliseconds.
    pub duration_ms: f64,
}

impl BuildResult {
    /// Process exit code for this build.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    /// Returns true if the build succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == BuildStatus::Succeeded
    }

    /// Looks up a unit report by name.
    #[must_use]
    pub fn unit(&self, name: &str) -> Option<&UnitReport> {
        self.units.iter().find(|u| u.name == name)
    }

    /// The produced executable. Only set when the link succeeded.
    #[must_use]
    pub fn executable(&self) -> Option<&Path> {
        match &self.link {
            LinkOutcome::Completed { result } => result.artifact.as_deref(),
            _ => None,
        }
    }

    /// Serializes the result as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Renders the per-unit status table followed by the raw diagnostic of
    /// every failing tool.
    #[must_use]
    pub fn render(&self) -> String {
        let mut rows: Vec<[String; 4]> = vec![[
            "UNIT".to_string(),
            "SOURCE".to_string(),
            "STATE".to_string(),
            "RESULT".to_string(),
        ]];
        for unit in &self.units {
            rows.push([
                unit.name.clone(),
                unit.source.display().to_string(),
                unit.state.to_string(),
                unit.label(),
            ]);
        }
        if !matches!(self.link, LinkOutcome::NotRequested) {
            rows.push([
                "(link)".to_string(),
                self.output
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
                String::new(),
                self.link.label(),
            ]);
        }

        let mut widths = [0usize; 3];
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row.iter()) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let mut out = String::new();
        for row in &rows {
            let _ = writeln!(
                out,
                "{:<w0$}  {:<w1$}  {:<w2$}  {}",
                row[0],
                row[1],
                row[2],
                row[3],
                w0 = widths[0],
                w1 = widths[1],
                w2 = widths[2],
            );
        }

        for unit in &self.units {
            if let Some(failure) = &unit.failure {
                let heading = match failure {
                    UnitFailure::Stage(e) => format!("{} ({})", unit.name, e.stage),
                    UnitFailure::ToolInvocation(_) => unit.name.clone(),
                };
                let _ = write!(out, "\n--- {heading} ---\n{}\n", failure.diagnostic());
            }
        }
        if let LinkOutcome::Failed { error, .. } = &self.link {
            let _ = write!(out, "\n--- link ---\n{}\n", error.diagnostic);
            if !error.unresolved_symbols.is_empty() {
                let _ = writeln!(out, "unresolved symbols: {}", error.unresolved_symbols.join(", "));
            }
        }

        let _ = write!(
            out,
            "\nbuild {}: {} in {:.0} ms\n",
            self.build_id, self.status, self.duration_ms
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Stage, StageStatus};
    use crate::errors::StageFailureError;

    fn report(name: &str, state: UnitState, failure: Option<UnitFailure>) -> UnitReport {
        UnitReport {
            name: name.to_string(),
            source: PathBuf::from(format!("src/{name}.c")),
            language: Language::C,
            state,
            target: UnitState::Object,
            history: vec![UnitState::Declared],
            stages: Vec::new(),
            failure,
            halted: false,
        }
    }

    fn result(units: Vec<UnitReport>, link: LinkOutcome, status: BuildStatus) -> BuildResult {
        BuildResult {
            build_id: "build-1".to_string(),
            target: TargetStage::Link,
            status,
            units,
            output: Some(PathBuf::from("app")),
            link,
            started_at: Utc::now(),
            duration_ms: 12.0,
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(BuildStatus::Succeeded.exit_code(), 0);
        assert_eq!(BuildStatus::StageFailed.exit_code(), 1);
        assert_eq!(BuildStatus::LinkFailed.exit_code(), 3);
        assert_eq!(BuildStatus::Interrupted.exit_code(), 130);
    }

    #[test]
    fn test_render_includes_raw_diagnostics() {
        let diagnostic = "b.s: Assembler messages:\nb.s:4: Error: no such instruction: `movq %rax'";
        let failure = UnitFailure::Stage(StageFailureError::new(
            "b",
            Stage::Assemble,
            StageStatus::Fail,
            diagnostic,
        ));
        let build = result(
            vec![
                report("a", UnitState::Object, None),
                report("b", UnitState::AssembledText, Some(failure)),
            ],
            LinkOutcome::Skipped {
                reason: "cannot link: no object for unit(s) b".to_string(),
                missing_units: vec!["b".to_string()],
            },
            BuildStatus::StageFailed,
        );

        let text = build.render();

        assert!(text.contains("assembled(text)"));
        assert!(text.contains("failed at assemble"));
        assert!(text.contains("skipped: cannot link: no object for unit(s) b"));
        assert!(text.contains(diagnostic));
        assert!(text.contains("build build-1: stage_failed"));
        assert!(build.executable().is_none());
    }

    #[test]
    fn test_render_link_failure() {
        let build = result(
            vec![report("a", UnitState::Object, None)],
            LinkOutcome::Failed {
                result: None,
                error: LinkFailureError {
                    output: "app".to_string(),
                    exit_code: Some(1),
                    diagnostic: "ld: undefined reference to `f'".to_string(),
                    unresolved_symbols: vec!["f".to_string()],
                },
            },
            BuildStatus::LinkFailed,
        );

        let text = build.render();
        assert!(text.contains("failed (exit 1)"));
        assert!(text.contains("--- link ---\nld: undefined reference to `f'"));
        assert!(text.contains("unresolved symbols: f"));
    }

    #[test]
    fn test_json_round_trip() {
        let build = result(
            vec![report("a", UnitState::Object, None)],
            LinkOutcome::NotRequested,
            BuildStatus::Succeeded,
        );
        let json = build.to_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["status"], "succeeded");
        assert_eq!(parsed["link"]["outcome"], "not_requested");
        assert_eq!(parsed["units"][0]["state"], "object");
    }
}
