//! Runs one per-unit stage.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info_span, warn, Instrument};

use crate::cancellation::CancellationToken;
use crate::config::ToolchainConfig;
use crate::core::{artifact_digest, BuildEvent, Stage, StageResult, StageStatus};
use crate::errors::{CcflowError, UsageError};
use crate::events::EventSink;
use crate::units::SourceUnit;

use super::{ToolInvocation, ToolInvoker};

/// Executes a single stage of a single unit.
///
/// The runner owns no unit state: callers hand it the unit, it checks the
/// stage applies, runs the tool, and advances the unit only on success.
#[derive(Clone)]
pub struct StageRunner {
    config: Arc<ToolchainConfig>,
    invoker: Arc<dyn ToolInvoker>,
    events: Arc<dyn EventSink>,
    cancel: Arc<CancellationToken>,
}

impl std::fmt::Debug for StageRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRunner")
            .field("out_dir", &self.config.out_dir)
            .field("invoker", &self.invoker)
            .finish_non_exhaustive()
    }
}

impl StageRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new(
        config: Arc<ToolchainConfig>,
        invoker: Arc<dyn ToolInvoker>,
        events: Arc<dyn EventSink>,
        cancel: Arc<CancellationToken>,
    ) -> Self {
        Self {
            config,
            invoker,
            events,
            cancel,
        }
    }

    /// The toolchain this runner uses.
    #[must_use]
    pub fn config(&self) -> &ToolchainConfig {
        &self.config
    }

    /// The build's cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Builds the command for `stage` on `unit`, returning it with the
    /// artifact path it will write.
    ///
    /// # Errors
    ///
    /// Returns an error if `stage` is the link step or does not start at the
    /// unit's current state.
    pub fn invocation(
        &self,
        unit: &SourceUnit,
        stage: Stage,
    ) -> Result<(ToolInvocation, PathBuf), UsageError> {
        let (input_state, _) = stage.transition().ok_or_else(|| {
            UsageError::new("the link step is not a per-unit stage; use the link planner")
        })?;

        if unit.state() != input_state {
            return Err(UsageError::new(format!(
                "cannot run {stage} on unit '{}': it is {}, not {input_state}",
                unit.name(),
                unit.state()
            )));
        }

        let input = unit.artifact(input_state).ok_or_else(|| {
            UsageError::new(format!(
                "unit '{}' has no {input_state} artifact",
                unit.name()
            ))
        })?;
        let output = unit
            .artifact_path(&self.config.out_dir, stage)
            .ok_or_else(|| UsageError::new(format!("{stage} produces no artifact")))?;

        let tool = self.config.tool_for(stage);
        let mut invocation = ToolInvocation::new(tool.program_for(unit.language())).args(&tool.args);
        if ToolchainConfig::stage_takes_cflags(stage) {
            invocation = invocation.args(&self.config.cflags);
        }
        let invocation = invocation
            .arg(input.as_os_str())
            .arg("-o")
            .arg(output.as_os_str());

        Ok((invocation, output))
    }

    /// Runs `stage` on `unit`.
    ///
    /// A tool that runs and fails is not an error: the returned result
    /// carries the failure status and the unit stays where it was.
    ///
    /// # Errors
    ///
    /// Returns a usage error if the stage does not apply to the unit or its
    /// input artifact is missing, and a tool invocation error if the tool
    /// could not be started.
    pub async fn run(&self, unit: &mut SourceUnit, stage: Stage) -> Result<StageResult, CcflowError> {
        let (invocation, output) = self.invocation(unit, stage)?;

        if let Some(input) = unit.latest_artifact() {
            if !input.is_file() {
                return Err(UsageError::new(format!(
                    "input artifact '{}' of unit '{}' no longer exists",
                    input.display(),
                    unit.name()
                ))
                .into());
            }
        }
        std::fs::create_dir_all(&self.config.out_dir)?;
        // A file left by an earlier build must not pass for this stage's output.
        match std::fs::remove_file(&output) {
            Ok(()) => debug!(path = %output.display(), "Removed stale artifact"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let span = info_span!("stage", unit = %unit.name(), stage = %stage);
        self.execute(unit, stage, invocation, output)
            .instrument(span)
            .await
    }

    async fn execute(
        &self,
        unit: &mut SourceUnit,
        stage: Stage,
        invocation: ToolInvocation,
        output: PathBuf,
    ) -> Result<StageResult, CcflowError> {
        BuildEvent::stage_started(unit.name(), stage).emit_to(self.events.as_ref());
        debug!(command = %invocation, "Running stage");

        let started_at = Utc::now();
        let outcome = match self
            .invoker
            .invoke(&invocation, self.config.timeout(), &self.cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Tool could not be started");
                BuildEvent::new("unit.stage.failed")
                    .add_data("unit", serde_json::json!(unit.name()))
                    .add_data("stage", serde_json::json!(stage.as_str()))
                    .add_data("error", serde_json::json!(e.to_string()))
                    .emit_to(self.events.as_ref());
                return Err(e.into());
            }
        };

        let digest = if outcome.status().is_success() {
            artifact_digest(&output).ok()
        } else {
            None
        };
        let mut result = StageResult::from_outcome(
            stage,
            unit.name(),
            &invocation,
            outcome,
            Some(output.clone()),
            digest,
            started_at,
        );

        if result.is_success() && result.digest.is_none() {
            // The tool claimed success without writing its artifact.
            result.status = StageStatus::Fail;
            result.artifact = None;
            if !result.stderr.is_empty() && !result.stderr.ends_with('\n') {
                result.stderr.push('\n');
            }
            result.stderr.push_str(&format!(
                "{} exited successfully but did not produce '{}'",
                invocation.program,
                output.display()
            ));
        }

        if result.is_success() {
            unit.advance(stage, output)?;
            debug!(duration_ms = result.duration_ms(), "Stage completed");
        } else {
            warn!(status = %result.status, exit_code = ?result.exit_code, "Stage failed");
        }

        BuildEvent::stage_finished(&result).emit_to(self.events.as_ref());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Language, UnitState};
    use crate::errors::ToolInvocationError;
    use crate::testing::{RunnerHarness, ScriptedInvoker, Workspace};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn args(invocation: &ToolInvocation) -> Vec<String> {
        invocation.command_line()
    }

    fn display(path: &std::path::Path) -> String {
        path.display().to_string()
    }

    #[test]
    fn test_command_shapes() {
        let ws = Workspace::new();
        let config = ws.config().with_cflag("-O2");
        let harness = RunnerHarness::new(config, ScriptedInvoker::new());
        let mut unit = SourceUnit::declare(ws.source("main.c", "int main;")).unwrap();
        let out = ws.out_dir();
        let src = display(unit.path());
        let pre = display(&out.join("main.i"));
        let asm = display(&out.join("main.s"));
        let obj = display(&out.join("main.o"));

        let (pp, pp_out) = harness.runner.invocation(&unit, Stage::Preprocess).unwrap();
        assert_eq!(args(&pp), vec!["cc", "-E", "-O2", src.as_str(), "-o", pre.as_str()]);

        let (direct, _) = harness.runner.invocation(&unit, Stage::ToObject).unwrap();
        assert_eq!(args(&direct), vec!["cc", "-c", "-O2", src.as_str(), "-o", obj.as_str()]);

        unit.advance(Stage::Preprocess, pp_out).unwrap();
        let (compile, asm_out) = harness.runner.invocation(&unit, Stage::ToAssembly).unwrap();
        assert_eq!(args(&compile), vec!["cc", "-S", "-O2", pre.as_str(), "-o", asm.as_str()]);

        unit.advance(Stage::ToAssembly, asm_out).unwrap();
        let (assemble, _) = harness.runner.invocation(&unit, Stage::Assemble).unwrap();
        assert_eq!(args(&assemble), vec!["as", asm.as_str(), "-o", obj.as_str()]);
    }

    #[test]
    fn test_cxx_units_use_cxx_driver() {
        let ws = Workspace::new();
        let harness = RunnerHarness::new(ws.config(), ScriptedInvoker::new());
        let unit = SourceUnit::declare(ws.source("shape.cpp", "struct S {};")).unwrap();
        assert_eq!(unit.language(), Language::Cxx);

        let (pp, out) = harness.runner.invocation(&unit, Stage::Preprocess).unwrap();
        assert_eq!(pp.program, "c++");
        assert!(out.ends_with("shape.ii"));
    }

    #[test]
    fn test_link_is_not_a_unit_stage() {
        let ws = Workspace::new();
        let harness = RunnerHarness::new(ws.config(), ScriptedInvoker::new());
        let unit = SourceUnit::declare(ws.source("a.c", "")).unwrap();
        assert!(harness.runner.invocation(&unit, Stage::Link).is_err());
    }

    #[tokio::test]
    async fn test_run_advances_unit() {
        let ws = Workspace::new();
        let harness = RunnerHarness::new(ws.config(), ScriptedInvoker::new());
        let mut unit = SourceUnit::declare(ws.source("a.c", "int a;")).unwrap();

        let result = harness.runner.run(&mut unit, Stage::Preprocess).await.unwrap();

        assert!(result.is_success());
        assert_eq!(unit.state(), UnitState::Preprocessed);
        assert_eq!(result.artifact.as_deref(), unit.latest_artifact());
        assert!(result.digest.is_some());
        assert_eq!(
            harness.events.event_types(),
            vec!["unit.stage.started", "unit.stage.completed"]
        );
    }

    #[tokio::test]
    async fn test_stage_precondition() {
        let ws = Workspace::new();
        let harness = RunnerHarness::new(ws.config(), ScriptedInvoker::new());
        let mut unit = SourceUnit::declare(ws.source("a.c", "")).unwrap();

        let err = harness.runner.run(&mut unit, Stage::Assemble).await.unwrap_err();
        assert!(matches!(err, CcflowError::Usage(_)));
        assert!(harness.invoker.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_stage_keeps_state_and_diagnostic() {
        let ws = Workspace::new();
        let invoker = ScriptedInvoker::new().fail_on("bad.c", 1, "bad.c:2:5: error: expected ';' before '}' token\n");
        let harness = RunnerHarness::new(ws.config(), invoker);
        let mut unit = SourceUnit::declare(ws.source("bad.c", "int x }")).unwrap();

        let result = harness.runner.run(&mut unit, Stage::Preprocess).await.unwrap();

        assert_eq!(result.status, StageStatus::Fail);
        assert_eq!(result.exit_code, Some(1));
        assert!(result.artifact.is_none());
        assert_eq!(result.diagnostic(), "bad.c:2:5: error: expected ';' before '}' token");
        assert_eq!(unit.state(), UnitState::Declared);
        assert_eq!(harness.events.events_of_type("unit.stage.failed").len(), 1);
    }

    #[tokio::test]
    async fn test_missing_tool_is_invocation_error() {
        let ws = Workspace::new();
        let harness = RunnerHarness::new(ws.config(), ScriptedInvoker::new().missing_program("as"));
        let mut unit = SourceUnit::declare(ws.source("a.c", "")).unwrap();
        harness.runner.run(&mut unit, Stage::Preprocess).await.unwrap();
        harness.runner.run(&mut unit, Stage::ToAssembly).await.unwrap();

        let err = harness.runner.run(&mut unit, Stage::Assemble).await.unwrap_err();

        assert!(matches!(
            err,
            CcflowError::ToolInvocation(ToolInvocationError::NotFound { ref program }) if program == "as"
        ));
        assert_eq!(unit.state(), UnitState::AssembledText);
    }

    #[tokio::test]
    async fn test_success_without_artifact_is_failure() {
        let ws = Workspace::new();
        let harness = RunnerHarness::new(ws.config(), ScriptedInvoker::new().respond_to("a.c", ""));
        let mut unit = SourceUnit::declare(ws.source("a.c", "")).unwrap();

        let result = harness.runner.run(&mut unit, Stage::ToObject).await.unwrap();

        assert_eq!(result.status, StageStatus::Fail);
        assert!(result.diagnostic().contains("did not produce"));
        assert_eq!(unit.state(), UnitState::Declared);
    }

    #[tokio::test]
    async fn test_stale_artifact_is_not_reused() {
        let ws = Workspace::new();
        let harness = RunnerHarness::new(ws.config(), ScriptedInvoker::new().respond_to("a.c", ""));
        let mut unit = SourceUnit::declare(ws.source("a.c", "")).unwrap();
        std::fs::create_dir_all(ws.out_dir()).unwrap();
        std::fs::write(ws.out_dir().join("a.o"), b"old object").unwrap();

        let result = harness.runner.run(&mut unit, Stage::ToObject).await.unwrap();

        assert_eq!(result.status, StageStatus::Fail);
        assert!(result.artifact.is_none());
        assert_eq!(unit.state(), UnitState::Declared);
        assert!(!ws.out_dir().join("a.o").exists());
    }

    #[tokio::test]
    async fn test_rebuild_keeps_prior_stage_artifacts() {
        let ws = Workspace::new();
        let harness = RunnerHarness::new(ws.config(), ScriptedInvoker::new());
        let mut unit = SourceUnit::declare(ws.source("a.c", "int a;")).unwrap();
        std::fs::create_dir_all(ws.out_dir()).unwrap();
        std::fs::write(ws.out_dir().join("a.i"), b"old text").unwrap();

        harness.runner.run(&mut unit, Stage::Preprocess).await.unwrap();
        harness.runner.run(&mut unit, Stage::ToAssembly).await.unwrap();

        let preprocessed = std::fs::read(ws.out_dir().join("a.i")).unwrap();
        assert!(preprocessed.starts_with(b"cc\n"));
        assert_eq!(unit.state(), UnitState::AssembledText);
    }

    #[tokio::test]
    async fn test_timeout() {
        let ws = Workspace::new();
        let config = ws.config().with_timeout(0.05);
        let harness = RunnerHarness::new(config, ScriptedInvoker::new().hang_on("slow.c"));
        let mut unit = SourceUnit::declare(ws.source("slow.c", "")).unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            harness.runner.run(&mut unit, Stage::ToObject),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(result.status, StageStatus::TimedOut);
        assert_eq!(unit.state(), UnitState::Declared);
    }

    #[tokio::test]
    async fn test_cancelled_stage() {
        let ws = Workspace::new();
        let harness = RunnerHarness::new(ws.config(), ScriptedInvoker::new().hang_on("a.c"));
        let mut unit = SourceUnit::declare(ws.source("a.c", "")).unwrap();
        harness.cancel.cancel("interrupt");

        let result = harness.runner.run(&mut unit, Stage::ToObject).await.unwrap();

        assert_eq!(result.status, StageStatus::Cancelled);
        assert!(result.status.is_interrupted());
    }
}
