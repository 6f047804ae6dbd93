//! Drives every unit of a build to its target and links the result.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, info, info_span, warn, Instrument};

use super::{BuildResult, BuildStatus, FailureCollector, FailureMode, LinkOutcome, UnitReport};
use crate::cancellation::CancellationToken;
use crate::config::ToolchainConfig;
use crate::core::{stages_between, BuildEvent, Route, Stage, TargetStage, UnitState};
use crate::errors::{CcflowError, LinkFailureError, StageFailureError, UsageError};
use crate::events::EventSink;
use crate::link::{unresolved_symbols, LinkOptions, LinkPlanner, Linkage};
use crate::runner::{StageRunner, ToolInvoker};
use crate::units::{PipelineState, SourceUnit, UnitFailure, UnitRecord};

/// What to build.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildRequest {
    /// Source files, in declaration order.
    pub sources: Vec<PathBuf>,
    /// The stage every unit is driven to.
    pub target: TargetStage,
    /// Staged or direct route to objects.
    pub route: Route,
    /// Executable path, required when the target is `link`.
    pub output: Option<PathBuf>,
    /// How to link.
    pub link: LinkOptions,
    /// What a unit failure does to the rest of the build.
    pub failure_mode: FailureMode,
}

impl BuildRequest {
    /// Creates a request with default options.
    #[must_use]
    pub fn new(sources: Vec<PathBuf>, target: TargetStage) -> Self {
        Self {
            sources,
            target,
            route: Route::default(),
            output: None,
            link: LinkOptions::default(),
            failure_mode: FailureMode::default(),
        }
    }

    /// Sets the executable path.
    #[must_use]
    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Sets the route to objects.
    #[must_use]
    pub fn with_route(mut self, route: Route) -> Self {
        self.route = route;
        self
    }

    /// Sets the link options.
    #[must_use]
    pub fn with_link_options(mut self, link: LinkOptions) -> Self {
        self.link = link;
        self
    }

    /// Sets the failure mode.
    #[must_use]
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Enables fail-fast.
    #[must_use]
    pub fn fail_fast(self) -> Self {
        self.with_failure_mode(FailureMode::FailFast)
    }

    fn validate(&self) -> Result<(), UsageError> {
        if self.sources.is_empty() {
            return Err(UsageError::new("no source files declared"));
        }
        if self.target.is_link() {
            match &self.output {
                Some(output) if !output.as_os_str().is_empty() => {}
                _ => return Err(UsageError::new("the link stage requires an output name (-o)")),
            }
            if self.link.linkage == Linkage::Dynamic
                && self.link.dynamic_linker.as_os_str().is_empty()
            {
                return Err(UsageError::new(
                    "dynamically linked output requires a dynamic linker path",
                ));
            }
        }
        Ok(())
    }
}

/// Sequences stage runs per unit and hands the objects to the link planner.
pub struct PipelineOrchestrator {
    config: Arc<ToolchainConfig>,
    events: Arc<dyn EventSink>,
    cancel: Arc<CancellationToken>,
    runner: StageRunner,
    planner: LinkPlanner,
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("jobs", &self.config.jobs)
            .field("runner", &self.runner)
            .field("planner", &self.planner)
            .finish_non_exhaustive()
    }
}

impl PipelineOrchestrator {
    /// Creates an orchestrator. Every collaborator is passed in; nothing is
    /// read from global state.
    #[must_use]
    pub fn new(
        config: ToolchainConfig,
        invoker: Arc<dyn ToolInvoker>,
        events: Arc<dyn EventSink>,
        cancel: Arc<CancellationToken>,
    ) -> Self {
        let config = Arc::new(config);
        let runner = StageRunner::new(config.clone(), invoker.clone(), events.clone(), cancel.clone());
        let planner = LinkPlanner::new(config.clone(), invoker, events.clone(), cancel.clone());
        Self {
            config,
            events,
            cancel,
            runner,
            planner,
        }
    }

    /// The token that interrupts this orchestrator's builds.
    #[must_use]
    pub fn cancel_token(&self) -> Arc<CancellationToken> {
        self.cancel.clone()
    }

    /// Runs a build.
    ///
    /// Unit and link failures are part of the returned result, not errors.
    ///
    /// # Errors
    ///
    /// Returns a usage error for malformed requests (checked before any tool
    /// runs), a configuration error for an invalid toolchain configuration or
    /// if runtime objects cannot be located,
    /// and an I/O error if the output directory cannot be created.
    pub async fn build(&self, request: &BuildRequest) -> Result<BuildResult, CcflowError> {
        self.config.validate()?;
        request.validate()?;

        let mut state = PipelineState::new();
        for source in &request.sources {
            state.declare(SourceUnit::declare(source)?)?;
        }

        let link_options = if request.target.is_link() {
            Some(self.planner.resolve(&request.link).await?)
        } else {
            None
        };

        let build_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("build", build_id = %build_id, target = %request.target);
        self.run_build(request, state, link_options, build_id)
            .instrument(span)
            .await
    }

    async fn run_build(
        &self,
        request: &BuildRequest,
        mut state: PipelineState,
        link_options: Option<LinkOptions>,
        build_id: String,
    ) -> Result<BuildResult, CcflowError> {
        let started_at = Utc::now();
        let clock = Instant::now();
        BuildEvent::build_started(&build_id, state.len(), &request.target.to_string())
            .emit_to(self.events.as_ref());
        info!(units = state.len(), jobs = self.config.jobs, "Build started");

        let collector = Arc::new(FailureCollector::new(request.failure_mode));
        let target_state = request.target.required_state();

        let records = state.take_records();
        let records = if self.config.jobs <= 1 {
            self.drive_sequential(records, request.route, target_state, &collector)
                .await?
        } else {
            self.drive_parallel(records, request.route, target_state, &collector)
                .await?
        };
        // Join barrier: every unit has been driven as far as it goes.
        state.restore_records(records);

        let interrupted = self.cancel.is_cancelled();
        let link = match (&request.output, link_options) {
            (Some(output), Some(options)) => {
                self.link(&state, output.clone(), &options, interrupted).await?
            }
            _ => LinkOutcome::NotRequested,
        };

        let any_unit_failed = state
            .records()
            .iter()
            .any(|r| r.is_failed() || r.unit.state() < target_state);
        // An interrupt that lands during the link still reports as one.
        let status = if interrupted || self.cancel.is_cancelled() {
            BuildStatus::Interrupted
        } else if matches!(link, LinkOutcome::Failed { .. }) {
            BuildStatus::LinkFailed
        } else if any_unit_failed || matches!(link, LinkOutcome::Skipped { .. }) {
            BuildStatus::StageFailed
        } else {
            BuildStatus::Succeeded
        };

        let duration_ms = clock.elapsed().as_secs_f64() * 1000.0;
        BuildEvent::build_completed(&build_id, status.as_str(), duration_ms)
            .emit_to(self.events.as_ref());
        if status == BuildStatus::Succeeded {
            info!(duration_ms, "Build succeeded");
        } else {
            warn!(status = %status, failed = ?collector.failed_units(), "Build did not succeed");
        }

        Ok(BuildResult {
            build_id,
            target: request.target,
            status,
            units: state
                .records()
                .iter()
                .map(|r| UnitReport::from_record(r, target_state))
                .collect(),
            output: request.output.clone().filter(|_| request.target.is_link()),
            link,
            started_at,
            duration_ms,
        })
    }

    async fn drive_sequential(
        &self,
        mut records: Vec<UnitRecord>,
        route: Route,
        target: UnitState,
        collector: &FailureCollector,
    ) -> Result<Vec<UnitRecord>, CcflowError> {
        for record in &mut records {
            let stages = stages_between(record.unit.state(), target, route);
            drive_unit(&self.runner, record, &stages, collector).await?;
        }
        Ok(records)
    }

    async fn drive_parallel(
        &self,
        records: Vec<UnitRecord>,
        route: Route,
        target: UnitState,
        collector: &Arc<FailureCollector>,
    ) -> Result<Vec<UnitRecord>, CcflowError> {
        let permits = Arc::new(Semaphore::new(self.config.jobs));
        let total = records.len();
        let mut tasks = FuturesUnordered::new();

        for (index, mut record) in records.into_iter().enumerate() {
            let runner = self.runner.clone();
            let collector = collector.clone();
            let permits = permits.clone();
            let stages = stages_between(record.unit.state(), target, route);

            tasks.push(tokio::spawn(async move {
                // The semaphore is never closed.
                let _permit = permits.acquire_owned().await.ok();
                let outcome = drive_unit(&runner, &mut record, &stages, &collector).await;
                (index, record, outcome)
            }));
        }

        let mut slots: Vec<Option<UnitRecord>> = (0..total).map(|_| None).collect();
        let mut first_error = None;
        while let Some(joined) = tasks.next().await {
            match joined {
                Ok((index, record, outcome)) => {
                    if let Err(e) = outcome {
                        // Fatal errors stop every other unit before the barrier.
                        collector.halt();
                        first_error.get_or_insert(e);
                    }
                    slots[index] = Some(record);
                }
                Err(e) => {
                    collector.halt();
                    first_error.get_or_insert(CcflowError::Io(std::io::Error::other(format!(
                        "unit worker failed: {e}"
                    ))));
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        Ok(slots.into_iter().flatten().collect())
    }

    async fn link(
        &self,
        state: &PipelineState,
        output: PathBuf,
        options: &LinkOptions,
        interrupted: bool,
    ) -> Result<LinkOutcome, CcflowError> {
        if interrupted {
            let reason = match self.cancel.reason() {
                Some(cause) => format!("build interrupted: {cause}"),
                None => "build interrupted".to_string(),
            };
            BuildEvent::link_skipped(&reason).emit_to(self.events.as_ref());
            return Ok(LinkOutcome::Skipped {
                reason,
                missing_units: state.units_below(UnitState::Object),
            });
        }

        let plan = match self.planner.plan(state, &output, options) {
            Ok(plan) => plan,
            Err(CcflowError::MissingObject(e)) => {
                let reason = e.to_string();
                warn!(units = ?e.units, "Skipping link");
                BuildEvent::link_skipped(&reason).emit_to(self.events.as_ref());
                return Ok(LinkOutcome::Skipped {
                    reason,
                    missing_units: e.units,
                });
            }
            Err(e) => return Err(e),
        };

        let subject = output.display().to_string();
        match self.planner.execute(&plan).await {
            Ok(result) if result.is_success() => Ok(LinkOutcome::Completed { result }),
            Ok(result) => {
                let diagnostic = result.diagnostic();
                let error = LinkFailureError {
                    output: subject,
                    exit_code: result.exit_code,
                    unresolved_symbols: unresolved_symbols(&diagnostic),
                    diagnostic,
                };
                Ok(LinkOutcome::Failed {
                    result: Some(result),
                    error,
                })
            }
            Err(CcflowError::ToolInvocation(e)) => {
                warn!(error = %e, "Linker could not be started");
                Ok(LinkOutcome::Failed {
                    result: None,
                    error: LinkFailureError {
                        output: subject,
                        exit_code: None,
                        diagnostic: e.to_string(),
                        unresolved_symbols: Vec::new(),
                    },
                })
            }
            Err(e) => Err(e),
        }
    }
}

/// Drives one unit through `stages`, stopping at its first failure.
///
/// Tool failures are recorded on the unit; only fatal errors (usage or I/O)
/// are returned.
async fn drive_unit(
    runner: &StageRunner,
    record: &mut UnitRecord,
    stages: &[Stage],
    collector: &FailureCollector,
) -> Result<(), CcflowError> {
    for &stage in stages {
        if collector.should_stop() || runner.cancel_token().is_cancelled() {
            debug!(unit = %record.unit.name(), stage = %stage, "Not starting stage");
            record.halted = true;
            break;
        }

        match runner.run(&mut record.unit, stage).await {
            Ok(result) if result.is_success() => record.results.push(result),
            Ok(result) => {
                record.failure = Some(UnitFailure::Stage(StageFailureError::new(
                    record.unit.name(),
                    stage,
                    result.status,
                    result.diagnostic(),
                )));
                record.results.push(result);
                collector.record_failure(record.unit.name());
                break;
            }
            Err(CcflowError::ToolInvocation(e)) => {
                record.failure = Some(UnitFailure::ToolInvocation(e));
                collector.record_failure(record.unit.name());
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
