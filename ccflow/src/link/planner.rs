//! Plans and runs the final link.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use chrono::Utc;
use regex::Regex;
use tracing::{debug, info, info_span, warn, Instrument};

use super::{LinkOptions, LinkPlan, RuntimeObjects, UnitObject};
use crate::cancellation::CancellationToken;
use crate::config::ToolchainConfig;
use crate::core::{artifact_digest, BuildEvent, Stage, StageResult, UnitState};
use crate::errors::{CcflowError, ConfigError, MissingObjectError, UsageError};
use crate::events::EventSink;
use crate::runner::{ToolInvocation, ToolInvoker};
use crate::units::PipelineState;

/// Turns a finished unit table into an executable.
#[derive(Clone)]
pub struct LinkPlanner {
    config: Arc<ToolchainConfig>,
    invoker: Arc<dyn ToolInvoker>,
    events: Arc<dyn EventSink>,
    cancel: Arc<CancellationToken>,
}

impl std::fmt::Debug for LinkPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkPlanner")
            .field("linker", &self.config.linker.program)
            .field("driver", &self.config.driver.program)
            .finish_non_exhaustive()
    }
}

impl LinkPlanner {
    /// Creates a planner.
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

    /// Replaces discover mode with the runtime objects the compiler driver
    /// reports. Other modes are returned unchanged.
    ///
    /// Directories holding the discovered objects are added to the library
    /// search path.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the driver cannot locate one of the
    /// objects, and a tool invocation error if the driver cannot be run.
    pub async fn resolve(&self, options: &LinkOptions) -> Result<LinkOptions, CcflowError> {
        if options.runtime != RuntimeObjects::Discover {
            return Ok(options.clone());
        }

        let (start_names, end_names) = RuntimeObjects::discovery_set(options.linkage);
        let mut start = Vec::with_capacity(start_names.len());
        for name in start_names {
            start.push(self.locate(name).await?);
        }
        let mut end = Vec::with_capacity(end_names.len());
        for name in end_names {
            end.push(self.locate(name).await?);
        }

        let mut resolved = options.clone();
        for dir in start.iter().chain(&end).filter_map(|p| p.parent()) {
            if !resolved.search_dirs.iter().any(|d| d == dir) {
                resolved.search_dirs.push(dir.to_path_buf());
            }
        }
        info!(start = ?start, end = ?end, "Resolved runtime objects");
        resolved.runtime = RuntimeObjects::Explicit { start, end };
        Ok(resolved)
    }

    async fn locate(&self, name: &str) -> Result<PathBuf, CcflowError> {
        let invocation = ToolInvocation::new(&self.config.driver.program)
            .args(&self.config.driver.args)
            .arg(format!("-print-file-name={name}"));
        debug!(command = %invocation, "Locating runtime object");

        let outcome = self
            .invoker
            .invoke(&invocation, self.config.timeout(), &self.cancel)
            .await?;
        if !outcome.status().is_success() {
            return Err(ConfigError::new(format!(
                "'{invocation}' failed while locating {name}: {}",
                outcome.stderr.trim()
            ))
            .into());
        }

        // Drivers echo the bare name back when they cannot find the file.
        let path = PathBuf::from(outcome.stdout.trim());
        if path.is_absolute() && path.is_file() {
            Ok(path)
        } else {
            Err(ConfigError::new(format!(
                "{} cannot locate runtime object {name}; list it with --runtime explicit",
                self.config.driver.program
            ))
            .into())
        }
    }

    /// Plans the link of every declared unit, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns a missing-object error naming every unit without an object,
    /// or a usage error if the options are not plannable.
    pub fn plan(
        &self,
        state: &PipelineState,
        output: impl Into<PathBuf>,
        options: &LinkOptions,
    ) -> Result<LinkPlan, CcflowError> {
        let missing = state.units_below(UnitState::Object);
        if !missing.is_empty() {
            return Err(MissingObjectError::new(missing).into());
        }

        let mut objects = Vec::with_capacity(state.len());
        for record in state.records() {
            let path = record.unit.object().ok_or_else(|| {
                MissingObjectError::new(vec![record.unit.name().to_string()])
            })?;
            objects.push(UnitObject {
                name: record.unit.name().to_string(),
                path: path.to_path_buf(),
                language: record.unit.language(),
            });
        }

        Ok(LinkPlan::compose(&self.config, objects, output, options)?)
    }

    /// Runs the linker for `plan`.
    ///
    /// A linker that runs and fails is not an error: the result carries the
    /// failure and its diagnostic verbatim. On failure the result never
    /// names an executable, even if the linker left a file behind.
    ///
    /// # Errors
    ///
    /// Returns an error if the linker cannot be started or the output
    /// directory cannot be created.
    pub async fn execute(&self, plan: &LinkPlan) -> Result<StageResult, CcflowError> {
        if !plan.is_ordered() {
            return Err(UsageError::new("link inputs are out of order").into());
        }

        let output = plan.output();
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let span = info_span!("link", output = %output.display());
        self.run_linker(plan, output).instrument(span).await
    }

    async fn run_linker(&self, plan: &LinkPlan, output: &Path) -> Result<StageResult, CcflowError> {
        let invocation = plan.to_invocation();
        let subject = output.display().to_string();
        BuildEvent::link_started(&subject, plan.inputs().len()).emit_to(self.events.as_ref());
        info!(units = plan.unit_names().len(), "Linking");
        debug!(command = %invocation, "Running linker");

        let started_at = Utc::now();
        let outcome = self
            .invoker
            .invoke(&invocation, self.config.timeout(), &self.cancel)
            .await?;
        let digest = if outcome.status().is_success() {
            artifact_digest(output).ok()
        } else {
            None
        };

        let result = StageResult::from_outcome(
            Stage::Link,
            subject,
            &invocation,
            outcome,
            Some(output.to_path_buf()),
            digest,
            started_at,
        );

        if result.is_success() {
            info!(duration_ms = result.duration_ms(), "Link completed");
        } else {
            warn!(status = %result.status, exit_code = ?result.exit_code, "Link failed");
        }
        BuildEvent::link_finished(&result).emit_to(self.events.as_ref());
        Ok(result)
    }
}

fn unresolved_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // GNU ld
            r"undefined reference to [`']([^'`]+)'",
            // lld
            r"undefined symbol: (\S+)",
            // ld64
            r#""([^"]+)", referenced from:"#,
        ]
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
    })
}

/// Extracts unresolved symbol names from a linker diagnostic, in order of
/// first appearance.
#[must_use]
pub fn unresolved_symbols(diagnostic: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    for line in diagnostic.lines() {
        for pattern in unresolved_patterns() {
            for captures in pattern.captures_iter(line) {
                if let Some(symbol) = captures.get(1) {
                    let symbol = symbol.as_str();
                    if !symbols.iter().any(|s| s == symbol) {
                        symbols.push(symbol.to_string());
                    }
                }
            }
        }
    }
    symbols
}
