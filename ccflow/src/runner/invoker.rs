//! External tool invocation.
//!
//! Everything ccflow knows about a compiler, assembler or linker goes through
//! [`ToolInvoker`]: a program, its arguments, and afterwards an exit code and
//! the captured output streams.

use crate::cancellation::CancellationToken;
use crate::errors::ToolInvocationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use tracing::debug;

/// A single external program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    /// Program name or path.
    pub program: String,
    /// Arguments, in order.
    pub args: Vec<OsString>,
}

impl ToolInvocation {
    /// Creates an invocation with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The program followed by its arguments, lossily converted for display.
    #[must_use]
    pub fn command_line(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().map(|a| a.to_string_lossy().into_owned()))
            .collect()
    }

    /// Returns true if any argument equals `needle`.
    #[must_use]
    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|a| a == needle)
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line().join(" "))
    }
}

/// How a tool process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The process exited on its own.
    Exited,
    /// The process exceeded its timeout and was killed.
    TimedOut,
    /// The build was interrupted and the process was killed.
    Cancelled,
}

/// Captured result of running a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// Exit code, absent if the process was killed or died by signal.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// How the process ended.
    pub termination: Termination,
}

impl ToolOutcome {
    /// An outcome for a process that exited with `code`.
    #[must_use]
    pub fn exited(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            stdout: stdout.into(),
            stderr: stderr.into(),
            termination: Termination::Exited,
        }
    }

    /// An outcome for a process that was killed before finishing.
    #[must_use]
    pub fn killed(termination: Termination) -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            termination,
        }
    }
}

/// Runs external tools.
#[async_trait]
pub trait ToolInvoker: Send + Sync + fmt::Debug {
    /// Runs `invocation` to completion, or until `timeout` elapses or
    /// `cancel` fires, whichever comes first.
    ///
    /// A non-zero exit is not an error: it is reported in the outcome.
    ///
    /// # Errors
    ///
    /// Returns an error only if the program could not be started or waited on.
    async fn invoke(
        &self,
        invocation: &ToolInvocation,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ToolOutcome, ToolInvocationError>;
}

/// Runs tools as child processes.
///
/// Children are killed when their timeout elapses or the build is
/// cancelled; the outcome then records how they ended instead of an exit
/// code.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessInvoker;

impl ProcessInvoker {
    /// Creates a new process invoker.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Resolves when `timeout` elapses, or never when there is none.
pub(crate) async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

#[async_trait]
impl ToolInvoker for ProcessInvoker {
    async fn invoke(
        &self,
        invocation: &ToolInvocation,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ToolOutcome, ToolInvocationError> {
        debug!(command = %invocation, "Spawning tool");

        let child = tokio::process::Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolInvocationError::from_spawn(&invocation.program, &e))?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            output = child.wait_with_output() => output,
            () = deadline(timeout) => {
                debug!(command = %invocation, "Tool timed out");
                return Ok(ToolOutcome::killed(Termination::TimedOut));
            }
            () = cancel.cancelled() => {
                debug!(command = %invocation, "Tool interrupted");
                return Ok(ToolOutcome::killed(Termination::Cancelled));
            }
        };

        let output = output.map_err(|e| ToolInvocationError::Io {
            program: invocation.program.clone(),
            message: e.to_string(),
        })?;

        Ok(ToolOutcome {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            termination: Termination::Exited,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageStatus;
    use std::sync::Arc;
    use std::time::Instant;

    fn sh(script: &str) -> ToolInvocation {
        ToolInvocation::new("sh").arg("-c").arg(script)
    }

    #[test]
    fn test_command_line_rendering() {
        let inv = ToolInvocation::new("as")
            .arg("build/a.s")
            .args(["-o", "build/a.o"]);
        assert_eq!(inv.command_line(), vec!["as", "build/a.s", "-o", "build/a.o"]);
        assert_eq!(inv.to_string(), "as build/a.s -o build/a.o");
        assert!(inv.has_arg("-o"));
        assert!(!inv.has_arg("-c"));
    }

    #[tokio::test]
    async fn test_captures_streams_and_exit_code() {
        let token = CancellationToken::new();
        let outcome = ProcessInvoker::new()
            .invoke(&sh("echo out; echo err >&2; exit 3"), None, &token)
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.stdout, "out\n");
        assert_eq!(outcome.stderr, "err\n");
        assert_eq!(outcome.status(), StageStatus::Fail);
    }

    #[tokio::test]
    async fn test_success() {
        let token = CancellationToken::new();
        let outcome = ProcessInvoker::new()
            .invoke(&sh("true"), None, &token)
            .await
            .unwrap();
        assert_eq!(outcome.status(), StageStatus::Ok);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let token = CancellationToken::new();
        let err = ProcessInvoker::new()
            .invoke(&ToolInvocation::new("ccflow-no-such-tool"), None, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolInvocationError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let token = CancellationToken::new();
        let started = Instant::now();
        let outcome = ProcessInvoker::new()
            .invoke(&sh("sleep 5"), Some(Duration::from_millis(50)), &token)
            .await
            .unwrap();

        assert_eq!(outcome.termination, Termination::TimedOut);
        assert_eq!(outcome.status(), StageStatus::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_cancellation_kills_process() {
        let token = Arc::new(CancellationToken::new());
        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                token.cancel("interrupt");
            })
        };

        let outcome = ProcessInvoker::new()
            .invoke(&sh("sleep 5"), None, &token)
            .await
            .unwrap();
        canceller.await.unwrap();

        assert_eq!(outcome.termination, Termination::Cancelled);
        assert!(outcome.exit_code.is_none());
    }
}
