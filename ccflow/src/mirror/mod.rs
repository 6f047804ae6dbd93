//! Recursive site mirroring through `wget`.
//!
//! This is an invocation wrapper only: arguments are validated and rendered,
//! then handed to the same [`ToolInvoker`] the build stages use. Retries and
//! caching are left to the tool.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cancellation::CancellationToken;
use crate::errors::{CcflowError, UsageError};
use crate::runner::{Termination, ToolInvocation, ToolInvoker, ToolOutcome};

/// Default mirroring tool.
pub const DEFAULT_MIRROR_PROGRAM: &str = "wget";

/// Parameters for one mirroring run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorRequest {
    /// Start URL.
    pub url: String,
    /// Directory the mirror is written under.
    pub out_dir: PathBuf,
    /// Recursion depth; `0` means unlimited.
    pub depth: u32,
    /// File extensions to keep. Empty keeps everything.
    pub accept: Vec<String>,
    /// The program to run.
    pub program: String,
}

impl MirrorRequest {
    /// Creates a request with depth 1 and no extension filter.
    #[must_use]
    pub fn new(url: impl Into<String>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            out_dir: out_dir.into(),
            depth: 1,
            accept: Vec::new(),
            program: DEFAULT_MIRROR_PROGRAM.to_string(),
        }
    }

    /// Sets the recursion depth.
    #[must_use]
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// Adds accepted extensions. Leading dots are dropped.
    #[must_use]
    pub fn with_accept<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.accept.extend(
            extensions
                .into_iter()
                .map(|e| e.as_ref().trim().trim_start_matches('.').to_string()),
        );
        self
    }

    /// Sets the program to run instead of `wget`.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Checks the request.
    ///
    /// # Errors
    ///
    /// Returns a usage error for a non-HTTP(S)/FTP URL, an empty output
    /// directory or program, or an empty or comma-bearing extension.
    pub fn validate(&self) -> Result<(), UsageError> {
        let scheme_ok = ["http://", "https://", "ftp://"]
            .iter()
            .any(|scheme| self.url.starts_with(scheme) && self.url.len() > scheme.len());
        if !scheme_ok {
            return Err(UsageError::new(format!(
                "mirror URL must be http, https or ftp: '{}'",
                self.url
            )));
        }
        if self.out_dir.as_os_str().is_empty() {
            return Err(UsageError::new("mirror output directory is empty"));
        }
        if self.program.trim().is_empty() {
            return Err(UsageError::new("mirror program is empty"));
        }
        if let Some(bad) = self.accept.iter().find(|e| e.is_empty() || e.contains(',')) {
            return Err(UsageError::new(format!("invalid accepted extension '{bad}'")));
        }
        Ok(())
    }

    /// Renders the tool invocation.
    ///
    /// # Errors
    ///
    /// Returns a usage error if the request does not validate.
    pub fn invocation(&self) -> Result<ToolInvocation, UsageError> {
        self.validate()?;

        let level = if self.depth == 0 {
            "inf".to_string()
        } else {
            self.depth.to_string()
        };
        let mut invocation = ToolInvocation::new(&self.program)
            .args(["--recursive", "--level"])
            .arg(level)
            .args(["--convert-links", "--page-requisites", "--no-parent"])
            .arg("--directory-prefix")
            .arg(self.out_dir.as_os_str());
        if !self.accept.is_empty() {
            invocation = invocation.arg("--accept").arg(self.accept.join(","));
        }
        Ok(invocation.arg(&self.url))
    }

    /// Runs the mirror. The outcome carries the tool's exit code unchanged;
    /// a timed-out run has none.
    ///
    /// # Errors
    ///
    /// Returns a usage error for an invalid request, a tool invocation
    /// error if the program cannot be started, and a cancellation error if
    /// the run was interrupted.
    pub async fn run(
        &self,
        invoker: &dyn ToolInvoker,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ToolOutcome, CcflowError> {
        let invocation = self.invocation()?;
        info!(url = %self.url, out_dir = %self.out_dir.display(), depth = self.depth, "Mirroring");

        let outcome = invoker.invoke(&invocation, timeout, cancel).await?;
        if outcome.termination == Termination::Cancelled {
            let reason = cancel.reason().unwrap_or_else(|| "cancelled".to_string());
            warn!(reason = %reason, "Mirror interrupted");
            return Err(CcflowError::Cancelled(reason));
        }
        if outcome.exit_code != Some(0) {
            warn!(exit_code = ?outcome.exit_code, termination = ?outcome.termination, "Mirror tool failed");
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EXIT_INTERRUPTED;
    use crate::testing::ScriptedInvoker;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_invocation_shape() {
        let request = MirrorRequest::new("https://example.org/docs/", "site")
            .with_depth(3)
            .with_accept([".html", "css"]);

        let invocation = request.invocation().unwrap();

        assert_eq!(
            invocation.command_line(),
            vec![
                "wget",
                "--recursive",
                "--level",
                "3",
                "--convert-links",
                "--page-requisites",
                "--no-parent",
                "--directory-prefix",
                "site",
                "--accept",
                "html,css",
                "https://example.org/docs/",
            ]
        );
    }

    #[test]
    fn test_unlimited_depth_without_filter() {
        let invocation = MirrorRequest::new("http://example.org", "out")
            .with_depth(0)
            .invocation()
            .unwrap();

        assert!(invocation.has_arg("inf"));
        assert!(!invocation.has_arg("--accept"));
    }

    #[test]
    fn test_rejects_bad_requests() {
        assert!(MirrorRequest::new("example.org", "out").validate().is_err());
        assert!(MirrorRequest::new("https://", "out").validate().is_err());
        assert!(MirrorRequest::new("https://example.org", "").validate().is_err());
        assert!(MirrorRequest::new("https://example.org", "out")
            .with_accept(["a,b"])
            .validate()
            .is_err());
        assert!(MirrorRequest::new("https://example.org", "out")
            .with_program(" ")
            .validate()
            .is_err());
    }

    #[tokio::test]
    async fn test_run_passes_exit_code_through() {
        let invoker = ScriptedInvoker::new().fail_on("example.org", 8, "Server issued an error response.\n");
        let cancel = CancellationToken::new();

        let outcome = MirrorRequest::new("https://example.org", "out")
            .run(&invoker, None, &cancel)
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, Some(8));
        assert_eq!(outcome.termination, Termination::Exited);
        assert_eq!(invoker.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_run_missing_tool() {
        let invoker = ScriptedInvoker::new().missing_program("wget");
        let cancel = CancellationToken::new();

        let err = MirrorRequest::new("https://example.org", "out")
            .run(&invoker, None, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, CcflowError::ToolInvocation(_)));
    }

    #[tokio::test]
    async fn test_interrupted_run_is_cancelled() {
        let invoker = ScriptedInvoker::new().hang_on("example.org");
        let cancel = CancellationToken::new();
        cancel.cancel("interrupted by user");

        let err = MirrorRequest::new("https://example.org", "out")
            .run(&invoker, None, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, CcflowError::Cancelled(ref reason) if reason == "interrupted by user"));
        assert_eq!(err.exit_code(), EXIT_INTERRUPTED);
    }

    #[tokio::test]
    async fn test_invalid_request_runs_nothing() {
        let invoker = ScriptedInvoker::new();
        let cancel = CancellationToken::new();

        let err = MirrorRequest::new("file:///etc", "out")
            .run(&invoker, None, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, CcflowError::Usage(_)));
        assert!(invoker.calls().is_empty());
    }
}
