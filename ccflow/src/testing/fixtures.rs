//! Test fixtures for build tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use crate::cancellation::CancellationToken;
use crate::config::ToolchainConfig;
use crate::events::CollectingEventSink;
use crate::runner::StageRunner;
use crate::testing::ScriptedInvoker;

/// A scratch directory holding sources and a build directory.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Creates an empty workspace.
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp dir"),
        }
    }

    /// The workspace root.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Where artifacts go.
    pub fn out_dir(&self) -> PathBuf {
        self.dir.path().join("build")
    }

    /// Writes a source file and returns its path.
    pub fn source(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create source dir");
        }
        std::fs::write(&path, contents).expect("write source");
        path
    }

    /// A configuration writing into this workspace's build directory.
    pub fn config(&self) -> ToolchainConfig {
        ToolchainConfig::default().with_out_dir(self.out_dir())
    }
}

/// Everything a stage runner test needs, with handles kept for assertions.
pub struct RunnerHarness {
    /// The runner under test.
    pub runner: StageRunner,
    /// The scripted tools behind it.
    pub invoker: Arc<ScriptedInvoker>,
    /// Collected events.
    pub events: Arc<CollectingEventSink>,
    /// The build's cancellation token.
    pub cancel: Arc<CancellationToken>,
}

impl RunnerHarness {
    /// Builds a runner over `config` and `invoker`.
    pub fn new(config: ToolchainConfig, invoker: ScriptedInvoker) -> Self {
        let invoker = Arc::new(invoker);
        let events = Arc::new(CollectingEventSink::new());
        let cancel = Arc::new(CancellationToken::new());
        let runner = StageRunner::new(
            Arc::new(config),
            invoker.clone(),
            events.clone(),
            cancel.clone(),
        );
        Self {
            runner,
            invoker,
            events,
            cancel,
        }
    }
}
