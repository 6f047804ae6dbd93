//! A scripted stand-in for external tools.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cancellation::CancellationToken;
use crate::errors::ToolInvocationError;
use crate::runner::{deadline, Termination, ToolInvocation, ToolInvoker, ToolOutcome};

type Predicate = Arc<dyn Fn(&ToolInvocation) -> bool + Send + Sync>;

#[derive(Clone)]
enum Matcher {
    Program(String),
    Arg(String),
    Custom(Predicate),
}

impl Matcher {
    fn matches(&self, invocation: &ToolInvocation) -> bool {
        match self {
            Self::Program(program) => invocation.program == *program,
            Self::Arg(needle) => invocation
                .args
                .iter()
                .any(|a| a.to_string_lossy().contains(needle.as_str())),
            Self::Custom(predicate) => predicate(invocation),
        }
    }
}

#[derive(Debug, Clone)]
enum Action {
    Fail { exit_code: i32, stderr: String },
    Respond { stdout: String },
    Hang,
    Delay(Duration),
    Missing,
}

#[derive(Clone)]
struct Rule {
    matcher: Matcher,
    action: Action,
}

/// A [`ToolInvoker`] that never spawns anything.
///
/// By default every invocation succeeds and, when it carries `-o <path>`,
/// writes that path with content derived from the program name and the
/// bytes of every existing input file, so identical inputs give identical
/// artifacts. Rules override the default; the first matching rule wins.
#[derive(Default)]
pub struct ScriptedInvoker {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<ToolInvocation>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl std::fmt::Debug for ScriptedInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedInvoker")
            .field("rules", &self.rules.lock().len())
            .field("calls", &self.calls.lock().len())
            .finish()
    }
}

impl ScriptedInvoker {
    /// Creates an invoker where every tool succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn rule(self, matcher: Matcher, action: Action) -> Self {
        self.rules.lock().push(Rule { matcher, action });
        self
    }

    /// Fails any invocation with an argument containing `needle`.
    #[must_use]
    pub fn fail_on(self, needle: &str, exit_code: i32, stderr: &str) -> Self {
        self.rule(
            Matcher::Arg(needle.to_string()),
            Action::Fail {
                exit_code,
                stderr: stderr.to_string(),
            },
        )
    }

    /// Fails any invocation for which `predicate` holds.
    #[must_use]
    pub fn fail_if<F>(self, predicate: F, exit_code: i32, stderr: &str) -> Self
    where
        F: Fn(&ToolInvocation) -> bool + Send + Sync + 'static,
    {
        self.rule(
            Matcher::Custom(Arc::new(predicate)),
            Action::Fail {
                exit_code,
                stderr: stderr.to_string(),
            },
        )
    }

    /// Answers any invocation with an argument containing `needle` with
    /// `stdout` and exit code 0, without writing files.
    #[must_use]
    pub fn respond_to(self, needle: &str, stdout: &str) -> Self {
        self.rule(
            Matcher::Arg(needle.to_string()),
            Action::Respond {
                stdout: stdout.to_string(),
            },
        )
    }

    /// Blocks any invocation with an argument containing `needle` until it
    /// times out or is cancelled.
    #[must_use]
    pub fn hang_on(self, needle: &str) -> Self {
        self.rule(Matcher::Arg(needle.to_string()), Action::Hang)
    }

    /// Delays every invocation of `program` before it succeeds.
    #[must_use]
    pub fn delay_program(self, program: &str, delay: Duration) -> Self {
        self.rule(Matcher::Program(program.to_string()), Action::Delay(delay))
    }

    /// Makes `program` unavailable.
    #[must_use]
    pub fn missing_program(self, program: &str) -> Self {
        self.rule(Matcher::Program(program.to_string()), Action::Missing)
    }

    /// Makes the tool unavailable for any invocation for which `predicate`
    /// holds.
    #[must_use]
    pub fn missing_if<F>(self, predicate: F) -> Self
    where
        F: Fn(&ToolInvocation) -> bool + Send + Sync + 'static,
    {
        self.rule(Matcher::Custom(Arc::new(predicate)), Action::Missing)
    }

    /// Every invocation received, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ToolInvocation> {
        self.calls.lock().clone()
    }

    /// Invocations that had an argument containing `needle`.
    #[must_use]
    pub fn calls_with(&self, needle: &str) -> Vec<ToolInvocation> {
        let matcher = Matcher::Arg(needle.to_string());
        self.calls
            .lock()
            .iter()
            .filter(|c| matcher.matches(c))
            .cloned()
            .collect()
    }

    /// The highest number of invocations that were running at once.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn action_for(&self, invocation: &ToolInvocation) -> Option<Action> {
        self.rules
            .lock()
            .iter()
            .find(|r| r.matcher.matches(invocation))
            .map(|r| r.action.clone())
    }

    async fn run(
        &self,
        invocation: &ToolInvocation,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ToolOutcome, ToolInvocationError> {
        match self.action_for(invocation) {
            Some(Action::Missing) => Err(ToolInvocationError::NotFound {
                program: invocation.program.clone(),
            }),
            Some(Action::Fail { exit_code, stderr }) => {
                Ok(ToolOutcome::exited(exit_code, String::new(), stderr))
            }
            Some(Action::Respond { stdout }) => Ok(ToolOutcome::exited(0, stdout, String::new())),
            Some(Action::Hang) => Ok(wait_until_killed(timeout, cancel).await),
            Some(Action::Delay(delay)) => {
                tokio::select! {
                    () = tokio::time::sleep(delay) => Ok(produce(invocation)),
                    outcome = wait_until_killed(timeout, cancel) => Ok(outcome),
                }
            }
            None => Ok(produce(invocation)),
        }
    }
}

async fn wait_until_killed(timeout: Option<Duration>, cancel: &CancellationToken) -> ToolOutcome {
    tokio::select! {
        () = deadline(timeout) => ToolOutcome::killed(Termination::TimedOut),
        () = cancel.cancelled() => ToolOutcome::killed(Termination::Cancelled),
    }
}

/// Default behavior: write the `-o` target from the inputs.
fn produce(invocation: &ToolInvocation) -> ToolOutcome {
    let mut output_path = None;
    let mut content = format!("{}\n", invocation.program).into_bytes();

    let mut args = invocation.args.iter();
    while let Some(arg) = args.next() {
        if arg == "-o" {
            output_path = args.next();
            continue;
        }
        if let Some(name) = arg.to_str().and_then(|a| a.strip_prefix("-print-file-name=")) {
            return ToolOutcome::exited(0, format!("{name}\n"), String::new());
        }
        let path = Path::new(arg);
        if path.is_file() {
            if let Ok(bytes) = std::fs::read(path) {
                content.extend_from_slice(&bytes);
            }
        } else {
            content.extend_from_slice(arg.as_encoded_bytes());
            content.push(b'\n');
        }
    }

    if let Some(path) = output_path {
        if let Err(e) = std::fs::write(Path::new(path), &content) {
            return ToolOutcome::exited(
                1,
                String::new(),
                format!("cannot write {}: {e}", Path::new(path).display()),
            );
        }
    }
    ToolOutcome::exited(0, String::new(), String::new())
}

#[async_trait]
impl ToolInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        invocation: &ToolInvocation,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ToolOutcome, ToolInvocationError> {
        self.calls.lock().push(invocation.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let outcome = self.run(invocation, timeout, cancel).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        outcome
    }
}
