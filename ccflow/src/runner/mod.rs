//! Running external tools and single stages.

mod invoker;
mod stage_runner;

#[cfg(test)]
pub(crate) use invoker::deadline;
pub use invoker::{ProcessInvoker, Termination, ToolInvocation, ToolInvoker, ToolOutcome};
pub use stage_runner::StageRunner;
