//! Final link planning and execution.
//!
//! The planner composes an ordered [`LinkPlan`] from the unit table and runs
//! it. Runtime start and end objects come from the compiler driver, from the
//! caller, or from asking the driver; the planner never guesses them.

mod options;
mod plan;
mod planner;

pub use options::{Linkage, LinkOptions, RuntimeObjects, DEFAULT_DYNAMIC_LINKER};
pub use plan::{LinkInput, LinkPlan, LinkTool, UnitObject};
pub use planner::{unresolved_symbols, LinkPlanner};
