//! Translation units and the per-build unit table.

mod source;
mod state;

pub use source::SourceUnit;
pub use state::{PipelineState, UnitFailure, UnitRecord};
