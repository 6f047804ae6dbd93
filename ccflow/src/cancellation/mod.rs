//! Build interruption.
//!
//! A single [`CancellationToken`] is shared by every worker of a build. When
//! it fires, in-flight tool processes are killed and no further stage starts.

mod token;

pub use token::CancellationToken;
