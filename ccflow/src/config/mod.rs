//! Configuration types.

mod toolchain;

pub use toolchain::{ToolSpec, ToolchainConfig};
