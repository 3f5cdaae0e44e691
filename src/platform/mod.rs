/// Common cross-platform file utilities
pub mod common;

/// Process liveness, detachment and termination
pub mod process;

// Re-export common utilities for convenience
pub use common::*;
pub use process::{Liveness, SystemLiveness};
