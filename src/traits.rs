//! Core traits for the harness inspector layer
//!
//! This module defines the fundamental traits that power the tracing system:
//! - Reset: For managing inspector state between executions
//! - TraceOutput: For converting inspector state to output
//! - TraceInspector: Combined trait for full inspector functionality

/// Re-export core REVM traits for user convenience
///
/// These re-exports allow users to access essential REVM traits directly
/// through this crate, without managing version compatibility between revm
/// and the harness.
pub use revm::{Database, Inspector};

/// Defines how an inspector can reset its internal state
///
/// The environment reuses one inspector across executions; state from a
/// previous call must be cleared before the next one starts.
pub trait Reset {
    /// Resets the inspector to its initial state
    fn reset(&mut self);
}

/// Defines how an inspector converts its state to a specific output type
///
/// # Type Parameters
/// * `Output` - The type this inspector produces as its final result
pub trait TraceOutput {
    /// The type of output this inspector produces
    type Output;

    /// Converts the current inspector state into the output type
    fn get_output(&self) -> Self::Output;
}

/// Combined trait for full inspector functionality
///
/// Combines the core REVM `Inspector` trait with `Reset` and `TraceOutput`
/// to describe an inspector the environment can drive.
pub trait TraceInspector<CTX>: Inspector<CTX> + Reset + TraceOutput {}

/// Blanket implementation for any type implementing required traits
impl<T, CTX> TraceInspector<CTX> for T where T: Inspector<CTX> + Reset + TraceOutput {}
