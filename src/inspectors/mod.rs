//! EVM execution inspectors
//!
//! - [`hook`]: the per-computation instrumentation inspector the
//!   environment drives (frame tree, tracers, precompile interception,
//!   opcode hooks)
//! - [`tracers`]: SHA3-preimage and SSTORE trace tables and the
//!   storage-key reversal walk
//! - [`gas`]: gas metering modes and the per-PC profiling data

pub mod gas;
pub mod hook;
pub mod tracers;

pub use hook::{HookInspector, OpcodeHook, OpcodeHookMap, OpcodeStep};
