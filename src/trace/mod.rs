//! Stack traces and call-trace rendering
//!
//! - [`stack_trace`]: error translation — child-computation walking,
//!   PC → source/hint lookup, dev reasons, revert-pattern matching
//! - [`call_trace`]: the structured, printable/HTML call tree

pub mod call_trace;
pub mod stack_trace;

pub use call_trace::{call_trace_for, TraceFrame, TraceSourceInfo};
pub use stack_trace::{
    check_error_matches, stack_trace_for, DevReason, ErrorDetail, ErrorPattern, FrameDetail,
    SourceLocation, StackFrame, StackTrace,
};
