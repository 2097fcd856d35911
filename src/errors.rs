//! Error types for the EVM testing harness
//!
//! This module defines a comprehensive error handling system that covers:
//! - Environment initialization and fork setup errors
//! - Runtime execution errors
//! - ABI encoding/decoding and overload-resolution errors
//! - Reverted calls carrying a full stack trace
//! - Error conversion and propagation

use thiserror::Error;

use crate::trace::stack_trace::StackTrace;

/// Top-level error type for the harness
///
/// Encompasses all possible errors that can occur while driving the EVM,
/// providing a unified error handling interface for users.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Errors occurring during environment or fork initialization
    #[error("Failed to initialize environment: {0}")]
    Init(#[from] InitError),

    /// Errors occurring during transaction execution
    #[error("Error during execution: {0}")]
    Runtime(#[from] RuntimeError),

    /// A contract call reverted; carries the reconstructed stack trace
    #[error("{0}")]
    Revert(#[from] RevertError),

    /// ABI value could not be encoded for the declared type
    #[error("ABI encode error: {0}")]
    Encode(#[from] EncodeError),

    /// ABI bytes could not be decoded against the declared schema
    #[error("ABI decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Overload resolution failed at a call site
    #[error("{0}")]
    Overload(#[from] OverloadError),

    /// JSON-RPC failure while forked
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    /// An operation was used outside the session mode it requires
    #[error("{0}")]
    Session(#[from] SessionError),
}

/// Initialization-specific errors
///
/// These errors occur during the setup phase of the environment,
/// typically related to network connectivity and configuration.
#[derive(Debug, Error)]
pub enum InitError {
    /// Invalid or malformed RPC URL
    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    /// Database setup or connection errors
    #[error("Database initialization failed: {0}")]
    DatabaseError(String),

    /// Errors related to block fetching
    #[error("Failed to fetch block: {0}")]
    BlockFetchError(String),

    /// Errors related to block not found
    #[error("Block not found: {0}")]
    BlockNotFound(String),

    /// `fork()` was called on an environment that already has local state
    #[error("Refusing to fork over dirty local state: {0} (pass allow_dirty to override)")]
    DirtyState(String),
}

/// Runtime execution errors
///
/// These errors occur during actual transaction execution,
/// including state access problems and internal EVM failures.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// General transaction execution failures
    #[error("Transaction execution failed: {0}")]
    ExecutionFailed(String),

    /// Errors accessing account information
    #[error("Account access error: {0}")]
    AccountAccess(String),

    /// Errors accessing storage slots
    #[error("Slot access error: {0}")]
    SlotAccess(String),

    /// An artifact did not contain data the operation requires
    #[error("Missing compiler artifact data: {0}")]
    MissingArtifactData(String),
}

/// A reverted contract call, wrapping the reconstructed [`StackTrace`]
///
/// The string form prefixes the innermost frame's pretty VM reason and then
/// renders the full trace, innermost frame last.
#[derive(Debug, Error)]
pub struct RevertError {
    /// Stack trace, ordered outermost first; the last frame is the error site
    pub stack_trace: StackTrace,
}

impl std::fmt::Display for RevertError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(reason) = self.stack_trace.pretty_reason() {
            writeln!(f, "{reason}")?;
        }
        write!(f, "\n{}", self.stack_trace)
    }
}

/// ABI encoding failure: a value does not fit its declared type
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The schema string could not be parsed as an ABI type
    #[error("Invalid ABI schema {schema:?}: {reason}")]
    InvalidSchema { schema: String, reason: String },

    /// A value does not fit the declared ABI type
    #[error("Value {value} does not fit ABI type {abi_type}")]
    ValueOutOfRange { abi_type: String, value: String },

    /// A value has the wrong shape for the declared ABI type
    #[error("Cannot encode {value} as {abi_type}")]
    TypeMismatch { abi_type: String, value: String },

    /// Wrong number of components for a tuple or fixed array
    #[error("Expected {expected} components for {abi_type}, got {got}")]
    ArityMismatch {
        abi_type: String,
        expected: usize,
        got: usize,
    },
}

/// ABI decoding failure
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The schema string could not be parsed as an ABI type
    #[error("Invalid ABI schema {schema:?}: {reason}")]
    InvalidSchema { schema: String, reason: String },

    /// The payload is not valid ABI data for the schema
    #[error("Failed to decode as {schema}: {reason}")]
    InvalidPayload { schema: String, reason: String },
}

/// Overload-resolution failures at an ABI call site
#[derive(Debug, Error)]
pub enum OverloadError {
    /// No ABI entry accepts the given arguments
    #[error("Could not find matching {name} function for given arguments.")]
    NoMatch { name: String },

    /// Multiple ABI entries accept the given arguments
    #[error(
        "Ambiguous call to {name}. Arguments can be encoded to multiple overloads: {candidates}. \
         (Hint: try using `disambiguate_signature=` to disambiguate)."
    )]
    Ambiguous { name: String, candidates: String },

    /// Arity mismatch between the call site and the declared inputs
    #[error("Bad args to `{name}` (expected {expected} arguments, got {got})")]
    BadArgs {
        name: String,
        expected: usize,
        got: usize,
    },

    /// A named argument was not found among the declared input names
    #[error("Missing keyword argument {arg} for `{signature}`")]
    MissingNamedArg { arg: String, signature: String },
}

/// JSON-RPC failure while forked
///
/// Carries the upstream error message and, when the server supplied one,
/// the JSON-RPC error code.
#[derive(Debug, Error)]
#[error("RPC error {code:?}: {message}")]
pub struct RpcError {
    pub message: String,
    pub code: Option<i64>,
}

impl RpcError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }
}

/// An operation was used outside the session mode that permits it
///
/// Raised by `set_code`/`set_storage` outside a fork, `time_travel` with an
/// invalid argument combination, and `stomp` over a mismatched data section.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct SessionError(pub String);
