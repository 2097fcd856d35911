//! Core types for the harness
//!
//! This module defines the data structures shared across the whole crate:
//! - The [`Computation`] execution record (one CALL/CREATE frame with its
//!   PC trace, children, logs, output and gas figures)
//! - Raw event-log entries with their ordering ids
//! - VM errors as captured from execution outcomes

/// Re-exports from revm and alloy for user convenience
pub use alloy::primitives::{Address, Bytes, B256, I256, U256};
pub use revm::interpreter::InstructionResult;

use crate::inspectors::gas::PcGasProfile;
use crate::memory::FastMem;
use crate::utils::error_utils::parse_custom_error;

/// Gas limit the environment starts with (and the default per-call gas)
pub const DEFAULT_GAS_LIMIT: u64 = 100_000_000;

/// Deterministic genesis timestamp for fresh (non-forked) environments
pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;

/// The message that started one computation frame
#[derive(Clone, Debug, Default)]
pub struct CallMessage {
    /// Message sender
    pub sender: Address,
    /// Call target (the storage address)
    pub to: Address,
    /// Address the running bytecode belongs to (differs under DELEGATECALL)
    pub code_address: Address,
    /// Native value attached to the call
    pub value: U256,
    /// Calldata (or initcode for creations)
    pub data: Bytes,
    /// Gas made available to this frame
    pub gas: u64,
    /// Whether state mutation is disallowed
    pub is_static: bool,
    /// Whether this frame is a contract creation
    pub is_create: bool,
}

/// An EVM-level error captured from a finished frame
///
/// Carries the raw instruction result and the frame's output bytes, which
/// for reverts hold the ABI-encoded revert payload.
#[derive(Clone, Debug, PartialEq)]
pub struct VmError {
    pub result: InstructionResult,
    pub output: Bytes,
}

impl VmError {
    /// Human-readable reason
    ///
    /// Decodes `Error(string)` / `Panic(uint256)` payloads when the selector
    /// matches, otherwise reports the raw instruction result.
    pub fn pretty_reason(&self) -> String {
        if let Some(reason) = parse_custom_error(&self.output) {
            return reason;
        }
        if !self.output.is_empty() {
            return format!("{:?} 0x{}", self.result, alloy::primitives::hex::encode(&self.output));
        }
        format!("{:?}", self.result)
    }
}

impl std::fmt::Display for VmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.pretty_reason())
    }
}

/// A raw (undecoded) event log
#[derive(Clone, Debug, PartialEq)]
pub struct RawLogEntry {
    /// Monotonic id assigned as LOG opcodes execute, for ordering
    pub log_id: u64,
    /// Emitter address
    pub address: Address,
    /// Topics, including topic0
    pub topics: Vec<B256>,
    /// ABI-encoded non-indexed payload
    pub data: Bytes,
}

/// Revert information supplied by an alternate (IR) executor
///
/// When present it takes precedence over PC-map lookups while building
/// stack traces.
#[derive(Clone, Debug)]
pub struct IrRevertInfo {
    /// Source position `(lineno, col, end_lineno, end_col)`
    pub source_pos: Option<(u32, u32, u32, u32)>,
    /// Error detail string
    pub error_msg: String,
}

/// One EVM execution frame (one CALL or CREATE), with its sub-frames
///
/// This is the record everything downstream is derived from: stack traces
/// walk `children`, the gas profiler folds `pc_trace`/`gas_profile`, log
/// collection flattens `logs`, and storage-key reversal reads the traces the
/// frame's execution left in the environment.
#[derive(Clone, Debug, Default)]
pub struct Computation {
    /// The message that started this frame
    pub msg: CallMessage,
    /// Every PC executed, in order
    pub pc_trace: Vec<usize>,
    /// PC of the call site for each child, in invocation order
    pub child_pcs: Vec<usize>,
    /// Sub-computations in invocation order
    pub children: Vec<Computation>,
    /// Logs emitted directly by this frame
    pub logs: Vec<RawLogEntry>,
    /// Return or revert data
    pub output: Bytes,
    /// Error, if the frame did not complete successfully
    pub error: Option<VmError>,
    /// Gas spent by this frame, children included
    pub gas_used: u64,
    /// Gas refunded by this frame
    pub gas_refunded: i64,
    /// Address created by this frame, for creations
    pub created: Option<Address>,
    /// Per-PC gas figures, present when profiling was enabled
    pub gas_profile: Option<PcGasProfile>,
    /// Memory image captured at the revert site, for frame-local decoding
    pub memory: Option<FastMem>,
    /// Where the recorded PC trace starts relative to the mapped bytecode
    pub start_pc: usize,
    /// What CODESIZE was pretending to be, for synthetic calls
    pub fake_codesize: Option<usize>,
    /// Contract repr captured before the revert unwound state
    pub contract_repr_before_revert: Option<String>,
    /// Revert info from an alternate executor, if one ran this frame
    pub ir_revert: Option<IrRevertInfo>,
}

impl Computation {
    /// Whether this frame ended in an error
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The 4-byte selector of the frame's calldata, if present
    pub fn selector(&self) -> Option<[u8; 4]> {
        if self.msg.data.len() < 4 {
            return None;
        }
        let mut id = [0u8; 4];
        id.copy_from_slice(&self.msg.data[..4]);
        Some(id)
    }

    /// All logs in this frame and its children, ordered by log id
    pub fn all_logs(&self) -> Vec<RawLogEntry> {
        let mut logs = Vec::new();
        self.collect_logs(&mut logs);
        logs.sort_by_key(|log| log.log_id);
        logs
    }

    fn collect_logs(&self, out: &mut Vec<RawLogEntry>) {
        out.extend(self.logs.iter().cloned());
        for child in &self.children {
            child.collect_logs(out);
        }
    }

    /// Depth-first count of frames, this one included
    pub fn frame_count(&self) -> usize {
        1 + self.children.iter().map(Computation::frame_count).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_logs_ordered_by_log_id() {
        let mut root = Computation::default();
        root.logs.push(RawLogEntry {
            log_id: 2,
            address: Address::ZERO,
            topics: vec![],
            data: Bytes::new(),
        });
        let mut child = Computation::default();
        child.logs.push(RawLogEntry {
            log_id: 1,
            address: Address::ZERO,
            topics: vec![],
            data: Bytes::new(),
        });
        root.children.push(child);

        let logs = root.all_logs();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].log_id, 1);
        assert_eq!(logs[1].log_id, 2);
    }

    #[test]
    fn test_vm_error_pretty_reason_decodes_error_string() {
        let mut payload = vec![0x08, 0xc3, 0x79, 0xa0];
        payload.extend_from_slice(
            &crate::abi::codec::abi_encode("(string)", &[crate::abi::value::AbiValue::from("nope")])
                .unwrap(),
        );
        let err = VmError {
            result: InstructionResult::Revert,
            output: payload.into(),
        };
        assert_eq!(err.pretty_reason(), "nope");
    }
}
