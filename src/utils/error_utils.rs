//! Revert payload parsing
//!
//! This module provides utilities for parsing the two standard revert
//! payload shapes:
//! - `Error(string)` - revert with message (selector: 0x08c379a0)
//! - `Panic(uint256)` - Solidity-style panic code (selector: 0x4e487b71)

use alloy::dyn_abi::{DynSolType, DynSolValue};

/// Selector of `Error(string)`
pub const ERROR_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// Parse a revert payload into a human-readable reason
///
/// # Arguments
/// * `output` - Raw revert output bytes from the failed frame
///
/// # Returns
/// * `Some(String)` - Decoded error message or panic reason
/// * `None` - If the payload is not a recognized error encoding
pub fn parse_custom_error(output: &[u8]) -> Option<String> {
    if output.len() < 4 {
        return None;
    }

    let selector = &output[0..4];
    match selector {
        // Error(string) - 0x08c379a0
        [0x08, 0xc3, 0x79, 0xa0] => {
            if let Ok(DynSolValue::String(reason)) = DynSolType::String.abi_decode(&output[4..]) {
                Some(reason)
            } else {
                None
            }
        }
        // Panic(uint256) - 0x4e487b71
        [0x4e, 0x48, 0x7b, 0x71] => {
            if let Ok(DynSolValue::Uint(code, _)) = DynSolType::Uint(256).abi_decode(&output[4..]) {
                return Some(match code.to::<u64>() {
                    0x01 => "Panic: Assertion failed".to_string(),
                    0x11 => "Panic: Arithmetic overflow".to_string(),
                    0x12 => "Panic: Division by zero".to_string(),
                    0x21 => "Panic: Invalid enum value".to_string(),
                    0x22 => "Panic: Invalid storage access".to_string(),
                    0x31 => "Panic: Pop on empty array".to_string(),
                    0x32 => "Panic: Array access out of bounds".to_string(),
                    0x41 => "Panic: Out of memory".to_string(),
                    0x51 => "Panic: Call to uninitialized function".to_string(),
                    code => format!("Panic: Unknown error code (0x{code:x})"),
                });
            }
            None
        }
        _ => None,
    }
}

/// ABI-encode a reason string as an `Error(string)` payload
///
/// The inverse of [`parse_custom_error`], used by tests and synthetic
/// precompiles to produce canonical revert data.
pub fn encode_error_string(reason: &str) -> Vec<u8> {
    let mut payload = ERROR_SELECTOR.to_vec();
    payload.extend_from_slice(&DynSolValue::String(reason.to_string()).abi_encode());
    payload
}
