//! Minimal-proxy (EIP-1167) detection and target extraction
//!
//! A minimal proxy is a tiny runtime that DELEGATECALLs a fixed target
//! address embedded between a well-known prefix and suffix. The harness uses
//! this to resolve the "real" bytecode behind a proxy when auto-registering
//! contracts created through factory patterns, and to keep walking child
//! frames when building stack traces through proxies.

use alloy::primitives::Address;

/// EIP-1167 runtime prefix, up to (not including) the target address
pub const EIP1167_PREFIX: &[u8] = &[0x36, 0x3d, 0x3d, 0x37, 0x3d, 0x3d, 0x3d, 0x36, 0x3d, 0x73];

/// EIP-1167 runtime suffix, right after the target address
pub const EIP1167_SUFFIX: &[u8] = &[
    0x5a, 0xf4, 0x3d, 0x82, 0x80, 0x3e, 0x90, 0x3d, 0x91, 0x60, 0x2b, 0x57, 0xfd, 0x5b, 0xf3,
];

/// Whether `bytecode` is an EIP-1167 minimal proxy runtime
pub fn is_eip1167_contract(bytecode: &[u8]) -> bool {
    bytecode.len() == EIP1167_PREFIX.len() + 20 + EIP1167_SUFFIX.len()
        && bytecode.starts_with(EIP1167_PREFIX)
        && bytecode.ends_with(EIP1167_SUFFIX)
}

/// Extract the DELEGATECALL target from a minimal proxy runtime
pub fn extract_eip1167_address(bytecode: &[u8]) -> Option<Address> {
    if !is_eip1167_contract(bytecode) {
        return None;
    }
    let target = &bytecode[EIP1167_PREFIX.len()..EIP1167_PREFIX.len() + 20];
    Some(Address::from_slice(target))
}

/// Build a minimal proxy runtime pointing at `target`
///
/// Useful in tests and for synthesizing factory deployments.
pub fn eip1167_runtime(target: Address) -> Vec<u8> {
    let mut code = Vec::with_capacity(45);
    code.extend_from_slice(EIP1167_PREFIX);
    code.extend_from_slice(target.as_slice());
    code.extend_from_slice(EIP1167_SUFFIX);
    code
}
