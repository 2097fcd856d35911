//! SHA3-preimage and SSTORE tracing
//!
//! Two side tables the hook inspector maintains while opcodes execute:
//!
//! - the **SHA3 trace** maps each 32-byte hash image to its 64-byte
//!   preimage (only 64-byte hashes matter: they are the `hash(slot ++ key)`
//!   operations Vyper-style mapping layouts produce). Walking an image back
//!   through this table recovers the mapping keys behind a storage slot.
//! - the **SSTORE trace** records, per storage address, every slot an
//!   SSTORE touched. Zero writes are included on purpose so callers can
//!   observe explicit clears and dedupe themselves.

use std::collections::{BTreeSet, HashMap};

use alloy::primitives::{Address, Bytes, B256, U256};

/// Image → preimage table for 64-byte SHA3 inputs
pub type Sha3Trace = HashMap<B256, Bytes>;

/// Storage address → set of slots written
pub type SstoreTrace = HashMap<Address, BTreeSet<U256>>;

/// Record a SHA3 preimage when the hashed size is exactly 64 bytes
pub fn record_sha3(trace: &mut Sha3Trace, image: B256, preimage: &[u8]) {
    if preimage.len() == 64 {
        trace.insert(image, Bytes::copy_from_slice(preimage));
    }
}

/// Record an SSTORE slot write, regardless of the value stored
pub fn record_sstore(trace: &mut SstoreTrace, address: Address, slot: U256) {
    trace.entry(address).or_default().insert(slot);
}

/// Merge per-execution traces into the environment's cumulative tables
pub fn merge_sha3(into: &mut Sha3Trace, from: Sha3Trace) {
    into.extend(from);
}

/// Merge per-execution SSTORE traces, unioning slot sets
pub fn merge_sstore(into: &mut SstoreTrace, from: SstoreTrace) {
    for (address, slots) in from {
        into.entry(address).or_default().extend(slots);
    }
}

/// Walk a storage key back through the SHA3 trace
///
/// Returns the "path" that produced the key: for a nested mapping write
/// `m[k1][k2] = v`, the stored slot is `hash(hash(slot ++ k1) ++ k2)` and
/// the recovered path is `[slot, k1, k2]` as raw 32-byte values.
pub fn unwrap_storage_key(sha3_trace: &Sha3Trace, key: U256) -> Vec<B256> {
    let mut path = Vec::new();
    unwrap(sha3_trace, B256::from(key), &mut path);
    path
}

fn unwrap(sha3_trace: &Sha3Trace, key: B256, path: &mut Vec<B256>) {
    if let Some(preimage) = sha3_trace.get(&key) {
        let slot = B256::from_slice(&preimage[..32]);
        let k = B256::from_slice(&preimage[32..64]);
        unwrap(sha3_trace, slot, path);
        path.push(k);
    } else {
        path.push(key);
    }
}
