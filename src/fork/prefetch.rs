//! Prestate prefetching for forked executions
//!
//! Before an outer call runs against a fork, a single `debug_traceCall`
//! with the `prestateTracer` can deliver every account and storage slot the
//! call will touch, replacing dozens of per-slot RPC round trips. The
//! prefetch is strictly best-effort: nodes without the debug namespace, or
//! malformed tracer output, degrade to on-demand fetching without surfacing
//! an error. A partially parsed response is discarded wholesale rather than
//! half-applied.

use alloy::primitives::{keccak256, Address, Bytes, U256};
use revm::database::CacheDB;
use revm::state::{AccountInfo, Bytecode};
use serde_json::{json, Map, Value};

use crate::fork::backend::{ForkBackend, StateBackend};
use crate::fork::rpc::{from_hex_bytes, from_hex_u256};

/// A staged account from the prestate trace
struct PrestateAccount {
    address: Address,
    balance: U256,
    nonce: u64,
    code: Bytes,
    storage: Vec<(U256, U256)>,
}

/// Prefetch the prestate of an outer call into the journaled cache
///
/// Accounts already materialized locally are left untouched, and storage
/// slots with an existing local entry keep their value, so explicit zero
/// writes are preserved. Never raises.
pub fn try_prefetch_state(
    cache: &mut CacheDB<StateBackend>,
    backend: &ForkBackend,
    from: Address,
    to: Option<Address>,
    value: U256,
    data: &[u8],
    gas: u64,
) {
    let mut args = Map::new();
    args.insert("from".into(), Value::from(from.to_checksum(None)));
    if let Some(to) = to {
        args.insert("to".into(), Value::from(to.to_checksum(None)));
    }
    args.insert("gas".into(), Value::from(format!("0x{gas:x}")));
    args.insert("value".into(), Value::from(format!("0x{value:x}")));
    args.insert(
        "data".into(),
        Value::from(format!("0x{}", alloy::primitives::hex::encode(data))),
    );

    let params = json!([args, backend.block_id(), { "tracer": "prestateTracer" }]);
    let trace = match backend.fetch_sync("debug_traceCall", params) {
        Ok(trace) => trace,
        Err(e) => {
            tracing::debug!(error = %e, "prestate prefetch unavailable");
            return;
        }
    };

    // stage everything first; any parse failure discards the whole batch
    let accounts = match parse_prestate(&trace) {
        Some(accounts) => accounts,
        None => {
            tracing::debug!("prestate trace malformed, discarding prefetch");
            return;
        }
    };

    for account in accounts {
        if !cache.cache.accounts.contains_key(&account.address) {
            let code_hash = keccak256(&account.code);
            let bytecode = if account.code.is_empty() {
                Bytecode::default()
            } else {
                Bytecode::new_raw(account.code.clone())
            };
            let info = AccountInfo {
                balance: account.balance,
                nonce: account.nonce,
                code_hash,
                code: Some(bytecode),
            };
            cache.insert_account_info(account.address, info);
        }
        for (slot, value) in account.storage {
            let already_present = cache
                .cache
                .accounts
                .get(&account.address)
                .is_some_and(|acc| acc.storage.contains_key(&slot));
            if !already_present {
                let _ = cache.insert_account_storage(account.address, slot, value);
            }
        }
    }
}

fn parse_prestate(trace: &Value) -> Option<Vec<PrestateAccount>> {
    let entries = trace.as_object()?;
    let mut staged = Vec::with_capacity(entries.len());
    for (addr_str, account) in entries {
        let address: Address = addr_str.parse().ok()?;
        let account = account.as_object()?;

        let balance = match account.get("balance") {
            Some(v) => from_hex_u256(v).ok()?,
            None => U256::ZERO,
        };
        // the prestate tracer reports nonces as plain integers
        let nonce = match account.get("nonce") {
            Some(v) => v.as_u64()?,
            None => 0,
        };
        let code = match account.get("code") {
            Some(v) => Bytes::from(from_hex_bytes(v).ok()?),
            None => Bytes::new(),
        };

        let mut storage = Vec::new();
        if let Some(slots) = account.get("storage") {
            for (slot, value) in slots.as_object()? {
                let slot = U256::from_str_radix(slot.trim_start_matches("0x"), 16).ok()?;
                let value = from_hex_u256(value).ok()?;
                storage.push((slot, value));
            }
        }

        staged.push(PrestateAccount {
            address,
            balance,
            nonce,
            code,
            storage,
        });
    }
    Some(staged)
}
