//! Raw precompile registry and the console-log precompile
//!
//! Precompiles registered here are process-wide: they are loaded into every
//! environment's inspector on (re)initialization, and copied per execution
//! so per-call mutation cannot corrupt the registry. A handler receives the
//! raw calldata and either returns output bytes or a revert reason.
//!
//! The well-known console-log precompile lives at
//! `0x000000000000000000636F6E736F6C652E6C6F67` and ABI-decodes
//! `(string, bytes)` messages: the string is a schema, the bytes are the
//! payload encoded against it. Decoded values print to stderr.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use alloy::primitives::{address, Address, Bytes, U256};
use once_cell::sync::Lazy;

use crate::abi::codec::abi_decode;
use crate::errors::SessionError;

/// Address of the console-log precompile
pub const CONSOLE_ADDRESS: Address = address!("000000000000000000636F6E736F6C652E6C6F67");

/// Input handed to a raw precompile handler
#[derive(Debug)]
pub struct PrecompileInput<'a> {
    /// The frame's caller
    pub caller: Address,
    /// Native value attached to the call
    pub value: U256,
    /// Full calldata, selector included
    pub calldata: &'a [u8],
}

/// A raw precompile handler
///
/// `Ok(bytes)` becomes the call's return data; `Err(reason)` reverts the
/// call with an `Error(string)` payload.
pub type PrecompileFn =
    Arc<dyn for<'a> Fn(&PrecompileInput<'a>) -> Result<Bytes, String> + Send + Sync>;

/// Address → handler table
pub type PrecompileMap = HashMap<Address, PrecompileFn>;

static PRECOMPILES: Lazy<Mutex<PrecompileMap>> = Lazy::new(|| {
    let mut registry = PrecompileMap::new();
    registry.insert(CONSOLE_ADDRESS, Arc::new(console_log) as PrecompileFn);
    Mutex::new(registry)
});

/// Register a raw precompile process-wide
///
/// Fails when the address is already taken, unless `force` is set.
pub fn register_raw_precompile(
    address: Address,
    handler: PrecompileFn,
    force: bool,
) -> Result<(), SessionError> {
    let mut registry = PRECOMPILES.lock().unwrap();
    if registry.contains_key(&address) && !force {
        return Err(SessionError(format!("Already registered: {address}")));
    }
    registry.insert(address, handler);
    Ok(())
}

/// Remove a raw precompile from the process-wide registry
pub fn deregister_raw_precompile(address: Address) {
    PRECOMPILES.lock().unwrap().remove(&address);
}

/// Snapshot of the current registry, as loaded into an environment
pub fn registered_precompiles() -> PrecompileMap {
    PRECOMPILES.lock().unwrap().clone()
}

/// The console-log handler
///
/// Calldata layout: `selector(4) ++ abi_encode((string,bytes), (schema, payload))`.
fn console_log(input: &PrecompileInput<'_>) -> Result<Bytes, String> {
    if input.calldata.len() < 4 {
        return Err("console.log: calldata too short".to_string());
    }
    let decoded = abi_decode("(string,bytes)", &input.calldata[4..])
        .map_err(|e| format!("console.log: {e}"))?;
    let schema = decoded[0]
        .as_str()
        .ok_or_else(|| "console.log: schema is not a string".to_string())?
        .to_string();
    let crate::abi::value::AbiValue::Bytes(payload) = &decoded[1] else {
        return Err("console.log: payload is not bytes".to_string());
    };
    let values = abi_decode(&schema, payload).map_err(|e| format!("console.log: {e}"))?;
    let line = values
        .iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    eprintln!("{line}");
    Ok(Bytes::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::codec::abi_encode;
    use crate::abi::value::AbiValue;

    #[test]
    fn test_console_log_decodes_payload() {
        let payload = abi_encode("(uint256,string)", &[AbiValue::from(7u64), AbiValue::from("ok")])
            .unwrap();
        let args = abi_encode(
            "(string,bytes)",
            &[AbiValue::from("(uint256,string)"), AbiValue::Bytes(payload)],
        )
        .unwrap();
        let mut calldata = vec![0u8; 4];
        calldata.extend_from_slice(&args);

        let input = PrecompileInput {
            caller: Address::ZERO,
            value: U256::ZERO,
            calldata: &calldata,
        };
        assert_eq!(console_log(&input).unwrap(), Bytes::new());
    }

    #[test]
    fn test_register_conflict() {
        let addr = Address::repeat_byte(0x99);
        let handler: PrecompileFn = Arc::new(|_| Ok(Bytes::new()));
        register_raw_precompile(addr, handler.clone(), false).unwrap();
        assert!(register_raw_precompile(addr, handler.clone(), false).is_err());
        register_raw_precompile(addr, handler, true).unwrap();
        deregister_raw_precompile(addr);
        assert!(!registered_precompiles().contains_key(&addr));
    }

    #[test]
    fn test_console_is_preregistered() {
        assert!(registered_precompiles().contains_key(&CONSOLE_ADDRESS));
    }
}
