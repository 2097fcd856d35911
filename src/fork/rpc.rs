//! Caching JSON-RPC client for forked state access
//!
//! Wraps an alloy provider with a process-wide response cache keyed by
//! `(endpoint, method, params)`. Forked account DBs hit the same few reads
//! over and over (and across environments in one test process), so cache
//! hits skip the network entirely. Block-pinned requests are immutable,
//! which is what makes the cache sound; anything block-floating must go
//! through [`CachingRpc::fetch_uncached`].

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Mutex;

use alloy::network::AnyNetwork;
use alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect};
use once_cell::sync::Lazy;
use serde_json::Value;

use crate::errors::{InitError, RpcError};

/// Type-erased provider over any network
pub type AnyNetworkProvider = DynProvider<AnyNetwork>;

/// Process-wide response cache, shared by every fork of every environment
static RPC_CACHE: Lazy<Mutex<HashMap<(String, String), Value>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Create a provider with automatic protocol detection
///
/// - URLs starting with `http://` or `https://` → HTTP provider
/// - URLs starting with `ws://` or `wss://` → WebSocket provider
/// - Other URL schemes → error
pub async fn get_provider(rpc_url: &str) -> Result<AnyNetworkProvider, InitError> {
    let provider = if rpc_url.starts_with("http") {
        let url = rpc_url
            .parse()
            .map_err(|_| InitError::InvalidRpcUrl("Failed to parse RPC URL".to_string()))?;
        ProviderBuilder::new()
            .network::<AnyNetwork>()
            .connect_http(url)
            .erased()
    } else if rpc_url.starts_with("ws") {
        let ws_connect = WsConnect::new(rpc_url);
        ProviderBuilder::new_with_network::<AnyNetwork>()
            .connect_ws(ws_connect)
            .await
            .map_err(|_| InitError::InvalidRpcUrl("Failed to connect to WebSocket".to_string()))?
            .erased()
    } else {
        return Err(InitError::InvalidRpcUrl(
            "Unsupported RPC URL scheme".to_string(),
        ));
    };
    Ok(provider)
}

/// A JSON-RPC client with write-through response caching
pub struct CachingRpc {
    provider: AnyNetworkProvider,
    identifier: String,
}

impl CachingRpc {
    pub fn new(provider: AnyNetworkProvider, identifier: impl Into<String>) -> Self {
        Self {
            provider,
            identifier: identifier.into(),
        }
    }

    /// The endpoint this client talks to
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    fn cache_key(&self, method: &str, params: &Value) -> (String, String) {
        (
            self.identifier.clone(),
            serde_json::json!({ "method": method, "params": params }).to_string(),
        )
    }

    /// Fetch through the cache
    pub async fn fetch(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let key = self.cache_key(method, &params);
        if let Some(hit) = RPC_CACHE.lock().unwrap().get(&key) {
            return Ok(hit.clone());
        }
        let result = self.fetch_uncached(method, params).await?;
        RPC_CACHE.lock().unwrap().insert(key, result.clone());
        Ok(result)
    }

    /// Fetch bypassing the cache (for block-floating queries)
    pub async fn fetch_uncached(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        tracing::debug!(method, %params, "rpc fetch");
        self.provider
            .raw_request::<Value, Value>(Cow::Owned(method.to_string()), params)
            .await
            .map_err(|e| match e.as_error_resp() {
                Some(resp) => RpcError {
                    message: resp.message.to_string(),
                    code: Some(resp.code),
                },
                None => RpcError::new(e.to_string()),
            })
    }
}

impl std::fmt::Debug for CachingRpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingRpc")
            .field("identifier", &self.identifier)
            .finish()
    }
}

/// Parse a hex quantity (`"0x1a"`) into a u64
pub fn from_hex_u64(value: &Value) -> Result<u64, RpcError> {
    let s = value
        .as_str()
        .ok_or_else(|| RpcError::new(format!("expected hex quantity, got {value}")))?;
    let digits = s.trim_start_matches("0x");
    if digits.is_empty() {
        // some nodes encode zero as bare "0x"
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| RpcError::new(format!("bad hex quantity {s}: {e}")))
}

/// Parse a hex quantity into a U256
pub fn from_hex_u256(value: &Value) -> Result<alloy::primitives::U256, RpcError> {
    let s = value
        .as_str()
        .ok_or_else(|| RpcError::new(format!("expected hex quantity, got {value}")))?;
    let digits = s.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(alloy::primitives::U256::ZERO);
    }
    alloy::primitives::U256::from_str_radix(digits, 16)
        .map_err(|e| RpcError::new(format!("bad hex quantity {s}: {e}")))
}

/// Parse a `0x`-prefixed hex blob into bytes
pub fn from_hex_bytes(value: &Value) -> Result<Vec<u8>, RpcError> {
    let s = value
        .as_str()
        .ok_or_else(|| RpcError::new(format!("expected hex data, got {value}")))?;
    alloy::primitives::hex::decode(s).map_err(|e| RpcError::new(format!("bad hex data: {e}")))
}
