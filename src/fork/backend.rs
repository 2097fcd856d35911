//! RPC-backed account state for forked environments
//!
//! [`ForkBackend`] implements revm's `DatabaseRef` against an upstream
//! JSON-RPC node, pinned to the block resolved at fork time. It sits below
//! the environment's `CacheDB`, which supplies the journaled write-through
//! layer: every value read from the RPC is cached locally by `CacheDB`, and
//! every local write (zero writes included) shadows the upstream value, so
//! a slot is fetched at most once — the "don't fetch again" discipline.
//!
//! The sync `DatabaseRef` interface is bridged onto the async provider with
//! a runtime handle and `block_in_place`, the same pattern the async
//! database wrapper uses.

use std::sync::Arc;

use alloy::primitives::{keccak256, Address, B256, U256};
use revm::{
    database::DatabaseRef,
    database_interface::DBErrorMarker,
    primitives::{StorageKey, StorageValue},
    state::{AccountInfo, Bytecode},
};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::runtime::{Handle, Runtime};

use crate::errors::{InitError, RpcError};
use crate::fork::rpc::{from_hex_bytes, from_hex_u256, from_hex_u64, get_provider, CachingRpc};

/// Errors surfaced through the database layer
#[derive(Debug, Error)]
pub enum ForkDbError {
    #[error("{0}")]
    Rpc(#[from] RpcError),
    #[error("{0}")]
    Other(String),
}

impl DBErrorMarker for ForkDbError {}

// Hold a tokio runtime handle or a dedicated runtime
#[derive(Debug)]
enum HandleOrRuntime {
    Handle(Handle),
    Runtime(Runtime),
}

impl HandleOrRuntime {
    fn block_on<F>(&self, f: F) -> F::Output
    where
        F: std::future::Future + Send,
        F::Output: Send,
    {
        match self {
            Self::Handle(handle) => tokio::task::block_in_place(move || handle.block_on(f)),
            Self::Runtime(rt) => rt.block_on(f),
        }
    }
}

/// Resolve a runtime to drive async RPC calls from sync database hooks
///
/// Inside a multi-thread tokio runtime the current handle is reused;
/// otherwise a dedicated runtime is created. Current-thread runtimes cannot
/// be re-entered from blocking context.
fn resolve_runtime() -> Result<HandleOrRuntime, InitError> {
    match Handle::try_current() {
        Ok(handle) => match handle.runtime_flavor() {
            tokio::runtime::RuntimeFlavor::CurrentThread => Err(InitError::DatabaseError(
                "cannot bridge RPC calls from a current-thread runtime; \
                 use a multi-thread runtime"
                    .to_string(),
            )),
            _ => Ok(HandleOrRuntime::Handle(handle)),
        },
        Err(_) => Runtime::new()
            .map(HandleOrRuntime::Runtime)
            .map_err(|e| InitError::DatabaseError(e.to_string())),
    }
}

/// Account state fetched on demand from an upstream node
#[derive(Clone, Debug)]
pub struct ForkBackend {
    rpc: Arc<CachingRpc>,
    rt: Arc<HandleOrRuntime>,
    /// Hex block number all state reads are pinned to
    block_id: String,
    /// Resolved fork-point block number
    pub block_number: u64,
    /// Resolved fork-point timestamp
    pub timestamp: u64,
    /// Upstream chain id
    pub chain_id: u64,
}

impl ForkBackend {
    /// Connect to `rpc_url` and pin state reads at `block_identifier`
    ///
    /// Named identifiers (`"latest"`, `"safe"`, ...) are resolved to a
    /// concrete block number immediately so every subsequent read is
    /// pinned and cacheable.
    pub async fn create(rpc_url: &str, block_identifier: &str) -> Result<Self, InitError> {
        let provider = get_provider(rpc_url).await?;
        let rpc = CachingRpc::new(provider, rpc_url);

        let block_info = rpc
            .fetch_uncached("eth_getBlockByNumber", json!([block_identifier, false]))
            .await
            .map_err(|e| InitError::BlockFetchError(e.to_string()))?;
        if block_info.is_null() {
            return Err(InitError::BlockNotFound(block_identifier.to_string()));
        }
        let block_number = from_hex_u64(&block_info["number"])
            .map_err(|e| InitError::BlockFetchError(e.to_string()))?;
        let timestamp = from_hex_u64(&block_info["timestamp"])
            .map_err(|e| InitError::BlockFetchError(e.to_string()))?;

        let chain_id_raw = rpc
            .fetch("eth_chainId", json!([]))
            .await
            .map_err(|e| InitError::BlockFetchError(e.to_string()))?;
        let chain_id =
            from_hex_u64(&chain_id_raw).map_err(|e| InitError::BlockFetchError(e.to_string()))?;

        Ok(Self {
            rpc: Arc::new(rpc),
            rt: Arc::new(resolve_runtime()?),
            block_id: format!("0x{block_number:x}"),
            block_number,
            timestamp,
            chain_id,
        })
    }

    /// The hex block id state reads are pinned at
    pub fn block_id(&self) -> &str {
        &self.block_id
    }

    /// Blocking cached fetch, for use from sync database hooks
    pub fn fetch_sync(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.rt.block_on(self.rpc.fetch(method, params))
    }

    /// Blocking uncached fetch
    pub fn fetch_uncached_sync(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.rt.block_on(self.rpc.fetch_uncached(method, params))
    }

    fn fetch_account(&self, address: Address) -> Result<AccountInfo, ForkDbError> {
        let addr = address.to_checksum(None);
        let (balance, nonce, code) = self.rt.block_on(async {
            tokio::join!(
                self.rpc
                    .fetch("eth_getBalance", json!([addr, self.block_id])),
                self.rpc
                    .fetch("eth_getTransactionCount", json!([addr, self.block_id])),
                self.rpc.fetch("eth_getCode", json!([addr, self.block_id])),
            )
        });
        let balance = from_hex_u256(&balance?)?;
        let nonce = from_hex_u64(&nonce?)?;
        let code = from_hex_bytes(&code?)?;
        let code_hash = keccak256(&code);
        let bytecode = if code.is_empty() {
            Bytecode::default()
        } else {
            Bytecode::new_raw(code.into())
        };
        Ok(AccountInfo {
            balance,
            nonce,
            code_hash,
            code: Some(bytecode),
        })
    }
}

impl DatabaseRef for ForkBackend {
    type Error = ForkDbError;

    fn basic_ref(&self, address: Address) -> Result<Option<AccountInfo>, Self::Error> {
        Ok(Some(self.fetch_account(address)?))
    }

    fn code_by_hash_ref(&self, _code_hash: B256) -> Result<Bytecode, Self::Error> {
        // code is delivered inline with basic_ref; the cache layer never
        // needs to resolve a bare hash
        Ok(Bytecode::default())
    }

    fn storage_ref(&self, address: Address, index: StorageKey) -> Result<StorageValue, Self::Error> {
        let value = self.fetch_sync(
            "eth_getStorageAt",
            json!([
                address.to_checksum(None),
                format!("0x{:x}", index),
                self.block_id
            ]),
        )?;
        Ok(from_hex_u256(&value)?)
    }

    fn block_hash_ref(&self, number: u64) -> Result<B256, Self::Error> {
        let block = self.fetch_sync(
            "eth_getBlockByNumber",
            json!([format!("0x{number:x}"), false]),
        )?;
        if block.is_null() {
            return Ok(keccak256(number.to_string().as_bytes()));
        }
        let hash = from_hex_bytes(&block["hash"])?;
        Ok(B256::from_slice(&hash))
    }
}

/// The environment's state source: fresh local state, or a fork
///
/// Sits below `CacheDB`; local mode never produces upstream state, so
/// every account starts empty the way a genesis chain does.
#[derive(Clone, Debug, Default)]
pub enum StateBackend {
    #[default]
    Local,
    Fork(ForkBackend),
}

impl StateBackend {
    pub fn is_forked(&self) -> bool {
        matches!(self, Self::Fork(_))
    }

    pub fn fork(&self) -> Option<&ForkBackend> {
        match self {
            Self::Fork(backend) => Some(backend),
            Self::Local => None,
        }
    }
}

impl DatabaseRef for StateBackend {
    type Error = ForkDbError;

    fn basic_ref(&self, address: Address) -> Result<Option<AccountInfo>, Self::Error> {
        match self {
            Self::Local => Ok(None),
            Self::Fork(backend) => backend.basic_ref(address),
        }
    }

    fn code_by_hash_ref(&self, code_hash: B256) -> Result<Bytecode, Self::Error> {
        match self {
            Self::Local => Ok(Bytecode::default()),
            Self::Fork(backend) => backend.code_by_hash_ref(code_hash),
        }
    }

    fn storage_ref(&self, address: Address, index: StorageKey) -> Result<StorageValue, Self::Error> {
        match self {
            Self::Local => Ok(U256::ZERO),
            Self::Fork(backend) => backend.storage_ref(address, index),
        }
    }

    fn block_hash_ref(&self, number: u64) -> Result<B256, Self::Error> {
        match self {
            Self::Local => Ok(keccak256(number.to_string().as_bytes())),
            Self::Fork(backend) => backend.block_hash_ref(number),
        }
    }
}
