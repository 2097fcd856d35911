//! Forked-state access
//!
//! When an environment forks against a live node, missing accounts,
//! bytecode and storage are fetched transparently over JSON-RPC:
//!
//! - [`rpc`]: caching JSON-RPC client and provider construction
//! - [`backend`]: the `DatabaseRef` backend pinned at the fork block,
//!   plus the local/fork state-source switch
//! - [`prefetch`]: best-effort prestate prefetching via `debug_traceCall`

pub mod backend;
pub mod prefetch;
pub mod rpc;

pub use backend::{ForkBackend, ForkDbError, StateBackend};
pub use rpc::{AnyNetworkProvider, CachingRpc};
