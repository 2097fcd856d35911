//! # REVM Contract Testing Harness
//!
//! A contract-centric harness around an in-process EVM: deploy bytecode,
//! invoke functions by ABI signature, capture side effects (logs, storage
//! writes, SHA3 preimages), decode rich return types, reconstruct stack
//! traces from failed executions, and profile gas at PC/line/function
//! granularity.
//!
//! ## Core Pieces
//!
//! - **[`Env`]** - the chain wrapper: deploy, call, snapshot/revert,
//!   scoped anchoring, sender pranking, time travel, forking against a
//!   live node with on-demand state fetching and prestate prefetch.
//! - **[`HookInspector`]** - per-computation instrumentation: the frame
//!   tree, PC traces, SHA3/SSTORE tracers, per-PC gas profiling,
//!   precompile interception and opcode hooks.
//! - **[`ContractFactory`]/[`Contract`]** - compiled-artifact facades:
//!   typed calls, storage/immutables models (including mapping-key
//!   recovery through SHA3 preimages), event decoding, synthetic calls.
//! - **[`AbiContractFactory`]/[`AbiContract`]** - ABI-only facades with
//!   full overload resolution.
//! - **Stack traces and profiles** - [`trace`] turns failed computations
//!   into readable stack traces; [`profile`] folds per-PC gas to lines and
//!   functions.
//!
//! ## Quick Start
//!
//! ```no_run
//! use revm_harness::{Env, DeployRequest, CallRequest};
//! use revm_harness::alloy::primitives::{Bytes, U256};
//!
//! # fn example() -> Result<(), revm_harness::errors::HarnessError> {
//! let mut env = Env::new();
//!
//! // deploy raw initcode
//! let initcode = Bytes::from(vec![0x60, 0x01, 0x60, 0x00, 0xf3]);
//! let (address, runtime) = env.deploy_code(DeployRequest::new(initcode))?;
//!
//! // call it and inspect the full computation record
//! let computation = env.raw_call(CallRequest::to(address))?;
//! println!("gas used: {}", computation.gas_used);
//! # Ok(())
//! # }
//! ```
//!
//! Typed calls go through contract facades instead:
//!
//! ```no_run
//! use revm_harness::{Env, ContractFactory, CompilerArtifact, AbiValue};
//!
//! # fn example(artifact: CompilerArtifact) -> Result<(), revm_harness::errors::HarnessError> {
//! let mut env = Env::new();
//! let factory = ContractFactory::from_artifact(artifact);
//! let token = factory.deploy(&mut env, &[AbiValue::from(100u64)])?;
//! let supply = token.call(&mut env, "totalSupply", &[])?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Forking
//!
//! ```no_run
//! use revm_harness::Env;
//!
//! # async fn example() -> Result<(), revm_harness::errors::HarnessError> {
//! let mut env = Env::new();
//! env.fork("https://eth-mainnet.g.alchemy.com/v2/your-api-key").await?;
//! // missing accounts, code and storage now fetch through to the node,
//! // pinned at the fork block and cached locally
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Structure
//!
//! - `env`: the environment, block patching, registries, precompiles
//! - `abi`: value tree, codec, overload resolution, event decoding
//! - `contract`: compiled-artifact facades, storage/immutables models
//! - `inspectors`: the computation hook, tracers, gas metering modes
//! - `fork`: RPC-backed account state with caching and prefetch
//! - `trace`: stack traces, error translation, call-trace rendering
//! - `profile`: per-PC → line → function gas aggregation
//! - `memory`: word-aligned memory cache over captured byte memory
//! - `errors`: the error taxonomy
//! - `utils`: revert-reason, minimal-proxy and blueprint helpers

pub mod abi;
pub mod contract;
pub mod env;
pub mod errors;
pub mod fork;
pub mod inspectors;
pub mod memory;
pub mod profile;
pub mod trace;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export core types for easier access
pub use abi::{AbiContract, AbiContractFactory, AbiValue, CallOpts};
pub use contract::{
    CompilerArtifact, CompilerBackend, Contract, ContractFactory, DecodedLog, DeployOpts,
    StorageDump, SyntheticCall,
};
pub use env::{CallRequest, DeployRequest, Env, CONSOLE_ADDRESS};
pub use errors::HarnessError;
pub use inspectors::gas::GasMeterMode;
pub use inspectors::HookInspector;
pub use memory::FastMem;
pub use trace::{ErrorPattern, StackTrace, TraceFrame};
pub use types::Computation;

// Re-export core libraries for convenience
pub use alloy;
pub use revm;
