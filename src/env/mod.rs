//! The execution environment
//!
//! [`Env`] is the chain wrapper everything else drives: it owns the revm
//! instance, the journaled state cache, the contract registries, the SHA3
//! and SSTORE traces and the gas-profiling stores, and exposes the
//! contract-centric operations: deploy, call, snapshot/revert, scoped
//! anchoring, sender pranking, time travel and forking.
//!
//! One environment is one chain. Tests usually create one per test; forked
//! environments point the state backend at a live node and repoint the
//! block context at the fork block.

pub mod patch;
pub mod precompiles;
pub mod registry;

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use alloy::primitives::{keccak256, Address, Bytes, U256};
use revm::{
    context::{Context, ContextTr, TxEnv},
    context_interface::result::{ExecutionResult, Output},
    database::CacheDB,
    handler::{MainBuilder, MainContext, MainnetContext},
    primitives::{TxKind, KECCAK_EMPTY},
    state::{AccountInfo, Bytecode},
    Database, InspectCommitEvm, MainnetEvm,
};

use crate::errors::{HarnessError, InitError, RevertError, RuntimeError, SessionError};
use crate::fork::backend::{ForkBackend, StateBackend};
use crate::fork::prefetch::try_prefetch_state;
use crate::inspectors::gas::GasMeterMode;
use crate::inspectors::hook::{HookInspector, OpcodeHook, OpcodeHookMap};
use crate::inspectors::tracers::{merge_sha3, merge_sstore, Sha3Trace, SstoreTrace};
use crate::profile::ProfileStore;
use crate::trace::stack_trace::{check_error_matches, stack_trace_for, ErrorPattern};
use crate::traits::Reset;
use crate::types::{Computation, DEFAULT_GAS_LIMIT, GENESIS_TIMESTAMP};
use crate::utils::proxy_utils::{extract_eip1167_address, is_eip1167_contract};

pub use precompiles::{
    deregister_raw_precompile, register_raw_precompile, registered_precompiles, PrecompileFn,
    PrecompileInput, PrecompileMap, CONSOLE_ADDRESS,
};
pub use registry::{ContractRegistration, RegisteredContract};

/// The environment's database: a journaled cache over local or forked state
pub type HarnessDb = CacheDB<StateBackend>;

/// The fully-assembled revm instance the environment drives
pub type InnerEvm = MainnetEvm<MainnetContext<HarnessDb>, HookInspector>;

/// Newtype wrapper around the revm instance
///
/// Provides transparent access to all EVM functionality via `Deref` while
/// keeping the harness free to add its own state management around it.
pub struct HarnessEvm(pub(crate) InnerEvm);

impl Deref for HarnessEvm {
    type Target = InnerEvm;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for HarnessEvm {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Parameters of one `execute_code` call
///
/// Mirrors keyword-style call sites: construct with [`CallRequest::to`],
/// then override what the call needs.
#[derive(Clone, Debug)]
pub struct CallRequest {
    pub to: Address,
    pub sender: Option<Address>,
    pub value: U256,
    pub data: Bytes,
    pub gas: Option<u64>,
    /// Execute this bytecode at `to` instead of what is deployed there
    pub override_bytecode: Option<Bytes>,
    /// `false` runs the call without committing state
    pub is_modifying: bool,
    /// Where the recorded PC trace begins relative to the mapped bytecode
    pub start_pc: usize,
    /// What CODESIZE pretends during synthetic calls
    pub fake_codesize: Option<usize>,
}

impl CallRequest {
    pub fn to(to: Address) -> Self {
        Self {
            to,
            sender: None,
            value: U256::ZERO,
            data: Bytes::new(),
            gas: None,
            override_bytecode: None,
            is_modifying: true,
            start_pc: 0,
            fake_codesize: None,
        }
    }

    pub fn with_sender(mut self, sender: Address) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    pub fn with_gas(mut self, gas: u64) -> Self {
        self.gas = Some(gas);
        self
    }

    pub fn view(mut self) -> Self {
        self.is_modifying = false;
        self
    }
}

/// Parameters of one `deploy_code` call
#[derive(Clone, Debug, Default)]
pub struct DeployRequest {
    pub sender: Option<Address>,
    pub value: U256,
    /// Full initcode (bytecode plus encoded constructor args)
    pub bytecode: Bytes,
    pub gas: Option<u64>,
    /// Relocate the created account here after the create completes
    pub override_address: Option<Address>,
}

impl DeployRequest {
    pub fn new(bytecode: impl Into<Bytes>) -> Self {
        Self {
            bytecode: bytecode.into(),
            ..Default::default()
        }
    }
}

/// Chain wrapper with a contract-centric API
pub struct Env {
    pub(crate) evm: HarnessEvm,
    /// Default transaction sender
    eoa: Address,
    gas_price: u128,
    address_counter: u64,
    aliases: HashMap<Address, String>,
    contracts: HashMap<Address, RegisteredContract>,
    /// Blueprint registry: runtime bytecode → contract prototype
    code_registry: HashMap<Bytes, Arc<ContractRegistration>>,
    /// Cumulative SHA3 image → preimage trace
    pub(crate) sha3_trace: Sha3Trace,
    /// Cumulative storage-address → written-slots trace
    pub(crate) sstore_trace: SstoreTrace,
    gas_meter_mode: GasMeterMode,
    opcode_hooks: OpcodeHookMap,
    snapshots: Vec<HarnessDb>,
    fork_backend: Option<ForkBackend>,
    fast_mode: bool,
    pub(crate) profile: ProfileStore,
}

const INITIAL_ADDRESS_COUNTER: u64 = 100;

fn build_evm(backend: StateBackend, chain_id: u64, number: u64, timestamp: u64) -> HarnessEvm {
    let cache_db = CacheDB::new(backend);
    let mut ctx = Context::mainnet().with_db(cache_db);

    ctx.cfg.chain_id = chain_id;

    // Disable restrictions for the simulation environment
    ctx.cfg.disable_eip3607 = true; // Allow transactions from code-bearing senders
    ctx.cfg.limit_contract_code_size = None; // Remove contract size limits
    ctx.cfg.disable_block_gas_limit = true; // Remove gas limit restrictions
    ctx.cfg.disable_base_fee = true; // Disable EIP-1559 base fee

    ctx.block.number = number;
    ctx.block.timestamp = timestamp;
    ctx.block.gas_limit = DEFAULT_GAS_LIMIT;

    HarnessEvm(ctx.build_mainnet_with_inspector(HookInspector::new()))
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

impl Env {
    /// A fresh local environment with empty genesis state
    pub fn new() -> Self {
        let mut env = Self {
            evm: build_evm(StateBackend::Local, 1, 1, GENESIS_TIMESTAMP),
            eoa: Address::ZERO,
            gas_price: 0,
            address_counter: INITIAL_ADDRESS_COUNTER,
            aliases: HashMap::new(),
            contracts: HashMap::new(),
            code_registry: HashMap::new(),
            sha3_trace: Sha3Trace::default(),
            sstore_trace: SstoreTrace::default(),
            gas_meter_mode: GasMeterMode::Default,
            opcode_hooks: OpcodeHookMap::new(),
            snapshots: Vec::new(),
            fork_backend: None,
            fast_mode: false,
            profile: ProfileStore::default(),
        };
        env.eoa = env.generate_address(Some("eoa"));
        env
    }

    // ========================= Accessors =========================

    /// The default transaction sender
    pub fn eoa(&self) -> Address {
        self.eoa
    }

    pub fn set_eoa(&mut self, eoa: Address) {
        self.eoa = eoa;
    }

    pub fn gas_price(&self) -> u128 {
        self.gas_price
    }

    pub fn set_gas_price(&mut self, gas_price: u128) {
        self.gas_price = gas_price;
    }

    /// Whether the environment reads through to an upstream node
    pub fn is_forked(&self) -> bool {
        self.fork_backend.is_some()
    }

    fn sender_or_default(&self, sender: Option<Address>) -> Address {
        sender.unwrap_or(self.eoa)
    }

    // ========================= Address management =========================

    /// Generate a fresh deterministic address, optionally aliased
    ///
    /// Addresses come from a counter starting at 100, so test addresses are
    /// recognizable and reproducible across runs.
    pub fn generate_address(&mut self, alias: Option<&str>) -> Address {
        self.address_counter += 1;
        let mut bytes = [0u8; 20];
        bytes[12..].copy_from_slice(&self.address_counter.to_be_bytes());
        let address = Address::from(bytes);
        if let Some(alias) = alias {
            self.alias(address, alias);
        }
        address
    }

    /// Attach a human-readable alias to an address
    pub fn alias(&mut self, address: Address, name: &str) {
        self.aliases.insert(address, name.to_string());
    }

    /// The alias registered for an address, if any
    pub fn lookup_alias(&self, address: Address) -> Option<&str> {
        self.aliases.get(&address).map(String::as_str)
    }

    // ========================= Contract registry =========================

    /// Register a contract at an address, and its runtime bytecode in the
    /// blueprint registry so factory-created copies auto-wrap
    pub fn register_contract(&mut self, address: Address, reg: Arc<ContractRegistration>) {
        let bytecode = self.get_code(address);
        self.code_registry.insert(bytecode.clone(), reg.clone());
        self.contracts.insert(
            address,
            RegisteredContract {
                reg,
                bytecode,
                created_from: None,
            },
        );
    }

    /// Register a contract prototype against explicit runtime bytecode
    pub fn register_blueprint(&mut self, bytecode: Bytes, reg: Arc<ContractRegistration>) {
        self.code_registry.insert(bytecode, reg);
    }

    /// The contract registered at an address
    pub fn lookup_contract(&self, address: Address) -> Option<&RegisteredContract> {
        self.contracts.get(&address)
    }

    /// The prototype registered for runtime bytecode
    pub fn lookup_blueprint(&self, bytecode: &[u8]) -> Option<&Arc<ContractRegistration>> {
        self.code_registry.get(bytecode)
    }

    /// Every registered contract, by address
    pub fn contracts(&self) -> &HashMap<Address, RegisteredContract> {
        &self.contracts
    }

    /// Walk a finished computation and auto-register contracts created by
    /// CREATE frames whose runtime bytecode (or minimal-proxy target
    /// bytecode) matches a registered blueprint
    fn process_created_contracts(&mut self, computation: &Computation) {
        if computation.msg.is_create && !computation.is_error() {
            if let Some(address) = computation.created {
                let mut bytecode = self.get_code(address);
                if is_eip1167_contract(&bytecode) {
                    if let Some(target) = extract_eip1167_address(&bytecode) {
                        bytecode = self.get_code(target);
                    }
                }
                if let Some(reg) = self.code_registry.get(&bytecode).cloned() {
                    let deployed = self.get_code(address);
                    self.contracts.insert(
                        address,
                        RegisteredContract {
                            reg,
                            bytecode: deployed,
                            created_from: Some(computation.msg.sender),
                        },
                    );
                }
            }
        }
        for child in &computation.children {
            self.process_created_contracts(child);
        }
    }

    // ========================= State access =========================

    pub fn set_balance(&mut self, address: Address, balance: U256) {
        let db = self.evm.0.ctx.db();
        let mut info = db
            .basic(address)
            .ok()
            .flatten()
            .unwrap_or_default();
        info.balance = balance;
        db.insert_account_info(address, info);
    }

    pub fn get_balance(&mut self, address: Address) -> U256 {
        self.evm
            .0
            .ctx
            .db()
            .basic(address)
            .ok()
            .flatten()
            .map(|info| info.balance)
            .unwrap_or_default()
    }

    pub fn get_nonce(&mut self, address: Address) -> u64 {
        self.evm
            .0
            .ctx
            .db()
            .basic(address)
            .ok()
            .flatten()
            .map(|info| info.nonce)
            .unwrap_or_default()
    }

    /// Install runtime bytecode at an address
    ///
    /// Only valid when forked, so local writes cannot silently shadow a
    /// supposedly clean chain; the harness itself uses the unchecked
    /// variant for deploys and bytecode substitution.
    pub fn set_code(&mut self, address: Address, code: &[u8]) -> Result<(), HarnessError> {
        if !self.is_forked() {
            return Err(SessionError(
                "set_code is only valid when forked; deploy bytecode instead".to_string(),
            )
            .into());
        }
        self.set_code_raw(address, code);
        Ok(())
    }

    pub(crate) fn set_code_raw(&mut self, address: Address, code: &[u8]) {
        let db = self.evm.0.ctx.db();
        let old = db.basic(address).ok().flatten().unwrap_or_default();
        let (code_hash, bytecode) = if code.is_empty() {
            (KECCAK_EMPTY, Bytecode::default())
        } else {
            (
                keccak256(code),
                Bytecode::new_raw(Bytes::copy_from_slice(code)),
            )
        };
        db.insert_account_info(
            address,
            AccountInfo {
                balance: old.balance,
                nonce: old.nonce,
                code_hash,
                code: Some(bytecode),
            },
        );
    }

    /// Runtime bytecode at an address (empty when none)
    pub fn get_code(&mut self, address: Address) -> Bytes {
        let db = self.evm.0.ctx.db();
        let Some(info) = db.basic(address).ok().flatten() else {
            return Bytes::new();
        };
        if let Some(code) = info.code {
            return code.original_bytes();
        }
        if info.code_hash != KECCAK_EMPTY {
            if let Some(code) = db.cache.contracts.get(&info.code_hash) {
                return code.original_bytes();
            }
        }
        Bytes::new()
    }

    /// Write a storage slot directly; only valid when forked
    pub fn set_storage(
        &mut self,
        address: Address,
        slot: U256,
        value: U256,
    ) -> Result<(), HarnessError> {
        if !self.is_forked() {
            return Err(SessionError(
                "set_storage is only valid when forked; write through a contract call instead"
                    .to_string(),
            )
            .into());
        }
        self.set_storage_raw(address, slot, value)
    }

    pub(crate) fn set_storage_raw(
        &mut self,
        address: Address,
        slot: U256,
        value: U256,
    ) -> Result<(), HarnessError> {
        self.evm
            .0
            .ctx
            .db()
            .insert_account_storage(address, slot, value)
            .map_err(|e| RuntimeError::SlotAccess(e.to_string()).into())
    }

    /// Read a storage slot (fetching through to the fork when needed)
    pub fn get_storage(&mut self, address: Address, slot: U256) -> U256 {
        self.evm
            .0
            .ctx
            .db()
            .storage(address, slot)
            .unwrap_or_default()
    }

    /// Alias for [`Env::get_storage`], reading one raw slot
    pub fn get_storage_slot(&mut self, address: Address, slot: U256) -> U256 {
        self.get_storage(address, slot)
    }

    // ========================= Snapshots & scopes =========================

    /// Snapshot the journaled state; returns an id for [`Env::revert`]
    pub fn snapshot(&mut self) -> usize {
        let db = self.evm.0.ctx.db().clone();
        self.snapshots.push(db);
        self.snapshots.len() - 1
    }

    /// Restore the state captured by `snapshot`; later snapshots are dropped
    pub fn revert(&mut self, id: usize) -> Result<(), HarnessError> {
        if id >= self.snapshots.len() {
            return Err(SessionError(format!("unknown snapshot id {id}")).into());
        }
        let saved = self.snapshots[id].clone();
        self.snapshots.truncate(id);
        *self.evm.0.ctx.db() = saved;
        Ok(())
    }

    /// Run a closure with state and block context restored on every exit
    ///
    /// Both the journaled cache and all patchable block-context fields are
    /// captured on entry and written back whether the closure succeeds or
    /// fails.
    pub fn anchor<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R, HarnessError>,
    ) -> Result<R, HarnessError> {
        let saved_db = self.evm.0.ctx.db().clone();
        let saved_patch = self.patch_values();
        let result = f(self);
        *self.evm.0.ctx.db() = saved_db;
        self.apply_patch(saved_patch);
        result
    }

    /// Run a closure with the default sender temporarily overridden
    pub fn prank<R>(
        &mut self,
        sender: Address,
        f: impl FnOnce(&mut Self) -> Result<R, HarnessError>,
    ) -> Result<R, HarnessError> {
        let saved = self.eoa;
        self.eoa = sender;
        let result = f(self);
        self.eoa = saved;
        result
    }

    /// Advance time and block height consistently
    ///
    /// Exactly one of `seconds`/`blocks` must be given; the other advances
    /// at `block_delta` seconds per block (default 12).
    pub fn time_travel(
        &mut self,
        seconds: Option<i64>,
        blocks: Option<i64>,
        block_delta: Option<u64>,
    ) -> Result<(), HarnessError> {
        let block_delta = block_delta.unwrap_or(12) as i64;
        let (seconds, blocks) = match (seconds, blocks) {
            (Some(s), None) => (s, s / block_delta),
            (None, Some(b)) => (b * block_delta, b),
            _ => {
                return Err(
                    SessionError("One of seconds or blocks should be set".to_string()).into(),
                )
            }
        };
        if seconds < 0 || blocks < 0 {
            return Err(SessionError("cannot travel backwards in time".to_string()).into());
        }
        self.set_timestamp(self.timestamp() + seconds as u64);
        self.set_block_number(self.block_number() + blocks as u64);
        Ok(())
    }

    // ========================= Gas metering =========================

    pub fn gas_meter_mode(&self) -> GasMeterMode {
        self.gas_meter_mode
    }

    pub fn set_gas_meter_mode(&mut self, mode: GasMeterMode) {
        self.gas_meter_mode = mode;
    }

    /// Record per-PC gas on every execution (enables the profiler)
    pub fn enable_gas_profiling(&mut self) {
        self.gas_meter_mode = GasMeterMode::Profiling;
    }

    /// Skip per-step gas bookkeeping entirely
    pub fn disable_gas_metering(&mut self) {
        self.gas_meter_mode = GasMeterMode::NoMetering;
    }

    /// Back to the default metering behavior
    pub fn reset_gas_metering_behavior(&mut self) {
        self.gas_meter_mode = GasMeterMode::Default;
    }

    /// Prefer contracts' alternate (IR) executors when they carry one
    ///
    /// An attached executor that runs a frame reports its revert position
    /// through the computation's IR revert info, which stack traces then
    /// prefer over PC-map lookups.
    pub fn enable_fast_mode(&mut self, enabled: bool) {
        self.fast_mode = enabled;
    }

    pub fn fast_mode(&self) -> bool {
        self.fast_mode
    }

    /// Run a closure under a temporary gas-metering mode
    pub fn with_gas_meter<R>(
        &mut self,
        mode: GasMeterMode,
        f: impl FnOnce(&mut Self) -> Result<R, HarnessError>,
    ) -> Result<R, HarnessError> {
        let saved = self.gas_meter_mode;
        self.gas_meter_mode = mode;
        let result = f(self);
        self.gas_meter_mode = saved;
        result
    }

    // ========================= Opcode hooks =========================

    /// Observe an opcode: the hook runs before each matching step
    pub fn patch_opcode(&mut self, opcode: u8, hook: OpcodeHook) {
        self.opcode_hooks.insert(opcode, hook);
    }

    /// Remove an opcode hook
    pub fn unpatch_opcode(&mut self, opcode: u8) {
        self.opcode_hooks.remove(&opcode);
    }

    // ========================= Execution =========================

    fn build_tx(
        &mut self,
        sender: Address,
        kind: TxKind,
        value: U256,
        data: Bytes,
        gas: u64,
    ) -> TxEnv {
        let nonce = self.get_nonce(sender);
        let chain_id = self.chain_id();
        TxEnv::builder()
            .caller(sender)
            .kind(kind)
            .value(value)
            .data(data)
            .nonce(nonce)
            .gas_limit(gas)
            .gas_price(self.gas_price)
            .chain_id(Some(chain_id))
            .build_fill()
    }

    fn fresh_inspector(&self, start_pc: usize, fake_codesize: Option<usize>) -> HookInspector {
        // clone the installed inspector and wipe it, the same lifecycle
        // revm's by-value inspector API expects
        let mut inspector = self.evm.0.inspector.clone();
        inspector.reset();
        inspector.configure(
            registered_precompiles(),
            self.opcode_hooks.clone(),
            self.gas_meter_mode,
            start_pc,
            fake_codesize,
        );
        inspector
    }

    fn run_tx(&mut self, tx: TxEnv, inspector: HookInspector) -> Result<ExecutionResult, HarnessError> {
        let result = self
            .evm
            .0
            .inspect_commit(tx, inspector)
            .map_err(|e| RuntimeError::ExecutionFailed(e.to_string()))?;
        Ok(result)
    }

    /// Collect the computation tree and traces from the last execution
    fn collect_computation(&mut self) -> Computation {
        let computation = self
            .evm
            .0
            .inspector
            .take_computation()
            .unwrap_or_default();
        let (sha3, sstore) = self.evm.0.inspector.drain_traces();
        merge_sha3(&mut self.sha3_trace, sha3);
        merge_sstore(&mut self.sstore_trace, sstore);
        computation
    }

    /// Stamp contract reprs onto errored frames, before anything downstream
    /// mutates state further
    fn annotate_reprs(&mut self, computation: &mut Computation) {
        if computation.is_error() {
            if let Some(found) = self.lookup_contract(computation.msg.code_address) {
                computation.contract_repr_before_revert =
                    Some(found.reg.repr(computation.msg.to));
            }
        }
        let mut children = std::mem::take(&mut computation.children);
        for child in &mut children {
            self.annotate_reprs(child);
        }
        computation.children = children;
    }

    fn prefetch_if_forked(
        &mut self,
        from: Address,
        to: Option<Address>,
        value: U256,
        data: &[u8],
        gas: u64,
    ) {
        let backend = self.fork_backend.clone();
        if let Some(backend) = backend {
            let db = self.evm.0.ctx.db();
            try_prefetch_state(db, &backend, from, to, value, data, gas);
        }
    }

    /// Deploy initcode, returning the created address and runtime bytecode
    ///
    /// The create address is derived from the sender and its current nonce
    /// unless an override address is requested, in which case the created
    /// account is relocated after the create message completes. A failed
    /// deploy surfaces as a [`RevertError`]; the sender's nonce bump is
    /// kept, mirroring real-chain semantics.
    pub fn deploy_code(&mut self, req: DeployRequest) -> Result<(Address, Bytes), HarnessError> {
        let sender = self.sender_or_default(req.sender);
        let gas = req.gas.unwrap_or_else(|| self.block_gas_limit());
        tracing::debug!(%sender, initcode_len = req.bytecode.len(), "deploy_code");

        self.prefetch_if_forked(sender, None, req.value, &req.bytecode, gas);

        let tx = self.build_tx(sender, TxKind::Create, req.value, req.bytecode, gas);
        let inspector = self.fresh_inspector(0, None);
        let result = self.run_tx(tx, inspector)?;
        let mut computation = self.collect_computation();

        match result {
            ExecutionResult::Success {
                output: Output::Create(runtime, Some(mut address)),
                ..
            } => {
                if let Some(override_address) = req.override_address {
                    self.relocate_account(address, override_address);
                    address = override_address;
                }
                self.process_created_contracts(&computation);
                Ok((address, runtime))
            }
            ExecutionResult::Success { .. } => Err(RuntimeError::ExecutionFailed(
                "create transaction produced no address".to_string(),
            )
            .into()),
            ExecutionResult::Revert { .. } | ExecutionResult::Halt { .. } => {
                self.annotate_reprs(&mut computation);
                Err(RevertError {
                    stack_trace: stack_trace_for(self, &computation),
                }
                .into())
            }
        }
    }

    /// Execute calldata against an address, returning the full computation
    ///
    /// EVM-level failures are captured in `Computation::error` and do not
    /// raise; use [`Env::raw_call`] for contract-call semantics. With
    /// `is_modifying = false` the call runs against a state snapshot that
    /// is restored afterwards, so view calls cannot mutate anything. When
    /// forked, the call's prestate is prefetched best-effort first.
    pub fn execute_code(&mut self, req: CallRequest) -> Result<Computation, HarnessError> {
        let sender = self.sender_or_default(req.sender);
        let gas = req.gas.unwrap_or_else(|| self.block_gas_limit());
        tracing::debug!(%sender, to = %req.to, data_len = req.data.len(), "execute_code");

        self.prefetch_if_forked(sender, Some(req.to), req.value, &req.data, gas);

        let saved_bytecode = req.override_bytecode.as_ref().map(|code| {
            let saved = self.get_code(req.to);
            self.set_code_raw(req.to, code);
            saved
        });
        let view_snapshot = if req.is_modifying {
            None
        } else {
            Some(self.evm.0.ctx.db().clone())
        };

        let tx = self.build_tx(sender, TxKind::Call(req.to), req.value, req.data, gas);
        let inspector = self.fresh_inspector(req.start_pc, req.fake_codesize);
        let run_result = self.run_tx(tx, inspector);
        let mut computation = self.collect_computation();

        if let Some(snapshot) = view_snapshot {
            *self.evm.0.ctx.db() = snapshot;
        }
        if let Some(saved) = saved_bytecode {
            self.set_code_raw(req.to, &saved);
        }
        run_result?;

        self.process_created_contracts(&computation);
        if computation.is_error() {
            self.annotate_reprs(&mut computation);
        }
        if self.gas_meter_mode == GasMeterMode::Profiling {
            crate::profile::cache_computation(&self.contracts, &mut self.profile, &computation);
        }
        Ok(computation)
    }

    /// Like [`Env::execute_code`], but raises on failure
    ///
    /// Matches contract-call semantics: an errored computation is turned
    /// into a [`RevertError`] carrying the full stack trace.
    pub fn raw_call(&mut self, req: CallRequest) -> Result<Computation, HarnessError> {
        let computation = self.execute_code(req)?;
        if computation.is_error() {
            return Err(RevertError {
                stack_trace: stack_trace_for(self, &computation),
            }
            .into());
        }
        Ok(computation)
    }

    /// Move a created account (code, storage, balance) to another address
    fn relocate_account(&mut self, from: Address, to: Address) {
        let db = self.evm.0.ctx.db();
        if let Some(account) = db.cache.accounts.remove(&from) {
            db.cache.accounts.insert(to, account);
        }
    }

    // ========================= Revert matching =========================

    /// Expect the closure to revert with a matching reason
    ///
    /// Runs the closure; a non-revert result or a mismatched revert reason
    /// is an error, a matching [`RevertError`] is swallowed.
    pub fn reverts<R>(
        &mut self,
        pattern: ErrorPattern,
        f: impl FnOnce(&mut Self) -> Result<R, HarnessError>,
    ) -> Result<(), HarnessError> {
        match f(self) {
            Ok(_) => Err(SessionError("Did not revert".to_string()).into()),
            Err(HarnessError::Revert(err)) => {
                check_error_matches(&err, &pattern).map_err(|msg| SessionError(msg).into())
            }
            Err(other) => Err(other),
        }
    }

    // ========================= Forking =========================

    /// Fork against a live node at the latest block
    pub async fn fork(&mut self, rpc_url: &str) -> Result<(), HarnessError> {
        self.fork_at(rpc_url, "latest", false).await
    }

    /// Fork against a live node at a specific block
    ///
    /// Fails with a dirty-state error when local state is non-empty (any
    /// registered contract or cached account) unless `allow_dirty` is set.
    pub async fn fork_at(
        &mut self,
        rpc_url: &str,
        block_identifier: &str,
        allow_dirty: bool,
    ) -> Result<(), HarnessError> {
        if !allow_dirty {
            if let Some(reason) = self.dirty_state_reason() {
                return Err(InitError::DirtyState(reason).into());
            }
        }
        let backend = ForkBackend::create(rpc_url, block_identifier).await?;
        tracing::info!(
            block = backend.block_number,
            chain_id = backend.chain_id,
            "forked environment"
        );
        let (chain_id, number, timestamp) =
            (backend.chain_id, backend.block_number, backend.timestamp);
        self.evm = build_evm(
            StateBackend::Fork(backend.clone()),
            chain_id,
            number,
            timestamp,
        );
        self.fork_backend = Some(backend);
        self.sha3_trace.clear();
        self.sstore_trace.clear();
        self.snapshots.clear();
        Ok(())
    }

    fn dirty_state_reason(&mut self) -> Option<String> {
        if !self.contracts.is_empty() {
            return Some(format!("{} contract(s) deployed", self.contracts.len()));
        }
        let accounts = self.evm.0.ctx.db().cache.accounts.len();
        if accounts > 0 {
            return Some(format!("{accounts} account(s) modified"));
        }
        None
    }

    // ========================= Traces =========================

    /// The cumulative SHA3 image → preimage trace
    pub fn sha3_trace(&self) -> &Sha3Trace {
        &self.sha3_trace
    }

    /// The cumulative storage-address → written-slots trace
    pub fn sstore_trace(&self) -> &SstoreTrace {
        &self.sstore_trace
    }

    /// Accumulated profiling results (populated under profiling mode)
    pub fn profile_store(&self) -> &ProfileStore {
        &self.profile
    }
}
