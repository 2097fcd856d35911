//! Compiled-source-backed contract objects
//!
//! [`ContractFactory`] wraps one compiler artifact and deploys, binds or
//! stomps contracts from it; [`Contract`] is the deployed facade: typed
//! calls with overload resolution, event-log decoding, storage and
//! immutables models, stack traces, and the synthetic-call surface (eval,
//! internal-function stubs, injected functions) driven through a
//! [`CompilerBackend`] seam.

pub mod artifact;
pub mod storage;

use std::sync::Arc;

use alloy::primitives::{Address, Bytes, U256};

use crate::abi::codec::abi_encode;
use crate::abi::contract::{marshal_output, resolve_overload, CallOpts};
use crate::abi::event::DecodedEvent;
use crate::abi::value::AbiValue;
use crate::env::registry::ContractRegistration;
use crate::env::{CallRequest, DeployRequest, Env};
use crate::errors::{HarnessError, OverloadError, SessionError};
use crate::profile::LineProfile;
use crate::trace::stack_trace::{stack_trace_for, StackTrace};
use crate::types::{Computation, RawLogEntry};
use crate::utils::blueprint_utils::blueprint_preamble;

pub use artifact::CompilerArtifact;
pub use storage::{ImmutablesModel, StorageDump, StorageModel, StorageVar};

/// A synthetic external entry point produced by a compiler backend
///
/// Used for eval statements, internal-function stubs and injected
/// functions: the harness substitutes `bytecode_runtime` for the contract's
/// code for the duration of one call and dispatches on `selector`.
#[derive(Clone, Debug)]
pub struct SyntheticCall {
    pub bytecode_runtime: Bytes,
    pub selector: [u8; 4],
    /// Parenthesized argument schema (empty tuple for eval statements)
    pub args_schema: String,
    /// Parenthesized return schema of the synthesized entry point
    pub return_schema: String,
}

/// The seam through which synthetic calls obtain compiled code
///
/// Compilation itself is out of scope for the harness; anything that can
/// turn a statement or function source into runnable bytecode in the
/// contract's namespace plugs in here.
pub trait CompilerBackend {
    /// Compile a single statement in the contract's namespace
    ///
    /// Dead-code elimination must be off so private functions the statement
    /// references survive.
    fn compile_stmt(
        &self,
        artifact: &CompilerArtifact,
        stmt: &str,
    ) -> Result<SyntheticCall, HarnessError>;

    /// Wrap an internal function in a synthetic external entry point
    fn compile_internal_stub(
        &self,
        artifact: &CompilerArtifact,
        fn_name: &str,
    ) -> Result<SyntheticCall, HarnessError>;

    /// Recompile the contract with an extra function appended
    fn compile_with_function(
        &self,
        artifact: &CompilerArtifact,
        fn_source: &str,
        force: bool,
    ) -> Result<CompilerArtifact, HarnessError>;
}

/// A decoded or raw event log from a call
#[derive(Clone, Debug)]
pub enum DecodedLog {
    Decoded(DecodedEvent),
    /// Emitter is not a registered contract; returned raw
    Raw(RawLogEntry),
}

/// Per-deploy options
#[derive(Clone, Debug, Default)]
pub struct DeployOpts {
    pub value: U256,
    pub gas: Option<u64>,
    pub sender: Option<Address>,
    pub override_address: Option<Address>,
    /// Bind without running initcode (requires an override address)
    pub skip_initcode: bool,
}

/// Deploys and binds contracts from one compiler artifact
#[derive(Clone, Debug)]
pub struct ContractFactory {
    artifact: Arc<CompilerArtifact>,
    registration: Arc<ContractRegistration>,
}

impl ContractFactory {
    pub fn from_artifact(artifact: CompilerArtifact) -> Self {
        let artifact = Arc::new(artifact);
        let registration = Arc::new(ContractRegistration::from_artifact(artifact.clone()));
        Self {
            artifact,
            registration,
        }
    }

    pub fn artifact(&self) -> &Arc<CompilerArtifact> {
        &self.artifact
    }

    /// Deploy with constructor arguments
    pub fn deploy(&self, env: &mut Env, args: &[AbiValue]) -> Result<Contract, HarnessError> {
        self.deploy_with(env, args, DeployOpts::default())
    }

    /// Deploy with full options
    ///
    /// Initcode is the artifact bytecode with ABI-encoded constructor
    /// arguments appended. `skip_initcode` installs the runtime bytecode
    /// directly at the override address instead of executing a create.
    pub fn deploy_with(
        &self,
        env: &mut Env,
        args: &[AbiValue],
        opts: DeployOpts,
    ) -> Result<Contract, HarnessError> {
        if opts.skip_initcode {
            let address = opts.override_address.ok_or_else(|| {
                SessionError("skip_initcode requires an override address".to_string())
            })?;
            return Ok(self.bind(env, address, None));
        }

        let mut initcode = self.artifact.bytecode.to_vec();
        match self.artifact.constructor() {
            Some(constructor) => {
                initcode.extend_from_slice(&constructor.encode_args(args)?);
            }
            None if !args.is_empty() => {
                return Err(OverloadError::BadArgs {
                    name: format!("{} constructor", self.artifact.contract_name),
                    expected: 0,
                    got: args.len(),
                }
                .into());
            }
            None => {}
        }

        let (address, _runtime) = env.deploy_code(DeployRequest {
            sender: opts.sender,
            value: opts.value,
            bytecode: initcode.into(),
            gas: opts.gas,
            override_address: opts.override_address,
        })?;
        Ok(self.bind(env, address, None))
    }

    /// Deploy the artifact's initcode wrapped in an ERC-5202 container
    ///
    /// The blueprint address holds the container; the runtime bytecode is
    /// also registered as a prototype so copies created from the blueprint
    /// auto-wrap.
    pub fn deploy_as_blueprint(&self, env: &mut Env) -> Result<Address, HarnessError> {
        let container = blueprint_preamble(&self.artifact.bytecode);
        if container.len() > u16::MAX as usize {
            return Err(SessionError("blueprint container too large".to_string()).into());
        }
        // PUSH2 len, RETURNDATASIZE, DUP2, PUSH1 0x0a, RETURNDATASIZE,
        // CODECOPY, RETURN -- returns the container as runtime code
        let len = (container.len() as u16).to_be_bytes();
        let mut initcode = vec![0x61, len[0], len[1], 0x3d, 0x81, 0x60, 0x0a, 0x3d, 0x39, 0xf3];
        initcode.extend_from_slice(&container);

        let (address, _runtime) = env.deploy_code(DeployRequest::new(initcode))?;
        env.register_blueprint(
            self.artifact.bytecode_runtime.clone(),
            self.registration.clone(),
        );
        Ok(address)
    }

    /// Bind to existing code at `address` without deploying
    ///
    /// Warns when the code there does not match the expected runtime
    /// (immutable data section excluded).
    pub fn at(&self, env: &mut Env, address: Address) -> Contract {
        let code = env.get_code(address);
        let section = self.artifact.immutable_section_bytes.min(code.len());
        let to_check = &code[..code.len() - section];
        if to_check != self.artifact.bytecode_runtime.as_ref() {
            tracing::warn!(
                address = %address.to_checksum(None),
                contract = self.artifact.contract_name,
                "casted bytecode does not match compiled bytecode"
            );
        }
        self.bind(env, address, None)
    }

    /// Install this contract's runtime at `address`, preserving the
    /// immutable data section of whatever code lived there
    ///
    /// Rejects when the previous code is too small to contain a data
    /// section of the expected size.
    pub fn stomp(&self, env: &mut Env, address: Address) -> Result<Contract, HarnessError> {
        let mut new_code = self.artifact.bytecode_runtime.to_vec();
        let section = self.artifact.immutable_section_bytes;
        if section > 0 {
            let old_code = env.get_code(address);
            if old_code.len() < section {
                return Err(SessionError(format!(
                    "cannot stomp {}: existing code has no {section}-byte data section",
                    address.to_checksum(None)
                ))
                .into());
            }
            new_code.extend_from_slice(&old_code[old_code.len() - section..]);
        }
        env.set_code_raw(address, &new_code);
        Ok(self.bind(env, address, None))
    }

    fn bind(&self, env: &mut Env, address: Address, created_from: Option<Address>) -> Contract {
        env.register_contract(address, self.registration.clone());
        Contract {
            address,
            artifact: self.artifact.clone(),
            registration: self.registration.clone(),
            runtime_override: None,
            created_from,
        }
    }
}

/// A deployed compiled contract
#[derive(Clone, Debug)]
pub struct Contract {
    address: Address,
    artifact: Arc<CompilerArtifact>,
    registration: Arc<ContractRegistration>,
    /// Substitute runtime for every call (injected-function contracts)
    runtime_override: Option<Bytes>,
    created_from: Option<Address>,
}

impl Contract {
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn name(&self) -> &str {
        &self.registration.name
    }

    pub fn artifact(&self) -> &Arc<CompilerArtifact> {
        &self.artifact
    }

    pub fn registration(&self) -> &Arc<ContractRegistration> {
        &self.registration
    }

    pub fn created_from(&self) -> Option<Address> {
        self.created_from
    }

    /// Display form used in traces and diagnostics
    pub fn repr(&self) -> String {
        let mut ret = self.registration.repr(self.address);
        if let Some(creator) = self.created_from {
            ret.push_str(&format!(" (created by {})", creator.to_checksum(None)));
        }
        ret
    }

    /// Call an external function with positional arguments
    pub fn call(
        &self,
        env: &mut Env,
        name: &str,
        args: &[AbiValue],
    ) -> Result<Option<AbiValue>, HarnessError> {
        self.call_with(env, name, args, CallOpts::default())
    }

    /// Call a view function (never commits state)
    pub fn view(
        &self,
        env: &mut Env,
        name: &str,
        args: &[AbiValue],
    ) -> Result<Option<AbiValue>, HarnessError> {
        let mut opts = CallOpts::default();
        opts.force_view = true;
        self.call_with(env, name, args, opts)
    }

    /// Call with full per-call options
    pub fn call_with(
        &self,
        env: &mut Env,
        name: &str,
        args: &[AbiValue],
        opts: CallOpts,
    ) -> Result<Option<AbiValue>, HarnessError> {
        let functions =
            self.registration
                .functions_by_name
                .get(name)
                .ok_or_else(|| OverloadError::NoMatch {
                    name: name.to_string(),
                })?;
        let named: Vec<(&str, AbiValue)> = opts
            .named_args
            .iter()
            .map(|(arg_name, value)| (arg_name.as_str(), value.clone()))
            .collect();
        let function = resolve_overload(
            functions,
            name,
            args,
            &named,
            opts.disambiguate_signature.as_deref(),
        )?;

        let calldata = function.prepare_calldata(args, &named)?;
        let mut request = CallRequest::to(self.address)
            .with_data(calldata)
            .with_value(opts.value);
        request.sender = opts.sender;
        request.gas = opts.gas;
        request.is_modifying = function.is_mutable() && !opts.force_view;
        request.override_bytecode = self.runtime_override.clone();

        let computation = env.execute_code(request)?;
        marshal_output(env, &computation, &function.return_schema())
    }

    /// Collect and decode the logs of a finished call
    ///
    /// Logs are ordered by emission; entries from emitters the environment
    /// knows are decoded against their event schemas, everything else is
    /// returned raw.
    pub fn get_logs(
        &self,
        env: &Env,
        computation: &Computation,
        include_child_logs: bool,
    ) -> Vec<DecodedLog> {
        let logs = if include_child_logs {
            computation.all_logs()
        } else {
            let mut own = computation.logs.clone();
            own.sort_by_key(|log| log.log_id);
            own
        };
        logs.into_iter()
            .map(|log| match env.lookup_contract(log.address) {
                Some(found) => match found.reg.decode_log(&log) {
                    Ok(decoded) => DecodedLog::Decoded(decoded),
                    Err(_) => DecodedLog::Raw(log),
                },
                None => DecodedLog::Raw(log),
            })
            .collect()
    }

    /// The storage model over this contract's declared variables
    pub fn storage(&self) -> StorageModel {
        StorageModel::new(&self.artifact, self.address)
    }

    /// Handle for one declared storage variable
    pub fn storage_var(&self, name: &str) -> Option<StorageVar> {
        self.storage().var(name).cloned()
    }

    /// Decode this contract's immutables from its data section
    pub fn immutables(&self, env: &mut Env) -> Vec<(String, AbiValue)> {
        ImmutablesModel::read(&self.artifact, env, self.address)
    }

    /// Stack trace of a failed computation against this contract
    pub fn stack_trace(&self, env: &Env, computation: &Computation) -> StackTrace {
        stack_trace_for(env, computation)
    }

    /// Line-granular gas profile of a profiled computation
    pub fn line_profile(&self, env: &Env, computation: &Computation) -> LineProfile {
        LineProfile::from_computation(env.contracts(), computation)
    }

    /// Evaluate a statement in this contract's namespace
    ///
    /// The backend compiles the statement into a synthetic entry point;
    /// the harness substitutes that bytecode for one call and decodes the
    /// declared expression type.
    pub fn eval(
        &self,
        env: &mut Env,
        compiler: &dyn CompilerBackend,
        stmt: &str,
    ) -> Result<Option<AbiValue>, HarnessError> {
        let synthetic = compiler.compile_stmt(&self.artifact, stmt)?;
        self.execute_synthetic(env, &synthetic, &[])
    }

    /// Call an internal function through a synthetic external stub
    pub fn call_internal(
        &self,
        env: &mut Env,
        compiler: &dyn CompilerBackend,
        fn_name: &str,
        args: &[AbiValue],
    ) -> Result<Option<AbiValue>, HarnessError> {
        let synthetic = compiler.compile_internal_stub(&self.artifact, fn_name)?;
        self.execute_synthetic(env, &synthetic, args)
    }

    /// Recompile with an extra function and return a facade that runs the
    /// new runtime for its calls, without altering the deployed code
    pub fn inject_function(
        &self,
        env: &mut Env,
        compiler: &dyn CompilerBackend,
        fn_source: &str,
        force: bool,
    ) -> Result<Contract, HarnessError> {
        let new_artifact = compiler.compile_with_function(&self.artifact, fn_source, force)?;
        let runtime_override = Some(new_artifact.bytecode_runtime.clone());
        let artifact = Arc::new(new_artifact);
        let registration = Arc::new(ContractRegistration::from_artifact(artifact.clone()));
        env.register_contract(self.address, registration.clone());
        Ok(Contract {
            address: self.address,
            artifact,
            registration,
            runtime_override,
            created_from: self.created_from,
        })
    }

    fn execute_synthetic(
        &self,
        env: &mut Env,
        synthetic: &SyntheticCall,
        args: &[AbiValue],
    ) -> Result<Option<AbiValue>, HarnessError> {
        let mut calldata = synthetic.selector.to_vec();
        if !args.is_empty() {
            calldata.extend_from_slice(&abi_encode(&synthetic.args_schema, args)?);
        }
        let mut request = CallRequest::to(self.address).with_data(calldata);
        request.override_bytecode = Some(synthetic.bytecode_runtime.clone());
        request.fake_codesize = Some(self.artifact.bytecode_runtime.len());
        let computation = env.execute_code(request)?;
        marshal_output(env, &computation, &synthetic.return_schema)
    }
}

impl std::fmt::Display for Contract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.repr())
    }
}

impl From<&Contract> for AbiValue {
    /// Contracts auto-unwrap to their address at ABI boundaries
    fn from(contract: &Contract) -> Self {
        AbiValue::Address(contract.address)
    }
}
