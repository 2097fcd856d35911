//! ABI-only contract facade
//!
//! An [`AbiContract`] wraps a deployed address with nothing but a JSON ABI:
//! function calls resolve overloads by name and argument shape, encode
//! calldata, execute through the environment and decode the return data.
//! Errors surface as revert errors carrying a stack trace.

use std::sync::Arc;

use alloy::primitives::{Address, U256};

use crate::abi::codec::abi_decode;
use crate::abi::function::{AbiEntry, AbiFunction};
use crate::abi::value::AbiValue;
use crate::env::registry::ContractRegistration;
use crate::env::{CallRequest, Env};
use crate::errors::{HarnessError, OverloadError, RevertError};
use crate::trace::stack_trace::stack_trace_for;
use crate::types::Computation;

/// Per-call options for ABI dispatch
#[derive(Clone, Debug, Default)]
pub struct CallOpts {
    pub value: U256,
    pub gas: Option<u64>,
    pub sender: Option<Address>,
    /// Arguments passed by declared input name, filling trailing positions
    pub named_args: Vec<(String, AbiValue)>,
    /// `"name(types)"` to force one overload when arguments are ambiguous
    pub disambiguate_signature: Option<String>,
    /// Force a read-only (non-committing) execution
    pub force_view: bool,
}

impl CallOpts {
    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_sender(mut self, sender: Address) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn disambiguate(mut self, signature: impl Into<String>) -> Self {
        self.disambiguate_signature = Some(signature.into());
        self
    }

    pub fn named(mut self, name: impl Into<String>, value: impl Into<AbiValue>) -> Self {
        self.named_args.push((name.into(), value.into()));
        self
    }
}

/// Pick the single overload matching the call site
///
/// With a disambiguating signature, only an exact `name(types)` match is
/// accepted. Otherwise candidates are the overloads whose arity matches and
/// whose declared types can encode every argument: exactly one candidate
/// wins, zero or many is a call-site error. A lone non-overloaded function
/// is returned as-is so its own encode errors surface directly.
pub fn resolve_overload<'a>(
    functions: &'a [AbiFunction],
    name: &str,
    args: &[AbiValue],
    named: &[(&str, AbiValue)],
    disambiguate_signature: Option<&str>,
) -> Result<&'a AbiFunction, OverloadError> {
    if let Some(signature) = disambiguate_signature {
        return functions
            .iter()
            .find(|function| function.full_signature() == signature)
            .ok_or_else(|| OverloadError::NoMatch {
                name: name.to_string(),
            });
    }
    if functions.len() == 1 {
        return Ok(&functions[0]);
    }
    let candidates: Vec<&AbiFunction> = functions
        .iter()
        .filter(|function| function.is_encodable(args, named))
        .collect();
    match candidates.as_slice() {
        [function] => Ok(function),
        [] => Err(OverloadError::NoMatch {
            name: name.to_string(),
        }),
        many => Err(OverloadError::Ambiguous {
            name: name.to_string(),
            candidates: many
                .iter()
                .map(|function| function.full_signature())
                .collect::<Vec<_>>()
                .join(", "),
        }),
    }
}

/// Decode a finished computation's output against a return schema
///
/// An errored computation becomes a [`RevertError`] with its stack trace.
/// The decoded tuple unwraps trivially: no components → `None`, one
/// component → the bare value, several → a tuple value.
pub fn marshal_output(
    env: &Env,
    computation: &Computation,
    return_schema: &str,
) -> Result<Option<AbiValue>, HarnessError> {
    if computation.is_error() {
        return Err(RevertError {
            stack_trace: stack_trace_for(env, computation),
        }
        .into());
    }
    let mut values = abi_decode(return_schema, &computation.output)?;
    Ok(match values.len() {
        0 => None,
        1 => Some(values.remove(0)),
        _ => Some(AbiValue::Tuple(values)),
    })
}

/// An ABI contract that has not been bound to an address yet
#[derive(Clone, Debug)]
pub struct AbiContractFactory {
    registration: Arc<ContractRegistration>,
}

impl AbiContractFactory {
    /// Build a factory from parsed ABI entries
    pub fn new(name: impl Into<String>, abi: Vec<AbiEntry>, filename: Option<String>) -> Self {
        Self {
            registration: Arc::new(ContractRegistration::from_abi(name, abi, filename)),
        }
    }

    /// Build a factory from a JSON ABI string
    pub fn from_abi_json(
        name: impl Into<String>,
        abi_json: &str,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            name,
            crate::abi::function::parse_abi(abi_json)?,
            None,
        ))
    }

    /// Bind the ABI to a deployed address and register it
    ///
    /// Missing bytecode at the address is suspicious but not fatal: the
    /// wrapper is still produced, with a warning.
    pub fn at(&self, env: &mut Env, address: Address) -> AbiContract {
        let code = env.get_code(address);
        if code.is_empty() {
            tracing::warn!(
                address = %address.to_checksum(None),
                contract = self.registration.name,
                "requested interface but there is no bytecode at that address"
            );
        }
        env.register_contract(address, self.registration.clone());
        AbiContract {
            address,
            registration: self.registration.clone(),
        }
    }
}

/// A deployed contract driven through its ABI
#[derive(Clone, Debug)]
pub struct AbiContract {
    address: Address,
    registration: Arc<ContractRegistration>,
}

impl AbiContract {
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn name(&self) -> &str {
        &self.registration.name
    }

    pub fn registration(&self) -> &Arc<ContractRegistration> {
        &self.registration
    }

    /// The overload set for a function name
    pub fn overloads(&self, name: &str) -> Option<&[AbiFunction]> {
        self.registration
            .functions_by_name
            .get(name)
            .map(Vec::as_slice)
    }

    /// Call `name` with positional arguments and default options
    pub fn call(
        &self,
        env: &mut Env,
        name: &str,
        args: &[AbiValue],
    ) -> Result<Option<AbiValue>, HarnessError> {
        self.call_with(env, name, args, CallOpts::default())
    }

    /// Call `name` with full per-call options
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

        let computation = env.execute_code(request)?;
        marshal_output(env, &computation, &function.return_schema())
    }
}
