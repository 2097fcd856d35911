//! Contract registrations owned by the environment
//!
//! The environment owns one [`ContractRegistration`] per deployed address:
//! the ABI-derived dispatch tables, event schemas and (for compiled
//! contracts) the full artifact. Facade objects hold the same `Arc` plus an
//! address; nothing points back at the environment, so there are no cycles.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, Bytes, B256};

use crate::abi::event::{decode_log, events_by_topic, DecodedEvent};
use crate::abi::function::{AbiEntry, AbiFunction};
use crate::contract::artifact::CompilerArtifact;
use crate::errors::DecodeError;
use crate::types::RawLogEntry;

/// Everything the environment knows about one contract's interface
#[derive(Clone, Debug)]
pub struct ContractRegistration {
    pub name: String,
    pub filename: Option<String>,
    pub abi: Vec<AbiEntry>,
    /// Event topic hash → event entry
    pub events_by_topic: HashMap<B256, AbiEntry>,
    /// 4-byte selector → function
    pub methods_by_selector: HashMap<[u8; 4], AbiFunction>,
    /// Function name → overload set
    pub functions_by_name: HashMap<String, Vec<AbiFunction>>,
    /// Present for compiled-source contracts; absent for ABI-only wrappers
    pub artifact: Option<Arc<CompilerArtifact>>,
}

impl ContractRegistration {
    /// Build a registration from a bare ABI list
    pub fn from_abi(
        name: impl Into<String>,
        abi: Vec<AbiEntry>,
        filename: Option<String>,
    ) -> Self {
        let name = name.into();
        let mut methods_by_selector = HashMap::new();
        let mut functions_by_name: HashMap<String, Vec<AbiFunction>> = HashMap::new();
        for entry in abi.iter().filter(|entry| entry.is_function()) {
            let function = AbiFunction::new(entry.clone(), name.clone());
            if let Some(fn_name) = function.name() {
                functions_by_name
                    .entry(fn_name.to_string())
                    .or_default()
                    .push(function.clone());
            }
            methods_by_selector.insert(function.method_id(), function);
        }
        Self {
            events_by_topic: events_by_topic(&abi),
            methods_by_selector,
            functions_by_name,
            name,
            filename,
            abi,
            artifact: None,
        }
    }

    /// Build a registration from a full compiler artifact
    pub fn from_artifact(artifact: Arc<CompilerArtifact>) -> Self {
        let mut reg = Self::from_abi(
            artifact.contract_name.clone(),
            artifact.abi.clone(),
            artifact.filename.clone(),
        );
        reg.artifact = Some(artifact);
        reg
    }

    /// Whether this registration carries compiler artifacts (source maps)
    pub fn is_compiled(&self) -> bool {
        self.artifact.is_some()
    }

    /// The function behind a calldata selector
    pub fn method_for(&self, selector: [u8; 4]) -> Option<&AbiFunction> {
        self.methods_by_selector.get(&selector)
    }

    /// Display form used in traces and error messages
    pub fn repr(&self, address: Address) -> String {
        match &self.filename {
            Some(filename) => format!("<{} at {}> (file {})", self.name, address.to_checksum(None), filename),
            None => format!("<{} at {}>", self.name, address.to_checksum(None)),
        }
    }

    /// Decode a raw log emitted by this contract
    pub fn decode_log(&self, log: &RawLogEntry) -> Result<DecodedEvent, DecodeError> {
        decode_log(&self.events_by_topic, log)
    }
}

/// A registration bound to a deployed address
#[derive(Clone, Debug)]
pub struct RegisteredContract {
    pub reg: Arc<ContractRegistration>,
    /// Runtime bytecode observed at registration time
    pub bytecode: Bytes,
    /// Factory sender, for contracts auto-registered from a CREATE
    pub created_from: Option<Address>,
}
