//! Storage and immutables models
//!
//! The storage model exposes each declared storage variable of a deployed
//! contract. Scalars read their slot directly. Mapping variables cannot be
//! enumerated from state alone, so they are rebuilt from the execution
//! traces: every SSTORE'd slot for the address is walked backwards through
//! the SHA3-preimage trace, recovering the `hash(hash(slot ++ k1) ++ k2)`
//! chain and with it the mapping keys.
//!
//! Immutables live in the data section appended to the runtime bytecode
//! and are decoded at their layout-supplied offsets.

use std::collections::HashMap;

use alloy::primitives::{Address, U256};

use crate::abi::value::AbiValue;
use crate::contract::artifact::{CompilerArtifact, VarType};
use crate::env::Env;
use crate::inspectors::tracers::unwrap_storage_key;
use crate::memory::FastMem;

/// A decoded storage value: a scalar leaf or a nested mapping
#[derive(Clone, Debug, PartialEq)]
pub enum StorageDump {
    Leaf(AbiValue),
    Map(Vec<(AbiValue, StorageDump)>),
}

impl StorageDump {
    /// The scalar value, if this is a leaf
    pub fn as_leaf(&self) -> Option<&AbiValue> {
        match self {
            Self::Leaf(value) => Some(value),
            Self::Map(_) => None,
        }
    }

    /// Look up a mapping entry by key
    pub fn get(&self, key: &AbiValue) -> Option<&StorageDump> {
        match self {
            Self::Map(entries) => entries
                .iter()
                .find(|(entry_key, _)| entry_key == key)
                .map(|(_, value)| value),
            Self::Leaf(_) => None,
        }
    }

    /// Number of entries at this mapping level
    pub fn len(&self) -> usize {
        match self {
            Self::Map(entries) => entries.len(),
            Self::Leaf(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace address keys with their registered aliases, for dumps
    ///
    /// Keys stay typed in the structural form so address equality keeps
    /// working; dealiasing is a rendering concern.
    pub fn dealiased(&self, env: &Env) -> StorageDump {
        match self {
            Self::Leaf(value) => Self::Leaf(value.clone()),
            Self::Map(entries) => Self::Map(
                entries
                    .iter()
                    .map(|(key, value)| {
                        let key = match key.as_address().and_then(|addr| env.lookup_alias(addr)) {
                            Some(alias) => AbiValue::String(alias.to_string()),
                            None => key.clone(),
                        };
                        (key, value.dealiased(env))
                    })
                    .collect(),
            ),
        }
    }

    fn insert_path(&mut self, path: &[AbiValue], value: AbiValue) {
        let Self::Map(entries) = self else {
            return;
        };
        let (head, rest) = match path {
            [head, rest @ ..] => (head, rest),
            [] => return,
        };
        if rest.is_empty() {
            entries.push((head.clone(), Self::Leaf(value)));
            return;
        }
        if let Some((_, nested)) = entries.iter_mut().find(|(key, _)| key == head) {
            nested.insert_path(rest, value);
            return;
        }
        let mut nested = Self::Map(Vec::new());
        nested.insert_path(rest, value);
        entries.push((head.clone(), nested));
    }
}

impl std::fmt::Display for StorageDump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Leaf(value) => write!(f, "{value}"),
            Self::Map(entries) => {
                write!(f, "{{")?;
                for (ix, (key, value)) in entries.iter().enumerate() {
                    if ix > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// One declared storage variable of a deployed contract
#[derive(Clone, Debug)]
pub struct StorageVar {
    pub name: String,
    pub slot: u64,
    pub typ: VarType,
    address: Address,
}

impl StorageVar {
    /// Read the variable's current value
    ///
    /// Scalars read state; mappings rebuild their keys from the SSTORE and
    /// SHA3 traces, skipping zero-valued leaves so cleared entries drop out.
    pub fn get(&self, env: &mut Env) -> StorageDump {
        match &self.typ {
            VarType::HashMap(..) => self.get_mapping(env),
            _ => StorageDump::Leaf(self.read_value(env, U256::from(self.slot), &self.typ)),
        }
    }

    fn read_value(&self, env: &mut Env, slot: U256, typ: &VarType) -> AbiValue {
        match typ {
            VarType::DynBytes(max) | VarType::DynString(max) => {
                // length word at the slot, data words following it
                let len = env
                    .get_storage_slot(self.address, slot)
                    .saturating_to::<usize>()
                    .min(*max);
                let mut data = Vec::with_capacity(len);
                let mut remaining = len;
                let mut word_slot = slot + U256::ONE;
                while remaining > 0 {
                    let word = env.get_storage_slot(self.address, word_slot);
                    let bytes = word.to_be_bytes::<32>();
                    data.extend_from_slice(&bytes[..remaining.min(32)]);
                    remaining = remaining.saturating_sub(32);
                    word_slot += U256::ONE;
                }
                match typ {
                    VarType::DynString(_) => {
                        AbiValue::String(String::from_utf8_lossy(&data).into_owned())
                    }
                    _ => AbiValue::Bytes(data),
                }
            }
            _ => typ.decode_word(env.get_storage_slot(self.address, slot)),
        }
    }

    fn get_mapping(&self, env: &mut Env) -> StorageDump {
        let mut ret = StorageDump::Map(Vec::new());
        let touched: Vec<U256> = env
            .sstore_trace()
            .get(&self.address)
            .map(|slots| slots.iter().copied().collect())
            .unwrap_or_default();
        let sha3_trace = env.sha3_trace().clone();

        for key in touched {
            let path = unwrap_storage_key(&sha3_trace, key);
            if path.len() < 2 {
                continue;
            }
            if U256::from_be_slice(path[0].as_slice()) != U256::from(self.slot) {
                continue;
            }

            // decode the key chain along the declared key types
            let mut decoded_path = Vec::with_capacity(path.len() - 1);
            let mut typ = &self.typ;
            let mut well_typed = true;
            for raw_key in &path[1..] {
                match typ {
                    VarType::HashMap(key_type, value_type) => {
                        let decoded = key_type.decode_word(U256::from_be_slice(raw_key.as_slice()));
                        decoded_path.push(decoded);
                        typ = value_type.as_ref();
                    }
                    _ => {
                        well_typed = false;
                        break;
                    }
                }
            }
            if !well_typed || matches!(typ, VarType::HashMap(..)) {
                continue;
            }

            let value = self.read_value(env, key, typ);
            if is_zero_value(&value) {
                continue;
            }
            ret.insert_path(&decoded_path, value);
        }
        ret
    }
}

fn is_zero_value(value: &AbiValue) -> bool {
    match value {
        AbiValue::Uint(v) => v.is_zero(),
        AbiValue::Int(v) => v.is_zero(),
        AbiValue::Bool(v) => !v,
        AbiValue::Address(addr) => addr.is_zero(),
        AbiValue::Bytes(data) => data.is_empty(),
        AbiValue::String(s) => s.is_empty(),
        AbiValue::FixedBytes(word, _) => word.is_zero(),
        AbiValue::List(items) | AbiValue::Tuple(items) => items.iter().all(is_zero_value),
    }
}

/// The storage variables declared by a contract's layout
#[derive(Clone, Debug)]
pub struct StorageModel {
    vars: HashMap<String, StorageVar>,
}

impl StorageModel {
    pub fn new(artifact: &CompilerArtifact, address: Address) -> Self {
        let vars = artifact
            .storage_layout
            .storage_layout
            .iter()
            .map(|(name, entry)| {
                (
                    name.clone(),
                    StorageVar {
                        name: name.clone(),
                        slot: entry.slot,
                        typ: entry.typ.clone(),
                        address,
                    },
                )
            })
            .collect();
        Self { vars }
    }

    /// Handle for one declared variable
    pub fn var(&self, name: &str) -> Option<&StorageVar> {
        self.vars.get(name)
    }

    /// Declared variable names
    pub fn names(&self) -> Vec<&str> {
        self.vars.keys().map(String::as_str).collect()
    }

    /// Read every variable, for storage dumps in reprs and diagnostics
    pub fn dump(&self, env: &mut Env) -> Vec<(String, StorageDump)> {
        let mut entries: Vec<(String, StorageDump)> = self
            .vars
            .values()
            .map(|var| (var.name.clone(), var.get(env)))
            .collect();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        entries
    }
}

/// Immutable variables, decoded from the runtime data section
#[derive(Clone, Debug)]
pub struct ImmutablesModel;

impl ImmutablesModel {
    /// Decode every immutable of a deployed contract
    ///
    /// The data section is the `immutable_section_bytes`-sized suffix of
    /// the deployed runtime; each variable decodes at its layout offset.
    pub fn read(
        artifact: &CompilerArtifact,
        env: &mut Env,
        address: Address,
    ) -> Vec<(String, AbiValue)> {
        let section_size = artifact.immutable_section_bytes;
        if section_size == 0 {
            return Vec::new();
        }
        let code = env.get_code(address);
        if code.len() < section_size {
            return Vec::new();
        }
        let mut section = FastMem::from_bytes(&code[code.len() - section_size..]);
        artifact
            .storage_layout
            .code_layout
            .iter()
            .map(|(name, entry)| {
                (
                    name.clone(),
                    entry.typ.decode_memory(&mut section, entry.offset),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_dump_nesting() {
        let mut dump = StorageDump::Map(Vec::new());
        let alice = AbiValue::from(1u64);
        let bob = AbiValue::from(2u64);
        dump.insert_path(
            &[alice.clone(), bob.clone()],
            AbiValue::from(10u64),
        );
        dump.insert_path(&[alice.clone(), alice.clone()], AbiValue::from(20u64));

        let inner = dump.get(&alice).unwrap();
        assert_eq!(inner.len(), 2);
        assert_eq!(
            inner.get(&bob).unwrap().as_leaf(),
            Some(&AbiValue::from(10u64))
        );
        assert_eq!(dump.to_string(), "{1: {2: 10, 1: 20}}");
    }

    #[test]
    fn test_zero_value_filter() {
        assert!(is_zero_value(&AbiValue::from(0u64)));
        assert!(is_zero_value(&AbiValue::Address(Address::ZERO)));
        assert!(!is_zero_value(&AbiValue::from(1u64)));
        assert!(!is_zero_value(&AbiValue::from("x")));
    }
}
