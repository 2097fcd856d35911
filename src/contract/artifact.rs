//! Compiler artifacts consumed by the harness
//!
//! Source-language compilation is out of scope; a compiler hands the
//! harness everything it needs as data: bytecode, ABI, source maps keyed by
//! PC, the storage and immutables layouts, and per-function frame layouts.
//! These types are the serde image of that artifact.

use std::collections::BTreeMap;

use alloy::primitives::{Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::abi::function::{AbiEntry, AbiFunction};
use crate::abi::value::AbiValue;
use crate::memory::FastMem;

/// A declared variable type, parsed from the compiler's type strings
///
/// Covers the single-slot scalars plus the length-prefixed byte/string
/// shapes and mapping types a storage layout can contain.
#[derive(Clone, Debug, PartialEq)]
pub enum VarType {
    Uint(usize),
    Int(usize),
    Bool,
    Address,
    /// `bytesN`
    FixedBytes(usize),
    /// `Bytes[max]`: length word followed by data words
    DynBytes(usize),
    /// `String[max]`: same layout as `Bytes`, utf-8 contents
    DynString(usize),
    /// `HashMap[key, value]`
    HashMap(Box<VarType>, Box<VarType>),
}

impl VarType {
    /// Parse a compiler type string (`"uint256"`, `"HashMap[address, uint256]"`, ...)
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Some(inner) = s.strip_prefix("HashMap[").and_then(|r| r.strip_suffix(']')) {
            let split = top_level_comma(inner)?;
            let key = Self::parse(&inner[..split])?;
            let value = Self::parse(&inner[split + 1..])?;
            return Some(Self::HashMap(Box::new(key), Box::new(value)));
        }
        if let Some(inner) = s.strip_prefix("Bytes[").and_then(|r| r.strip_suffix(']')) {
            return Some(Self::DynBytes(inner.trim().parse().ok()?));
        }
        if let Some(inner) = s.strip_prefix("String[").and_then(|r| r.strip_suffix(']')) {
            return Some(Self::DynString(inner.trim().parse().ok()?));
        }
        if let Some(bits) = s.strip_prefix("uint") {
            return Some(Self::Uint(bits.parse().ok()?));
        }
        if let Some(bits) = s.strip_prefix("int") {
            return Some(Self::Int(bits.parse().ok()?));
        }
        if s == "bool" {
            return Some(Self::Bool);
        }
        if s == "address" {
            return Some(Self::Address);
        }
        if let Some(n) = s.strip_prefix("bytes") {
            return Some(Self::FixedBytes(n.parse().ok()?));
        }
        None
    }

    /// Bytes this type occupies in a memory frame
    pub fn memory_bytes_required(&self) -> usize {
        match self {
            Self::DynBytes(max) | Self::DynString(max) => 32 + max.div_ceil(32) * 32,
            Self::HashMap(..) => 0,
            _ => 32,
        }
    }

    /// Decode a value from a single 32-byte word
    pub fn decode_word(&self, word: U256) -> AbiValue {
        match self {
            Self::Uint(_) => AbiValue::Uint(word),
            Self::Int(bits) => {
                let raw = alloy::primitives::I256::from_raw(word);
                if *bits >= 256 {
                    AbiValue::Int(raw)
                } else {
                    // sign-extend from the declared width
                    let sign_bit = U256::from(1) << (*bits - 1);
                    if word & sign_bit != U256::ZERO {
                        let extended = word | (U256::MAX << *bits);
                        AbiValue::Int(alloy::primitives::I256::from_raw(extended))
                    } else {
                        AbiValue::Int(raw)
                    }
                }
            }
            Self::Bool => AbiValue::Bool(word != U256::ZERO),
            Self::Address => {
                let bytes = word.to_be_bytes::<32>();
                AbiValue::Address(alloy::primitives::Address::from_slice(&bytes[12..]))
            }
            Self::FixedBytes(n) => {
                let bytes = word.to_be_bytes::<32>();
                AbiValue::FixedBytes(alloy::primitives::B256::from(bytes), *n)
            }
            Self::DynBytes(_) | Self::DynString(_) | Self::HashMap(..) => {
                AbiValue::Uint(word)
            }
        }
    }

    /// Decode a value laid out in memory at `pos`
    ///
    /// Length-prefixed types read their length word first; everything else
    /// is a single word.
    pub fn decode_memory(&self, mem: &mut FastMem, pos: usize) -> AbiValue {
        match self {
            Self::DynBytes(max) | Self::DynString(max) => {
                let len = mem.read_word(pos).saturating_to::<usize>().min(*max);
                let data = mem.read_bytes(pos + 32, len);
                match self {
                    Self::DynString(_) => {
                        AbiValue::String(String::from_utf8_lossy(&data).into_owned())
                    }
                    _ => AbiValue::Bytes(data),
                }
            }
            _ => self.decode_word(mem.read_word(pos)),
        }
    }
}

fn top_level_comma(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (ix, c) in s.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => return Some(ix),
            _ => {}
        }
    }
    None
}

impl Serialize for VarType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for VarType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).ok_or_else(|| serde::de::Error::custom(format!("unknown type {s:?}")))
    }
}

impl std::fmt::Display for VarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uint(bits) => write!(f, "uint{bits}"),
            Self::Int(bits) => write!(f, "int{bits}"),
            Self::Bool => write!(f, "bool"),
            Self::Address => write!(f, "address"),
            Self::FixedBytes(n) => write!(f, "bytes{n}"),
            Self::DynBytes(max) => write!(f, "Bytes[{max}]"),
            Self::DynString(max) => write!(f, "String[{max}]"),
            Self::HashMap(k, v) => write!(f, "HashMap[{k}, {v}]"),
        }
    }
}

/// PC-indexed tables emitted by the compiler
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SourceMap {
    /// `pc → (lineno, col, end_lineno, end_col)`
    #[serde(default)]
    pub pc_pos_map: BTreeMap<usize, (u32, u32, u32, u32)>,
    /// `pc → AST node id`
    #[serde(default)]
    pub pc_ast_map: BTreeMap<usize, u64>,
    /// `pc → error-hint string` ("user assert", "safeadd", ...)
    #[serde(default)]
    pub error_map: BTreeMap<usize, String>,
}

/// One storage variable's slot assignment
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SlotEntry {
    pub slot: u64,
    #[serde(rename = "type")]
    pub typ: VarType,
}

/// One immutable variable's data-section offset
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CodeEntry {
    pub offset: usize,
    #[serde(rename = "type")]
    pub typ: VarType,
}

/// Storage and code (immutables) layouts
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StorageLayout {
    #[serde(default)]
    pub storage_layout: BTreeMap<String, SlotEntry>,
    #[serde(default)]
    pub code_layout: BTreeMap<String, CodeEntry>,
}

/// One local variable in a function's memory frame
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrameVar {
    pub pos: usize,
    #[serde(rename = "type")]
    pub typ: VarType,
}

/// The memory-frame layout of one function
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FrameInfo {
    #[serde(default)]
    pub frame_start: usize,
    #[serde(default)]
    pub frame_size: usize,
    #[serde(default)]
    pub frame_vars: BTreeMap<String, FrameVar>,
}

/// Everything the compiler hands the harness for one contract
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CompilerArtifact {
    pub contract_name: String,
    /// Deploy bytecode (initcode without constructor args)
    pub bytecode: Bytes,
    /// Runtime bytecode, immutable data section excluded
    pub bytecode_runtime: Bytes,
    pub abi: Vec<AbiEntry>,
    #[serde(default)]
    pub source_code: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    /// Runtime source map
    #[serde(default)]
    pub source_map: SourceMap,
    /// Source map of the deploy (constructor) code
    #[serde(default)]
    pub deploy_source_map: SourceMap,
    #[serde(default)]
    pub storage_layout: StorageLayout,
    /// Size of the immutable data section appended to the runtime
    #[serde(default)]
    pub immutable_section_bytes: usize,
    /// Per-function memory frame layouts, keyed by function name
    #[serde(default)]
    pub function_signatures: BTreeMap<String, FrameInfo>,
}

impl CompilerArtifact {
    /// Parse an artifact from its JSON form
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// The constructor entry, if the ABI declares one
    pub fn constructor(&self) -> Option<AbiFunction> {
        self.abi
            .iter()
            .find(|entry| entry.is_constructor())
            .map(|entry| AbiFunction::new(entry.clone(), self.contract_name.clone()))
    }

    /// All external functions as resolved [`AbiFunction`]s
    pub fn functions(&self) -> Vec<AbiFunction> {
        self.abi
            .iter()
            .filter(|entry| entry.is_function())
            .map(|entry| AbiFunction::new(entry.clone(), self.contract_name.clone()))
            .collect()
    }

    /// Size in bytes of the immutable data section
    pub fn data_section_size(&self) -> usize {
        self.immutable_section_bytes
    }

    /// A source line (1-indexed), when source code is available
    pub fn source_line(&self, lineno: u32) -> Option<&str> {
        self.source_code
            .as_deref()?
            .lines()
            .nth(lineno.saturating_sub(1) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, I256};

    #[test]
    fn test_var_type_parse() {
        assert_eq!(VarType::parse("uint256"), Some(VarType::Uint(256)));
        assert_eq!(VarType::parse("bytes32"), Some(VarType::FixedBytes(32)));
        assert_eq!(VarType::parse("Bytes[64]"), Some(VarType::DynBytes(64)));
        assert_eq!(
            VarType::parse("HashMap[address, HashMap[address, uint256]]"),
            Some(VarType::HashMap(
                Box::new(VarType::Address),
                Box::new(VarType::HashMap(
                    Box::new(VarType::Address),
                    Box::new(VarType::Uint(256))
                ))
            ))
        );
        assert_eq!(VarType::parse("garbage"), None);
    }

    #[test]
    fn test_display_round_trips() {
        for s in ["uint8", "int128", "bool", "address", "bytes4", "HashMap[address, uint256]"] {
            assert_eq!(VarType::parse(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn test_decode_word_address() {
        let addr = address!("d8dA6BF26964aF9D7eEd9e03E53415D37aA96045");
        let word = U256::from_be_slice(addr.as_slice());
        assert_eq!(VarType::Address.decode_word(word), AbiValue::Address(addr));
    }

    #[test]
    fn test_decode_word_signed() {
        // -1 as int128 is 128 low bits set
        let word = (U256::from(1) << 128) - U256::from(1);
        assert_eq!(
            VarType::Int(128).decode_word(word),
            AbiValue::Int(I256::try_from(-1).unwrap())
        );
        assert_eq!(
            VarType::Int(128).decode_word(U256::from(7)),
            AbiValue::Int(I256::try_from(7).unwrap())
        );
    }

    #[test]
    fn test_artifact_json_round_trip() {
        let artifact = CompilerArtifact {
            contract_name: "Token".into(),
            bytecode: vec![0x60, 0x01].into(),
            bytecode_runtime: vec![0x60, 0x02].into(),
            storage_layout: StorageLayout {
                storage_layout: [(
                    "totalSupply".to_string(),
                    SlotEntry {
                        slot: 0,
                        typ: VarType::Uint(256),
                    },
                )]
                .into_iter()
                .collect(),
                ..Default::default()
            },
            ..Default::default()
        };
        let json = serde_json::to_string(&artifact).unwrap();
        let parsed = CompilerArtifact::from_json(&json).unwrap();
        assert_eq!(parsed.contract_name, "Token");
        assert_eq!(
            parsed.storage_layout.storage_layout["totalSupply"].typ,
            VarType::Uint(256)
        );
    }
}
