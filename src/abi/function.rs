//! ABI entries and single (non-overloaded) ABI functions
//!
//! [`AbiEntry`] is the serde image of one JSON ABI item; [`AbiFunction`]
//! wraps a function entry with its cached canonical signature, method id and
//! encoding helpers. Overload grouping lives in [`crate::abi::contract`].

use alloy::primitives::keccak256;
use serde::{Deserialize, Serialize};

use crate::abi::codec::{abi_encode, is_abi_encodable};
use crate::abi::value::AbiValue;
use crate::errors::{EncodeError, OverloadError};

/// One input/output parameter of an ABI entry
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct AbiParam {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    /// Present for tuple types
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<AbiParam>,
    /// Present for event inputs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed: Option<bool>,
}

impl AbiParam {
    /// The canonical type string, expanding tuple components
    ///
    /// `{"type": "tuple[2]", "components": [...uint256..., ...address...]}`
    /// becomes `"(uint256,address)[2]"`.
    pub fn canonical_type(&self) -> String {
        if self.components.is_empty() {
            return self.ty.clone();
        }
        let inner = self
            .components
            .iter()
            .map(AbiParam::canonical_type)
            .collect::<Vec<_>>()
            .join(",");
        let suffix = self.ty.strip_prefix("tuple").unwrap_or("");
        format!("({inner}){suffix}")
    }
}

/// One item of a JSON ABI list
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct AbiEntry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub inputs: Vec<AbiParam>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<AbiParam>,
    #[serde(
        rename = "stateMutability",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub state_mutability: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymous: Option<bool>,
}

impl AbiEntry {
    pub fn is_function(&self) -> bool {
        self.kind == "function"
    }

    pub fn is_constructor(&self) -> bool {
        self.kind == "constructor"
    }

    pub fn is_event(&self) -> bool {
        self.kind == "event"
    }
}

/// A single function in an ABI. It does not include overloads.
#[derive(Clone, Debug)]
pub struct AbiFunction {
    entry: AbiEntry,
    contract_name: String,
    argument_types: Vec<String>,
    return_types: Vec<String>,
    signature: String,
    method_id: [u8; 4],
}

impl AbiFunction {
    /// Build from a `function` or `constructor` ABI entry
    pub fn new(entry: AbiEntry, contract_name: impl Into<String>) -> Self {
        let argument_types: Vec<String> =
            entry.inputs.iter().map(AbiParam::canonical_type).collect();
        let return_types: Vec<String> =
            entry.outputs.iter().map(AbiParam::canonical_type).collect();
        let signature = format!("({})", argument_types.join(","));
        let method_id = match &entry.name {
            Some(name) => {
                let mut id = [0u8; 4];
                id.copy_from_slice(&keccak256(format!("{name}{signature}").as_bytes())[..4]);
                id
            }
            // constructors have no selector
            None => [0u8; 4],
        };
        Self {
            entry,
            contract_name: contract_name.into(),
            argument_types,
            return_types,
            signature,
            method_id,
        }
    }

    pub fn name(&self) -> Option<&str> {
        if self.is_constructor() {
            return None;
        }
        self.entry.name.as_deref()
    }

    pub fn pretty_name(&self) -> &str {
        if self.is_constructor() {
            return "constructor";
        }
        self.entry.name.as_deref().unwrap_or("<anonymous>")
    }

    pub fn entry(&self) -> &AbiEntry {
        &self.entry
    }

    pub fn is_constructor(&self) -> bool {
        self.entry.is_constructor()
    }

    /// Whether calling this function can modify state
    pub fn is_mutable(&self) -> bool {
        !matches!(
            self.entry.state_mutability.as_deref(),
            Some("view") | Some("pure")
        )
    }

    /// Canonical argument type strings, in declaration order
    pub fn argument_types(&self) -> &[String] {
        &self.argument_types
    }

    pub fn argument_count(&self) -> usize {
        self.argument_types.len()
    }

    /// The parenthesized argument tuple, e.g. `"(uint256,address)"`
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// `name(types)` form used for disambiguation
    pub fn full_signature(&self) -> String {
        format!("{}{}", self.pretty_name(), self.signature)
    }

    /// `name(types) -> (rets)` form used in diagnostics
    pub fn pretty_signature(&self) -> String {
        format!(
            "{}{} -> ({})",
            self.pretty_name(),
            self.signature,
            self.return_types.join(",")
        )
    }

    /// The 4-byte selector, `keccak256(name + signature)[..4]`
    pub fn method_id(&self) -> [u8; 4] {
        self.method_id
    }

    /// The parenthesized return schema
    pub fn return_schema(&self) -> String {
        format!("({})", self.return_types.join(","))
    }

    /// Merge positional and named arguments into declaration order
    ///
    /// Named arguments fill the trailing declared inputs, matched by input
    /// name; arity mismatches and unknown names are call-site errors.
    pub fn merge_args(
        &self,
        args: &[AbiValue],
        named: &[(&str, AbiValue)],
    ) -> Result<Vec<AbiValue>, OverloadError> {
        if args.len() + named.len() != self.argument_count() {
            return Err(OverloadError::BadArgs {
                name: format!("ABI {}.{}", self.contract_name, self.pretty_signature()),
                expected: self.argument_count(),
                got: args.len() + named.len(),
            });
        }
        let mut merged: Vec<AbiValue> = args.to_vec();
        for input in &self.entry.inputs[args.len()..] {
            let found = named
                .iter()
                .find(|(name, _)| *name == input.name)
                .map(|(_, value)| value.clone())
                .ok_or_else(|| OverloadError::MissingNamedArg {
                    arg: input.name.clone(),
                    signature: self.signature.clone(),
                })?;
            merged.push(found);
        }
        Ok(merged)
    }

    /// Check whether this function accepts the given arguments
    pub fn is_encodable(&self, args: &[AbiValue], named: &[(&str, AbiValue)]) -> bool {
        if args.len() + named.len() != self.argument_count() {
            return false;
        }
        let Ok(merged) = self.merge_args(args, named) else {
            return false;
        };
        self.argument_types
            .iter()
            .zip(&merged)
            .all(|(ty, arg)| is_abi_encodable(ty, arg))
    }

    /// Prepare the full calldata for a call to this function
    ///
    /// Constructors encode bare arguments (appended to initcode); everything
    /// else gets the 4-byte selector prefix.
    pub fn prepare_calldata(
        &self,
        args: &[AbiValue],
        named: &[(&str, AbiValue)],
    ) -> Result<Vec<u8>, crate::errors::HarnessError> {
        let merged = self.merge_args(args, named)?;
        let encoded = abi_encode(&self.signature, &merged)?;
        if self.is_constructor() {
            return Ok(encoded);
        }
        let mut calldata = Vec::with_capacity(4 + encoded.len());
        calldata.extend_from_slice(&self.method_id);
        calldata.extend_from_slice(&encoded);
        Ok(calldata)
    }

    /// Encode constructor arguments without a selector
    pub fn encode_args(&self, args: &[AbiValue]) -> Result<Vec<u8>, EncodeError> {
        abi_encode(&self.signature, args)
    }
}

impl std::fmt::Display for AbiFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ABI {}.{}", self.contract_name, self.pretty_signature())
    }
}

/// Parse a JSON ABI list into entries
pub fn parse_abi(abi_json: &str) -> Result<Vec<AbiEntry>, serde_json::Error> {
    serde_json::from_str(abi_json)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fn_entry(name: &str, inputs: &[(&str, &str)], outputs: &[&str]) -> AbiEntry {
        AbiEntry {
            kind: "function".into(),
            name: Some(name.into()),
            inputs: inputs
                .iter()
                .map(|(n, t)| AbiParam {
                    name: (*n).into(),
                    ty: (*t).into(),
                    ..Default::default()
                })
                .collect(),
            outputs: outputs
                .iter()
                .map(|t| AbiParam {
                    ty: (*t).into(),
                    ..Default::default()
                })
                .collect(),
            state_mutability: Some("nonpayable".into()),
            anonymous: None,
        }
    }

    #[test]
    fn test_method_id_matches_keccak() {
        // transfer(address,uint256) selector is the well-known 0xa9059cbb
        let f = AbiFunction::new(
            fn_entry("transfer", &[("to", "address"), ("amount", "uint256")], &["bool"]),
            "Token",
        );
        assert_eq!(f.method_id(), [0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(f.signature(), "(address,uint256)");
    }

    #[test]
    fn test_tuple_canonicalization() {
        let entry = AbiEntry {
            kind: "function".into(),
            name: Some("f".into()),
            inputs: vec![AbiParam {
                name: "p".into(),
                ty: "tuple[]".into(),
                components: vec![
                    AbiParam {
                        name: "x".into(),
                        ty: "uint256".into(),
                        ..Default::default()
                    },
                    AbiParam {
                        name: "y".into(),
                        ty: "address".into(),
                        ..Default::default()
                    },
                ],
                indexed: None,
            }],
            outputs: vec![],
            state_mutability: Some("nonpayable".into()),
            anonymous: None,
        };
        let f = AbiFunction::new(entry, "C");
        assert_eq!(f.signature(), "((uint256,address)[])");
    }

    #[test]
    fn test_merge_named_args() {
        let f = AbiFunction::new(
            fn_entry("f", &[("a", "uint256"), ("b", "uint256")], &[]),
            "C",
        );
        let merged = f
            .merge_args(&[AbiValue::from(1u64)], &[("b", AbiValue::from(2u64))])
            .unwrap();
        assert_eq!(merged, vec![AbiValue::from(1u64), AbiValue::from(2u64)]);

        // unknown name
        assert!(f
            .merge_args(&[AbiValue::from(1u64)], &[("c", AbiValue::from(2u64))])
            .is_err());
        // arity mismatch
        assert!(f.merge_args(&[AbiValue::from(1u64)], &[]).is_err());
    }

    #[test]
    fn test_view_mutability() {
        let mut entry = fn_entry("g", &[], &["uint256"]);
        entry.state_mutability = Some("view".into());
        assert!(!AbiFunction::new(entry, "C").is_mutable());
    }
}
