//! ABI encoding and decoding built on alloy's dynamic ABI support
//!
//! The codec is schema driven: callers supply a canonical Solidity-style
//! schema string (e.g. `"(uint256,(address,bytes)[])"`) and an [`AbiValue`]
//! tree. Encoding performs strict fit checks so that overload resolution can
//! use [`is_abi_encodable`] as its disambiguation predicate: a value that
//! does not fit the declared width is a type mismatch, not a silent wrap.
//!
//! Decoded addresses come back as [`AbiValue::Address`] so that equality
//! against generated/checksummed addresses works without string munging.

use std::collections::HashMap;
use std::sync::Mutex;

use alloy::dyn_abi::{DynSolType, DynSolValue};
use alloy::primitives::{B256, I256, U256};
use once_cell::sync::Lazy;

use crate::abi::value::AbiValue;
use crate::errors::{DecodeError, EncodeError};

/// Cache of parsed schema strings
///
/// Schemas repeat heavily (every call through the same function re-parses
/// the same signature), so parse results are memoized process-wide.
static PARSED_SCHEMAS: Lazy<Mutex<HashMap<String, DynSolType>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Parse a canonical ABI schema string into a [`DynSolType`]
pub fn parse_schema(schema: &str) -> Result<DynSolType, EncodeError> {
    if let Some(ty) = PARSED_SCHEMAS.lock().unwrap().get(schema) {
        return Ok(ty.clone());
    }
    let ty = DynSolType::parse(schema).map_err(|e| EncodeError::InvalidSchema {
        schema: schema.to_string(),
        reason: e.to_string(),
    })?;
    PARSED_SCHEMAS
        .lock()
        .unwrap()
        .insert(schema.to_string(), ty.clone());
    Ok(ty)
}

/// Encode `values` against a parenthesized tuple schema
///
/// The schema must describe the full argument tuple (`"(t1,t2,...)"`); the
/// result is the canonical head/tail parameter encoding without a selector.
pub fn abi_encode(schema: &str, values: &[AbiValue]) -> Result<Vec<u8>, EncodeError> {
    let ty = parse_schema(schema)?;
    let DynSolType::Tuple(component_types) = &ty else {
        return Err(EncodeError::InvalidSchema {
            schema: schema.to_string(),
            reason: "argument schema must be a parenthesized tuple".to_string(),
        });
    };
    if component_types.len() != values.len() {
        return Err(EncodeError::ArityMismatch {
            abi_type: schema.to_string(),
            expected: component_types.len(),
            got: values.len(),
        });
    }
    let coerced = component_types
        .iter()
        .zip(values)
        .map(|(ty, value)| coerce(ty, value))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(DynSolValue::Tuple(coerced).abi_encode_params())
}

/// Decode `data` against a parenthesized tuple schema
///
/// Returns one [`AbiValue`] per top-level component.
pub fn abi_decode(schema: &str, data: &[u8]) -> Result<Vec<AbiValue>, DecodeError> {
    let ty = parse_schema(schema).map_err(|e| DecodeError::InvalidSchema {
        schema: schema.to_string(),
        reason: e.to_string(),
    })?;
    let decoded = ty
        .abi_decode_params(data)
        .map_err(|e| DecodeError::InvalidPayload {
            schema: schema.to_string(),
            reason: e.to_string(),
        })?;
    match decoded {
        DynSolValue::Tuple(items) => Ok(items.into_iter().map(from_dyn).collect()),
        single => Ok(vec![from_dyn(single)]),
    }
}

/// Decode a single (non-tuple) value, e.g. an indexed event topic
pub fn abi_decode_value(type_str: &str, data: &[u8]) -> Result<AbiValue, DecodeError> {
    let ty = parse_schema(type_str).map_err(|e| DecodeError::InvalidSchema {
        schema: type_str.to_string(),
        reason: e.to_string(),
    })?;
    let decoded = ty.abi_decode(data).map_err(|e| DecodeError::InvalidPayload {
        schema: type_str.to_string(),
        reason: e.to_string(),
    })?;
    Ok(from_dyn(decoded))
}

/// Whether `value` can be encoded as `type_str` without error
///
/// This is the predicate overload resolution is built on.
pub fn is_abi_encodable(type_str: &str, value: &AbiValue) -> bool {
    match parse_schema(type_str) {
        Ok(ty) => coerce(&ty, value).is_ok(),
        Err(_) => false,
    }
}

/// Coerce an [`AbiValue`] into a [`DynSolValue`] of the given type
///
/// Numeric coercions are strict: the value must fit the declared width and
/// signedness. Anything address-shaped must already be an `Address` value,
/// which is how "`.address` auto-unwrap" surfaces in a typed language: the
/// conversions on contract handles produce tagged address values.
pub fn coerce(ty: &DynSolType, value: &AbiValue) -> Result<DynSolValue, EncodeError> {
    let mismatch = || EncodeError::TypeMismatch {
        abi_type: ty.to_string(),
        value: value.to_string(),
    };
    let out_of_range = || EncodeError::ValueOutOfRange {
        abi_type: ty.to_string(),
        value: value.to_string(),
    };

    match (ty, value) {
        (DynSolType::Bool, AbiValue::Bool(v)) => Ok(DynSolValue::Bool(*v)),

        (DynSolType::Uint(bits), AbiValue::Uint(v)) => {
            if v.bit_len() > *bits {
                return Err(out_of_range());
            }
            Ok(DynSolValue::Uint(*v, *bits))
        }
        (DynSolType::Uint(bits), AbiValue::Int(v)) => {
            if v.is_negative() || v.unsigned_abs().bit_len() > *bits {
                return Err(out_of_range());
            }
            Ok(DynSolValue::Uint(v.unsigned_abs(), *bits))
        }

        (DynSolType::Int(bits), AbiValue::Int(v)) => {
            if !int_fits(*v, *bits) {
                return Err(out_of_range());
            }
            Ok(DynSolValue::Int(*v, *bits))
        }
        (DynSolType::Int(bits), AbiValue::Uint(v)) => {
            let signed = I256::try_from(*v).map_err(|_| out_of_range())?;
            if !int_fits(signed, *bits) {
                return Err(out_of_range());
            }
            Ok(DynSolValue::Int(signed, *bits))
        }

        (DynSolType::Address, AbiValue::Address(addr)) => Ok(DynSolValue::Address(*addr)),

        (DynSolType::FixedBytes(size), AbiValue::FixedBytes(word, got)) => {
            if got != size {
                return Err(mismatch());
            }
            Ok(DynSolValue::FixedBytes(*word, *size))
        }
        (DynSolType::FixedBytes(size), AbiValue::Bytes(data)) => {
            if data.len() != *size {
                return Err(mismatch());
            }
            let mut word = B256::ZERO;
            word[..*size].copy_from_slice(data);
            Ok(DynSolValue::FixedBytes(word, *size))
        }

        (DynSolType::Bytes, AbiValue::Bytes(data)) => Ok(DynSolValue::Bytes(data.clone())),
        (DynSolType::String, AbiValue::String(s)) => Ok(DynSolValue::String(s.clone())),

        (DynSolType::Array(inner), AbiValue::List(items)) => {
            let coerced = items
                .iter()
                .map(|item| coerce(inner, item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(DynSolValue::Array(coerced))
        }
        (DynSolType::FixedArray(inner, len), AbiValue::List(items)) => {
            if items.len() != *len {
                return Err(EncodeError::ArityMismatch {
                    abi_type: ty.to_string(),
                    expected: *len,
                    got: items.len(),
                });
            }
            let coerced = items
                .iter()
                .map(|item| coerce(inner, item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(DynSolValue::FixedArray(coerced))
        }

        (DynSolType::Tuple(component_types), AbiValue::Tuple(items)) => {
            if items.len() != component_types.len() {
                return Err(EncodeError::ArityMismatch {
                    abi_type: ty.to_string(),
                    expected: component_types.len(),
                    got: items.len(),
                });
            }
            let coerced = component_types
                .iter()
                .zip(items)
                .map(|(ty, item)| coerce(ty, item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(DynSolValue::Tuple(coerced))
        }

        _ => Err(mismatch()),
    }
}

fn int_fits(v: I256, bits: usize) -> bool {
    if bits >= 256 {
        return true;
    }
    let max = (I256::ONE << (bits - 1)) - I256::ONE;
    let min = -(I256::ONE << (bits - 1));
    v >= min && v <= max
}

/// Convert a decoded [`DynSolValue`] into the harness value tree
pub fn from_dyn(value: DynSolValue) -> AbiValue {
    match value {
        DynSolValue::Bool(v) => AbiValue::Bool(v),
        DynSolValue::Uint(v, _) => AbiValue::Uint(v),
        DynSolValue::Int(v, _) => AbiValue::Int(v),
        DynSolValue::Address(addr) => AbiValue::Address(addr),
        DynSolValue::FixedBytes(word, size) => AbiValue::FixedBytes(word, size),
        DynSolValue::Bytes(data) => AbiValue::Bytes(data),
        DynSolValue::String(s) => AbiValue::String(s),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => {
            AbiValue::List(items.into_iter().map(from_dyn).collect())
        }
        DynSolValue::Tuple(items) => AbiValue::Tuple(items.into_iter().map(from_dyn).collect()),
        DynSolValue::Function(func) => AbiValue::FixedBytes(B256::from_slice(&{
            let mut padded = [0u8; 32];
            padded[..24].copy_from_slice(func.as_slice());
            padded
        }), 24),
        DynSolValue::CustomStruct { tuple, .. } => {
            AbiValue::Tuple(tuple.into_iter().map(from_dyn).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[test]
    fn test_round_trip_simple() {
        let values = vec![
            AbiValue::from(100u64),
            AbiValue::from(address!("d8dA6BF26964aF9D7eEd9e03E53415D37aA96045")),
        ];
        let encoded = abi_encode("(uint256,address)", &values).unwrap();
        assert_eq!(encoded.len(), 64);
        let decoded = abi_decode("(uint256,address)", &encoded).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_round_trip_nested() {
        let values = vec![
            AbiValue::String("hello".into()),
            AbiValue::List(vec![
                AbiValue::Tuple(vec![AbiValue::from(1u64), AbiValue::Bytes(vec![1, 2, 3])]),
                AbiValue::Tuple(vec![AbiValue::from(2u64), AbiValue::Bytes(vec![])]),
            ]),
        ];
        let schema = "(string,(uint256,bytes)[])";
        let encoded = abi_encode(schema, &values).unwrap();
        let decoded = abi_decode(schema, &encoded).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_uint_width_check() {
        assert!(is_abi_encodable("uint8", &AbiValue::from(255u64)));
        assert!(!is_abi_encodable("uint8", &AbiValue::from(256u64)));
        // the overload-resolution cases: 1000 does not fit int8, -1 does
        assert!(!is_abi_encodable("int8", &AbiValue::from(1000i64)));
        assert!(is_abi_encodable("int8", &AbiValue::from(-1i64)));
        assert!(!is_abi_encodable("uint256", &AbiValue::from(-1i64)));
        assert!(is_abi_encodable("uint256", &AbiValue::from(1000i64)));
    }

    #[test]
    fn test_int_bounds() {
        assert!(is_abi_encodable("int8", &AbiValue::from(127i64)));
        assert!(!is_abi_encodable("int8", &AbiValue::from(128i64)));
        assert!(is_abi_encodable("int8", &AbiValue::from(-128i64)));
        assert!(!is_abi_encodable("int8", &AbiValue::from(-129i64)));
    }

    #[test]
    fn test_address_is_tagged_on_decode() {
        let addr = address!("C255fC198eEdAC7AF8aF0f6e0ca781794B094A61");
        let encoded = abi_encode("(address)", &[AbiValue::from(addr)]).unwrap();
        let decoded = abi_decode("(address)", &encoded).unwrap();
        assert_eq!(decoded[0].as_address(), Some(addr));
    }

    #[test]
    fn test_fixed_array_arity() {
        let schema = "(uint256[2])";
        let ok = AbiValue::List(vec![AbiValue::from(1u64), AbiValue::from(2u64)]);
        assert!(abi_encode(schema, &[ok]).is_ok());
        let bad = AbiValue::List(vec![AbiValue::from(1u64)]);
        assert!(matches!(
            abi_encode(schema, &[bad]),
            Err(EncodeError::ArityMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_tuple() {
        let encoded = abi_encode("()", &[]).unwrap();
        assert!(encoded.is_empty());
        assert!(abi_decode("()", &encoded).unwrap().is_empty());
    }
}
