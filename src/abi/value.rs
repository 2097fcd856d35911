//! Dynamic ABI value tree
//!
//! [`AbiValue`] is the harness-side representation of Solidity-style ABI
//! values: what users pass as call arguments and what decoded returns, event
//! fields and storage reads come back as. Addresses are a dedicated variant
//! rather than hex strings, so downstream equality and alias lookups work.

use alloy::primitives::{Address, B256, I256, U256};

/// A dynamically typed ABI value
///
/// The shapes mirror the canonical ABI type grammar. Tuples cover both
/// struct-like "components" types and multi-value returns.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AbiValue {
    /// `bool`
    Bool(bool),
    /// Any `uintN`
    Uint(U256),
    /// Any `intN`
    Int(I256),
    /// `address`, kept tagged so equality is value-based
    Address(Address),
    /// `bytesN`; the word is left aligned, `usize` is the declared width
    FixedBytes(B256, usize),
    /// `bytes`
    Bytes(Vec<u8>),
    /// `string`
    String(String),
    /// `T[]` or `T[k]`
    List(Vec<AbiValue>),
    /// `(T1,...,Tn)`
    Tuple(Vec<AbiValue>),
}

impl AbiValue {
    /// Shorthand for a `bytes32` value
    pub fn bytes32(word: B256) -> Self {
        Self::FixedBytes(word, 32)
    }

    /// The contained address, if this is an address value
    pub fn as_address(&self) -> Option<Address> {
        match self {
            Self::Address(addr) => Some(*addr),
            _ => None,
        }
    }

    /// The contained unsigned integer, coercing non-negative signed values
    pub fn as_u256(&self) -> Option<U256> {
        match self {
            Self::Uint(v) => Some(*v),
            Self::Int(v) if !v.is_negative() => Some(v.unsigned_abs()),
            _ => None,
        }
    }

    /// The contained string slice, if this is a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Tuple components, if this is a tuple
    pub fn as_tuple(&self) -> Option<&[AbiValue]> {
        match self {
            Self::Tuple(items) => Some(items),
            _ => None,
        }
    }
}

impl From<bool> for AbiValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<u64> for AbiValue {
    fn from(v: u64) -> Self {
        Self::Uint(U256::from(v))
    }
}

impl From<u128> for AbiValue {
    fn from(v: u128) -> Self {
        Self::Uint(U256::from(v))
    }
}

impl From<U256> for AbiValue {
    fn from(v: U256) -> Self {
        Self::Uint(v)
    }
}

impl From<i64> for AbiValue {
    fn from(v: i64) -> Self {
        Self::Int(I256::try_from(v).expect("i64 fits I256"))
    }
}

impl From<I256> for AbiValue {
    fn from(v: I256) -> Self {
        Self::Int(v)
    }
}

impl From<Address> for AbiValue {
    fn from(v: Address) -> Self {
        Self::Address(v)
    }
}

impl From<&str> for AbiValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for AbiValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for AbiValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<B256> for AbiValue {
    fn from(v: B256) -> Self {
        Self::FixedBytes(v, 32)
    }
}

// Vec<u8> means `bytes`, so list conversions are spelled per element type
impl From<Vec<AbiValue>> for AbiValue {
    fn from(v: Vec<AbiValue>) -> Self {
        Self::List(v)
    }
}

impl From<Vec<U256>> for AbiValue {
    fn from(v: Vec<U256>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

impl From<Vec<Address>> for AbiValue {
    fn from(v: Vec<Address>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

impl std::fmt::Display for AbiValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Uint(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Address(v) => write!(f, "{}", v.to_checksum(None)),
            Self::FixedBytes(v, size) => {
                write!(f, "0x{}", alloy::primitives::hex::encode(&v[..*size]))
            }
            Self::Bytes(v) => write!(f, "0x{}", alloy::primitives::hex::encode(v)),
            Self::String(v) => write!(f, "{v:?}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (ix, item) in items.iter().enumerate() {
                    if ix > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Tuple(items) => {
                write!(f, "(")?;
                for (ix, item) in items.iter().enumerate() {
                    if ix > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[test]
    fn test_display_checksums_addresses() {
        let v = AbiValue::from(address!("d8dA6BF26964aF9D7eEd9e03E53415D37aA96045"));
        assert_eq!(v.to_string(), "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045");
    }

    #[test]
    fn test_nested_display() {
        let v = AbiValue::List(vec![
            AbiValue::from(1u64),
            AbiValue::Tuple(vec![AbiValue::from("hi"), AbiValue::Bytes(vec![0xab])]),
        ]);
        assert_eq!(v.to_string(), "[1, (\"hi\", 0xab)]");
    }

    #[test]
    fn test_as_u256_accepts_non_negative_int() {
        assert_eq!(AbiValue::from(5i64).as_u256(), Some(U256::from(5)));
        assert_eq!(AbiValue::from(-5i64).as_u256(), None);
    }
}
