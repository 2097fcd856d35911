//! Solidity-style ABI support
//!
//! - [`value`]: the dynamic [`value::AbiValue`] tree, with tagged addresses
//! - [`codec`]: schema-driven encoding/decoding and the
//!   [`codec::is_abi_encodable`] overload predicate
//! - [`function`]: ABI entries, canonical signatures and selectors
//! - [`contract`]: the ABI-only contract facade with overload resolution
//! - [`event`]: event-log decoding against known event schemas

pub mod codec;
pub mod contract;
pub mod event;
pub mod function;
pub mod value;

pub use codec::{abi_decode, abi_encode, is_abi_encodable};
pub use contract::{AbiContract, AbiContractFactory, CallOpts};
pub use event::{decode_log, DecodedEvent};
pub use function::{AbiEntry, AbiFunction, AbiParam};
pub use value::AbiValue;
