//! Blueprint (ERC-5202) container parsing and CREATE2 address derivation
//!
//! An ERC-5202 blueprint is an on-chain initcode container: a `0xFE71`
//! preamble byte pair, a version/length byte, an optional data section and
//! the wrapped initcode. Factories deploy copies of the wrapped runtime with
//! CREATE2, so the harness needs both the parser and the address formula.

use alloy::primitives::{keccak256, Address, B256};

use crate::errors::SessionError;

/// A parsed ERC-5202 blueprint container
#[derive(Clone, Debug, PartialEq)]
pub struct Blueprint {
    /// ERC version from the high bits of the third byte
    pub erc_version: u8,
    /// Preamble data section; `None` when the length-encoding bits are 0
    pub preamble_data: Option<Vec<u8>>,
    /// The wrapped initcode
    pub initcode: Vec<u8>,
}

/// Parse an ERC-5202 blueprint container
///
/// Fails on a missing magic, reserved length bits (`0b11`) or empty
/// initcode, per the ERC.
pub fn parse_erc5202(blueprint_bytecode: &[u8]) -> Result<Blueprint, SessionError> {
    if blueprint_bytecode.len() < 3 || blueprint_bytecode[..2] != [0xfe, 0x71] {
        return Err(SessionError("Not a blueprint!".to_string()));
    }

    let erc_version = (blueprint_bytecode[2] & 0b1111_1100) >> 2;

    let n_length_bytes = (blueprint_bytecode[2] & 0b11) as usize;
    if n_length_bytes == 0b11 {
        return Err(SessionError("Reserved bits are set".to_string()));
    }

    let mut data_length = 0usize;
    for byte in blueprint_bytecode.get(3..3 + n_length_bytes).ok_or_else(|| {
        SessionError("Truncated blueprint length encoding".to_string())
    })? {
        data_length = (data_length << 8) | *byte as usize;
    }

    let data_start = 3 + n_length_bytes;
    let preamble_data = if n_length_bytes == 0 {
        None
    } else {
        Some(
            blueprint_bytecode
                .get(data_start..data_start + data_length)
                .ok_or_else(|| SessionError("Truncated blueprint data section".to_string()))?
                .to_vec(),
        )
    };

    let initcode = blueprint_bytecode[data_start + data_length..].to_vec();
    if initcode.is_empty() {
        return Err(SessionError("Empty initcode!".to_string()));
    }

    Ok(Blueprint {
        erc_version,
        preamble_data,
        initcode,
    })
}

/// Wrap initcode in a version-0 ERC-5202 preamble
pub fn blueprint_preamble(initcode: &[u8]) -> Vec<u8> {
    let mut out = vec![0xfe, 0x71, 0x00];
    out.extend_from_slice(initcode);
    out
}

/// The CREATE2 address a factory would deploy a blueprint copy to
///
/// `keccak256(0xFF ++ deployer ++ salt ++ keccak256(initcode))[-20:]`,
/// where `initcode` is the blueprint's parsed initcode section.
pub fn get_create2_address(
    blueprint_bytecode: &[u8],
    deployer: Address,
    salt: B256,
) -> Result<Address, SessionError> {
    let blueprint = parse_erc5202(blueprint_bytecode)?;
    let initcode_hash = keccak256(&blueprint.initcode);

    let mut preimage = Vec::with_capacity(1 + 20 + 32 + 32);
    preimage.push(0xff);
    preimage.extend_from_slice(deployer.as_slice());
    preimage.extend_from_slice(salt.as_slice());
    preimage.extend_from_slice(initcode_hash.as_slice());

    Ok(Address::from_slice(&keccak256(&preimage)[12..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_0_no_data() {
        let container = blueprint_preamble(&[0x60, 0x00]);
        let parsed = parse_erc5202(&container).unwrap();
        assert_eq!(parsed.erc_version, 0);
        assert_eq!(parsed.preamble_data, None);
        assert_eq!(parsed.initcode, vec![0x60, 0x00]);
    }

    #[test]
    fn test_parse_with_data_section() {
        // version 1, one length byte, 2 bytes of data
        let container = [0xfe, 0x71, 0b0000_0101, 0x02, 0xaa, 0xbb, 0x60, 0x00];
        let parsed = parse_erc5202(&container).unwrap();
        assert_eq!(parsed.erc_version, 1);
        assert_eq!(parsed.preamble_data, Some(vec![0xaa, 0xbb]));
        assert_eq!(parsed.initcode, vec![0x60, 0x00]);
    }

    #[test]
    fn test_reserved_bits_rejected() {
        let container = [0xfe, 0x71, 0b0000_0011, 0x60, 0x00];
        assert!(parse_erc5202(&container).is_err());
    }

    #[test]
    fn test_empty_initcode_rejected() {
        let container = [0xfe, 0x71, 0x00];
        assert!(parse_erc5202(&container).is_err());
    }

    #[test]
    fn test_bad_magic_rejected() {
        assert!(parse_erc5202(&[0x60, 0x00, 0x00, 0x00]).is_err());
    }

    #[test]
    fn test_create2_address_changes_with_salt() {
        let container = blueprint_preamble(&[0x60, 0x00, 0x60, 0x00, 0xf3]);
        let deployer = Address::repeat_byte(0x11);
        let a = get_create2_address(&container, deployer, B256::ZERO).unwrap();
        let b = get_create2_address(&container, deployer, B256::repeat_byte(1)).unwrap();
        assert_ne!(a, b);
    }
}
