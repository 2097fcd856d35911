//! Storage-key reversal, trace tables and immutables
//!
//! Exercises the SHA3-preimage and SSTORE traces end to end: a mapping
//! write's storage key is walked back to its mapping keys, and the storage
//! model rebuilds the mapping as a typed dump. Also covers immutables
//! decoding from the runtime data section.

mod common;

use common::*;
use revm_harness::alloy::primitives::{B256, U256};
use revm_harness::contract::artifact::{
    CodeEntry, CompilerArtifact, SlotEntry, StorageLayout, VarType,
};
use revm_harness::{AbiValue, ContractFactory, Env, StorageDump};

fn balance_map_artifact() -> CompilerArtifact {
    let runtime = mapping_store_runtime(3);
    CompilerArtifact {
        contract_name: "Ledger".into(),
        bytecode: initcode_for(&runtime).into(),
        bytecode_runtime: runtime.into(),
        abi: vec![function_entry(
            "setBalance",
            &[("who", "address"), ("amount", "uint256")],
            &[],
            "nonpayable",
        )],
        storage_layout: StorageLayout {
            storage_layout: [(
                "balanceOf".to_string(),
                SlotEntry {
                    slot: 3,
                    typ: VarType::HashMap(
                        Box::new(VarType::Address),
                        Box::new(VarType::Uint(256)),
                    ),
                },
            )]
            .into_iter()
            .collect(),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn test_mapping_storage_reversal() {
    let mut env = Env::new();
    let factory = ContractFactory::from_artifact(balance_map_artifact());
    let ledger = factory.deploy(&mut env, &[]).unwrap();

    let alice = env.generate_address(Some("alice"));
    let bob = env.generate_address(Some("bob"));

    ledger
        .call(
            &mut env,
            "setBalance",
            &[AbiValue::from(alice), AbiValue::from(10u64)],
        )
        .unwrap();
    ledger
        .call(
            &mut env,
            "setBalance",
            &[AbiValue::from(bob), AbiValue::from(20u64)],
        )
        .unwrap();

    // the sha3 trace saw the two 64-byte hash preimages
    assert_eq!(env.sha3_trace().len(), 2);
    // the sstore trace recorded two slots for the ledger
    assert_eq!(env.sstore_trace()[&ledger.address()].len(), 2);

    let balances = ledger.storage_var("balanceOf").unwrap().get(&mut env);
    assert_eq!(balances.len(), 2);
    assert_eq!(
        balances.get(&AbiValue::Address(alice)).unwrap().as_leaf(),
        Some(&AbiValue::from(10u64))
    );
    assert_eq!(
        balances.get(&AbiValue::Address(bob)).unwrap().as_leaf(),
        Some(&AbiValue::from(20u64))
    );
}

#[test]
fn test_mapping_zero_writes_filtered_from_dump() {
    let mut env = Env::new();
    let factory = ContractFactory::from_artifact(balance_map_artifact());
    let ledger = factory.deploy(&mut env, &[]).unwrap();

    let alice = env.generate_address(None);
    ledger
        .call(
            &mut env,
            "setBalance",
            &[AbiValue::from(alice), AbiValue::from(10u64)],
        )
        .unwrap();
    // explicit clear: the slot stays in the trace but drops from the dump
    ledger
        .call(
            &mut env,
            "setBalance",
            &[AbiValue::from(alice), AbiValue::from(0u64)],
        )
        .unwrap();

    assert_eq!(env.sstore_trace()[&ledger.address()].len(), 1);
    let balances = ledger.storage_var("balanceOf").unwrap().get(&mut env);
    assert!(balances.is_empty());
}

#[test]
fn test_scalar_storage_var() {
    let mut env = Env::new();
    let (artifact, ..) = counter_artifact();
    let factory = ContractFactory::from_artifact(artifact);
    let counter = factory.deploy(&mut env, &[AbiValue::from(77u64)]).unwrap();

    let supply = counter.storage_var("totalSupply").unwrap().get(&mut env);
    assert_eq!(supply, StorageDump::Leaf(AbiValue::from(77u64)));

    // the model dump lists every declared variable
    let dump = counter.storage().dump(&mut env);
    assert_eq!(dump.len(), 1);
    assert_eq!(dump[0].0, "totalSupply");
}

#[test]
fn test_immutables_decode_from_data_section() {
    let mut env = Env::new();

    // runtime with a 64-byte data section appended: one uint256 and one
    // address at layout offsets 0 and 32
    let owner = env.generate_address(Some("owner"));
    let runtime = five_runtime();
    let mut full_runtime = runtime.clone();
    full_runtime.extend_from_slice(&word(123));
    full_runtime.extend_from_slice(B256::left_padding_from(owner.as_slice()).as_slice());

    let artifact = CompilerArtifact {
        contract_name: "WithImmutables".into(),
        bytecode: initcode_for(&full_runtime).into(),
        bytecode_runtime: runtime.into(),
        abi: vec![function_entry("some_function", &[], &["uint256"], "view")],
        immutable_section_bytes: 64,
        storage_layout: StorageLayout {
            code_layout: [
                (
                    "fee".to_string(),
                    CodeEntry {
                        offset: 0,
                        typ: VarType::Uint(256),
                    },
                ),
                (
                    "owner".to_string(),
                    CodeEntry {
                        offset: 32,
                        typ: VarType::Address,
                    },
                ),
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        },
        ..Default::default()
    };

    let factory = ContractFactory::from_artifact(artifact);
    let contract = factory.deploy(&mut env, &[]).unwrap();

    let immutables = contract.immutables(&mut env);
    assert_eq!(immutables.len(), 2);
    let fee = immutables.iter().find(|(name, _)| name == "fee").unwrap();
    assert_eq!(fee.1, AbiValue::from(123u64));
    let owner_value = immutables.iter().find(|(name, _)| name == "owner").unwrap();
    assert_eq!(owner_value.1, AbiValue::Address(owner));

    // `at` tolerates the data section when comparing runtimes
    let rebound = factory.at(&mut env, contract.address());
    assert_eq!(rebound.address(), contract.address());
}

#[test]
fn test_stomp_preserves_data_section() {
    let mut env = Env::new();

    // deploy code with a 32-byte data section
    let runtime = five_runtime();
    let mut full_runtime = runtime.clone();
    full_runtime.extend_from_slice(&word(0xbeef));
    let (address, _) = env
        .deploy_code(revm_harness::DeployRequest::new(initcode_for(&full_runtime)))
        .unwrap();

    // stomp different logic over it, keeping the data section
    let (new_runtime, ..) = counter_runtime();
    let artifact = CompilerArtifact {
        contract_name: "Stomper".into(),
        bytecode: initcode_for(&new_runtime).into(),
        bytecode_runtime: new_runtime.clone().into(),
        abi: vec![function_entry("totalSupply", &[], &["uint256"], "view")],
        immutable_section_bytes: 32,
        ..Default::default()
    };
    let factory = ContractFactory::from_artifact(artifact);
    let stomped = factory.stomp(&mut env, address).unwrap();

    let code = env.get_code(stomped.address());
    assert_eq!(&code[..new_runtime.len()], new_runtime.as_slice());
    assert_eq!(&code[new_runtime.len()..], word(0xbeef).as_slice());

    // stomping over an address with no data section is rejected
    let empty = env.generate_address(None);
    assert!(factory.stomp(&mut env, empty).is_err());
}

#[test]
fn test_storage_get_storage_slot_matches_trace() {
    let mut env = Env::new();
    let factory = ContractFactory::from_artifact(balance_map_artifact());
    let ledger = factory.deploy(&mut env, &[]).unwrap();
    let alice = env.generate_address(None);

    ledger
        .call(
            &mut env,
            "setBalance",
            &[AbiValue::from(alice), AbiValue::from(55u64)],
        )
        .unwrap();

    // the traced slot reads back the stored value directly
    let slot = *env.sstore_trace()[&ledger.address()]
        .iter()
        .next()
        .unwrap();
    assert_eq!(
        env.get_storage_slot(ledger.address(), slot),
        U256::from(55)
    );
}

#[test]
fn test_mapping_dump_dealiases_known_addresses() {
    let mut env = Env::new();
    let factory = ContractFactory::from_artifact(balance_map_artifact());
    let ledger = factory.deploy(&mut env, &[]).unwrap();
    let alice = env.generate_address(Some("alice"));

    ledger
        .call(
            &mut env,
            "setBalance",
            &[AbiValue::from(alice), AbiValue::from(5u64)],
        )
        .unwrap();

    let balances = ledger.storage_var("balanceOf").unwrap().get(&mut env);
    let dealiased = balances.dealiased(&env);
    assert!(dealiased
        .get(&AbiValue::String("alice".into()))
        .is_some());
    // the structural dump keeps the typed address key
    assert!(balances.get(&AbiValue::Address(alice)).is_some());
}
