//! Shared fixtures: a tiny bytecode assembler and artifact builders
//!
//! Integration tests run against hand-assembled contracts so they need no
//! compiler and no network. The helpers here emit the handful of runtime
//! shapes the tests use and the artifacts describing them.

#![allow(dead_code)]

use revm_harness::abi::function::{AbiEntry, AbiParam};
use revm_harness::alloy::primitives::U256;
use revm_harness::contract::artifact::{
    CompilerArtifact, SlotEntry, SourceMap, StorageLayout, VarType,
};

// opcode bytes used by the fixtures
pub const STOP: u8 = 0x00;
pub const ADD: u8 = 0x01;
pub const EQ: u8 = 0x14;
pub const KECCAK256: u8 = 0x20;
pub const CALLDATALOAD: u8 = 0x35;
pub const CODECOPY: u8 = 0x39;
pub const MLOAD: u8 = 0x51;
pub const MSTORE: u8 = 0x52;
pub const SLOAD: u8 = 0x54;
pub const SSTORE: u8 = 0x55;
pub const JUMPI: u8 = 0x57;
pub const JUMPDEST: u8 = 0x5b;
pub const DUP1: u8 = 0x80;
pub const SWAP1: u8 = 0x90;
pub const LOG3: u8 = 0xa3;
pub const CREATE: u8 = 0xf0;
pub const RETURN: u8 = 0xf3;
pub const REVERT: u8 = 0xfd;

/// Minimal two-pass-free assembler: callers track offsets themselves
#[derive(Default)]
pub struct Asm {
    code: Vec<u8>,
}

impl Asm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn op(mut self, opcode: u8) -> Self {
        self.code.push(opcode);
        self
    }

    /// PUSH1
    pub fn push1(mut self, value: u8) -> Self {
        self.code.extend_from_slice(&[0x60, value]);
        self
    }

    /// PUSH2
    pub fn push2(mut self, value: u16) -> Self {
        self.code.push(0x61);
        self.code.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// PUSH32
    pub fn push32(mut self, value: &[u8; 32]) -> Self {
        self.code.push(0x7f);
        self.code.extend_from_slice(value);
        self
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.code.extend_from_slice(bytes);
        self
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn build(self) -> Vec<u8> {
        self.code
    }
}

/// Initcode that just returns `runtime` as the deployed code
///
/// `PUSH2 len, PUSH2 ofst, PUSH1 0, CODECOPY, PUSH2 len, PUSH1 0, RETURN`
/// followed by the runtime bytes.
pub fn initcode_for(runtime: &[u8]) -> Vec<u8> {
    let preamble_len = 13u16;
    Asm::new()
        .push2(runtime.len() as u16)
        .push2(preamble_len)
        .push1(0)
        .op(CODECOPY)
        .push2(runtime.len() as u16)
        .push1(0)
        .op(RETURN)
        .raw(runtime)
        .build()
}

/// Initcode that stores its (appended) 32-byte constructor argument into
/// slot 0, then returns `runtime`
pub fn initcode_storing_ctor_arg(runtime: &[u8]) -> Vec<u8> {
    // fixed-size preamble; the argument sits right after the runtime
    let preamble_len = 29u16;
    let runtime_ofst = preamble_len;
    let args_ofst = preamble_len + runtime.len() as u16;
    let code = Asm::new()
        // mem[0..32] = ctor arg
        .push1(0x20)
        .push2(args_ofst)
        .push1(0)
        .op(CODECOPY)
        // slot 0 = arg
        .push1(0)
        .op(MLOAD)
        .push1(0)
        .op(SSTORE)
        // return the runtime section
        .push2(runtime.len() as u16)
        .push2(runtime_ofst)
        .push1(0)
        .op(CODECOPY)
        .push2(runtime.len() as u16)
        .push1(0)
        .op(RETURN)
        .raw(runtime)
        .build();
    assert_eq!(code.len(), preamble_len as usize + runtime.len());
    code
}

/// Counter runtime: `slot0 += calldata[4..36]; return slot0`
///
/// Reads past-the-end calldata as zero, so a bare-selector call is a read.
/// Returns the PCs of the ADD and SSTORE steps for profiling assertions.
pub fn counter_runtime() -> (Vec<u8>, usize, usize) {
    let code = Asm::new()
        .push1(0x04)
        .op(CALLDATALOAD) // arg
        .push1(0)
        .op(SLOAD) // current
        .op(ADD) // pc 6
        .op(DUP1)
        .push1(0)
        .op(SSTORE) // pc 10
        .push1(0)
        .op(MSTORE)
        .push1(0x20)
        .push1(0)
        .op(RETURN)
        .build();
    (code, 6, 10)
}

/// Revert-on-one runtime: reverts with the given payload when
/// `calldata[4..36] == 1`, stops otherwise
///
/// Returns `(runtime, revert_pc)`.
pub fn revert_on_one_runtime(payload: &[u8]) -> (Vec<u8>, usize) {
    assert!(payload.len() <= 0xff);
    let jumpdest = 10u8;
    let data_ofst = 24u16;
    let code = Asm::new()
        .push1(0x04)
        .op(CALLDATALOAD)
        .push1(0x01)
        .op(EQ)
        .push1(jumpdest)
        .op(JUMPI)
        .op(STOP)
        .op(JUMPDEST) // pc 10
        .push1(payload.len() as u8)
        .push2(data_ofst)
        .push1(0)
        .op(CODECOPY)
        .push1(payload.len() as u8)
        .push1(0)
        .op(REVERT) // pc 23
        .raw(payload)
        .build();
    (code, 23)
}

/// Mapping-write runtime: `sstore(keccak256(slot3 ++ calldata[4..36]), calldata[36..68])`
pub fn mapping_store_runtime(slot: u8) -> Vec<u8> {
    Asm::new()
        // mem[0..32] = slot
        .push1(slot)
        .push1(0)
        .op(MSTORE)
        // mem[32..64] = key
        .push1(0x04)
        .op(CALLDATALOAD)
        .push1(0x20)
        .op(MSTORE)
        // hash(slot ++ key): size below offset, offset on top
        .push1(0x40)
        .push1(0)
        .op(KECCAK256)
        // value, then swap so the slot is on top for SSTORE
        .push1(0x24)
        .op(CALLDATALOAD)
        .op(SWAP1)
        .op(SSTORE)
        .op(STOP)
        .build()
}

/// Runtime returning the constant 5 for any call
pub fn five_runtime() -> Vec<u8> {
    Asm::new()
        .push1(0x05)
        .push1(0)
        .op(MSTORE)
        .push1(0x20)
        .push1(0)
        .op(RETURN)
        .build()
}

/// Factory runtime: CREATEs `initcode` (embedded in the factory's code)
/// and returns the created address
pub fn factory_runtime(initcode: &[u8]) -> Vec<u8> {
    // preamble: CODECOPY(0, data_ofst, len), CREATE(0, 0, len),
    // MSTORE(0), RETURN(0, 32)
    let preamble_len = 25u16;
    let data_ofst = preamble_len;
    let code = Asm::new()
        .push2(initcode.len() as u16)
        .push2(data_ofst)
        .push1(0)
        .op(CODECOPY)
        // CREATE pops value (top), offset, size
        .push2(initcode.len() as u16)
        .push1(0)
        .push1(0)
        .op(CREATE)
        .push1(0)
        .op(MSTORE)
        .push1(0x20)
        .push1(0)
        .op(RETURN)
        .raw(initcode)
        .build();
    assert_eq!(code.len(), preamble_len as usize + initcode.len());
    code
}

/// Runtime emitting one LOG3 (two indexed topics plus one data word)
pub fn log3_runtime(topic0: &[u8; 32], topic1: &[u8; 32], topic2: &[u8; 32], value: u8) -> Vec<u8> {
    Asm::new()
        .push1(value)
        .push1(0)
        .op(MSTORE)
        // LOG3 pops offset, size, topic1, topic2, topic3
        .push32(topic2)
        .push32(topic1)
        .push32(topic0)
        .push1(0x20)
        .push1(0)
        .op(LOG3)
        .op(STOP)
        .build()
}

pub fn param(name: &str, ty: &str) -> AbiParam {
    AbiParam {
        name: name.into(),
        ty: ty.into(),
        ..Default::default()
    }
}

pub fn function_entry(
    name: &str,
    inputs: &[(&str, &str)],
    outputs: &[&str],
    mutability: &str,
) -> AbiEntry {
    AbiEntry {
        kind: "function".into(),
        name: Some(name.into()),
        inputs: inputs.iter().map(|(n, t)| param(n, t)).collect(),
        outputs: outputs.iter().map(|t| param("", t)).collect(),
        state_mutability: Some(mutability.into()),
        anonymous: None,
    }
}

pub fn constructor_entry(inputs: &[(&str, &str)]) -> AbiEntry {
    AbiEntry {
        kind: "constructor".into(),
        name: None,
        inputs: inputs.iter().map(|(n, t)| param(n, t)).collect(),
        outputs: vec![],
        state_mutability: Some("nonpayable".into()),
        anonymous: None,
    }
}

/// The counter contract as a full artifact: constructor stores the initial
/// supply, `totalSupply()` reads it, `update_total_supply(t)` adds to it
pub fn counter_artifact() -> (CompilerArtifact, usize, usize) {
    let (runtime, add_pc, sstore_pc) = counter_runtime();
    let mut source_map = SourceMap::default();
    // line 2 covers the calldata/sload prologue, line 3 the arithmetic
    source_map.pc_pos_map.insert(0, (2, 0, 2, 30));
    source_map.pc_pos_map.insert(add_pc, (3, 4, 3, 28));
    let artifact = CompilerArtifact {
        contract_name: "Counter".into(),
        bytecode: initcode_storing_ctor_arg(&runtime).into(),
        bytecode_runtime: runtime.into(),
        abi: vec![
            constructor_entry(&[("t", "uint256")]),
            function_entry("totalSupply", &[], &["uint256"], "view"),
            function_entry(
                "update_total_supply",
                &[("t", "uint256")],
                &["uint256"],
                "nonpayable",
            ),
        ],
        source_code: Some(
            "totalSupply: public(uint256)\n\
             def update_total_supply(t: uint256):\n\
             \x20   self.totalSupply += t\n"
                .into(),
        ),
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
        source_map,
        ..Default::default()
    };
    (artifact, add_pc, sstore_pc)
}

/// The revert-on-one contract as a full artifact with source map entries
/// at the revert site: error hint, source position and a dev-reason line
pub fn revert_artifact() -> CompilerArtifact {
    let payload = revm_harness::utils::error_utils::encode_error_string("x is 1");
    let (runtime, revert_pc) = revert_on_one_runtime(&payload);
    let mut source_map = SourceMap::default();
    source_map
        .error_map
        .insert(revert_pc, "user revert with reason".to_string());
    source_map.pc_pos_map.insert(revert_pc, (3, 8, 3, 32));

    CompilerArtifact {
        contract_name: "Reverter".into(),
        bytecode: initcode_for(&runtime).into(),
        bytecode_runtime: runtime.into(),
        abi: vec![function_entry("foo", &[("x", "uint256")], &[], "nonpayable")],
        source_code: Some(
            "def foo(x: uint256):\n\
             \x20   if x == 1:\n\
             \x20       raise  # reason: x is 1\n"
                .into(),
        ),
        source_map,
        ..Default::default()
    }
}

/// Encode a uint256 as its 32-byte big-endian word
pub fn word(value: u64) -> [u8; 32] {
    U256::from(value).to_be_bytes::<32>()
}

/// Initialize test logging once; `RUST_LOG` controls verbosity
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
