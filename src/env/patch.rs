//! Mutable block-context patching
//!
//! The environment exposes the block-level execution context (number,
//! timestamp, coinbase, difficulty, prevrandao, chain id, gas limit, code
//! size limit) as a patchable facade. [`VmPatchValues`] is a plain snapshot
//! of all patchable fields; `anchor` captures one on entry and writes it
//! back on exit, so any patching inside the scope is undone on every exit
//! path.

use alloy::primitives::{Address, B256, U256};

use crate::env::Env;

/// A snapshot of every patchable block-context field
#[derive(Clone, Debug, PartialEq)]
pub struct VmPatchValues {
    pub block_number: u64,
    pub timestamp: u64,
    pub coinbase: Address,
    pub difficulty: U256,
    pub prevrandao: Option<B256>,
    pub chain_id: u64,
    pub gas_limit: u64,
    pub code_size_limit: Option<usize>,
}

impl Env {
    /// Current values of all patchable fields
    pub fn patch_values(&self) -> VmPatchValues {
        let block = &self.evm.0.ctx.block;
        let cfg = &self.evm.0.ctx.cfg;
        VmPatchValues {
            block_number: block.number,
            timestamp: block.timestamp,
            coinbase: block.beneficiary,
            difficulty: block.difficulty,
            prevrandao: block.prevrandao,
            chain_id: cfg.chain_id,
            gas_limit: block.gas_limit,
            code_size_limit: cfg.limit_contract_code_size,
        }
    }

    /// Write back a full snapshot of patchable fields
    pub fn apply_patch(&mut self, values: VmPatchValues) {
        let block = &mut self.evm.0.ctx.block;
        block.number = values.block_number;
        block.timestamp = values.timestamp;
        block.beneficiary = values.coinbase;
        block.difficulty = values.difficulty;
        block.prevrandao = values.prevrandao;
        block.gas_limit = values.gas_limit;
        let cfg = &mut self.evm.0.ctx.cfg;
        cfg.chain_id = values.chain_id;
        cfg.limit_contract_code_size = values.code_size_limit;
    }

    pub fn block_number(&self) -> u64 {
        self.evm.0.ctx.block.number
    }

    pub fn set_block_number(&mut self, number: u64) {
        self.evm.0.ctx.block.number = number;
    }

    pub fn timestamp(&self) -> u64 {
        self.evm.0.ctx.block.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: u64) {
        self.evm.0.ctx.block.timestamp = timestamp;
    }

    pub fn coinbase(&self) -> Address {
        self.evm.0.ctx.block.beneficiary
    }

    pub fn set_coinbase(&mut self, coinbase: Address) {
        self.evm.0.ctx.block.beneficiary = coinbase;
    }

    pub fn set_difficulty(&mut self, difficulty: U256) {
        self.evm.0.ctx.block.difficulty = difficulty;
    }

    pub fn set_prevrandao(&mut self, prevrandao: B256) {
        self.evm.0.ctx.block.prevrandao = Some(prevrandao);
    }

    pub fn chain_id(&self) -> u64 {
        self.evm.0.ctx.cfg.chain_id
    }

    pub fn set_chain_id(&mut self, chain_id: u64) {
        self.evm.0.ctx.cfg.chain_id = chain_id;
    }

    pub fn block_gas_limit(&self) -> u64 {
        self.evm.0.ctx.block.gas_limit
    }

    pub fn set_block_gas_limit(&mut self, gas_limit: u64) {
        self.evm.0.ctx.block.gas_limit = gas_limit;
    }

    pub fn set_code_size_limit(&mut self, limit: Option<usize>) {
        self.evm.0.ctx.cfg.limit_contract_code_size = limit;
    }
}
