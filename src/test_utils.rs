//! Helpers for testing code built on the node.

use crate::{
    call::ExecutionOptions,
    chain::Block,
    config::NodeBuilder,
    node::Node,
    state::{ForkBackend, StateError, StateManager},
    vm::Vm,
};
use alloy::{
    consensus::Header,
    eips::eip1559::INITIAL_BASE_FEE,
    primitives::{keccak256, Address, Bytes, B256, U256},
};
use revm::{
    primitives::hardfork::SpecId,
    state::{AccountInfo, Bytecode},
};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

/// Returns the word `42`.
///
/// `PUSH1 42 PUSH1 0 MSTORE PUSH1 32 PUSH1 0 RETURN`
pub const RETURN_42_CODE: &[u8] = &[0x60, 0x2a, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3];

/// Reverts with the four bytes `nope`.
///
/// `PUSH4 "nope" PUSH1 0 MSTORE PUSH1 4 PUSH1 28 REVERT`
pub const REVERT_NOPE_CODE: &[u8] =
    &[0x63, 0x6e, 0x6f, 0x70, 0x65, 0x60, 0x00, 0x52, 0x60, 0x04, 0x60, 0x1c, 0xfd];

/// Returns storage slot zero.
///
/// `PUSH1 0 SLOAD PUSH1 0 MSTORE PUSH1 32 PUSH1 0 RETURN`
pub const SLOAD_0_CODE: &[u8] =
    &[0x60, 0x00, 0x54, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3];

/// Runtime bytecode of a complete ERC20 token, balances kept in a mapping.
pub const ERC20_CODE: &[u8] = include_bytes!("../testdata/erc20.bin");

/// Execution gas of `balanceOf` on [`ERC20_CODE`] for an owner without
/// balance.
pub const ERC20_BALANCE_OF_GAS: u64 = 2447;

/// ERC20-style `balanceOf(address)` over a mapping in slot zero. Any other
/// selector reverts with no data.
pub const BALANCE_OF_CODE: &[u8] = &[
    0x60, 0x00, 0x35, 0x60, 0xe0, 0x1c, // selector
    0x63, 0x70, 0xa0, 0x82, 0x31, 0x14, 0x60, 0x13, 0x57, // balanceOf?
    0x60, 0x00, 0x80, 0xfd, // revert
    0x5b, 0x60, 0x04, 0x35, 0x60, 0x00, 0x52, // owner
    0x60, 0x00, 0x60, 0x20, 0x52, 0x60, 0x40, 0x60, 0x00, 0x20, 0x54, // balances[owner]
    0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3,
];

/// Execution gas of a [`BALANCE_OF_CODE`] call: one cold slot read.
pub const BALANCE_OF_GAS: u64 = 2219;

/// A VM over empty local state, chain id 900, Prague.
pub fn test_vm() -> Vm {
    Vm::new(StateManager::default(), 900, SpecId::PRAGUE)
}

/// A genesis-like block: 30M gas, initial base fee.
pub fn test_block() -> Block {
    Block::new(
        Header { gas_limit: 30_000_000, base_fee_per_gas: Some(INITIAL_BASE_FEE), ..Default::default() },
        vec![],
    )
}

/// Options for a call to `to` (or a create) with `data`, in [`test_block`].
pub fn call_options(to: Option<Address>, data: Bytes) -> ExecutionOptions {
    ExecutionOptions { to, data: Some(data), ..ExecutionOptions::new(Arc::new(test_block())) }
}

/// A local node with the default configuration.
pub fn test_node() -> Node {
    test_node_with(|builder| builder)
}

/// A local node with a customized configuration.
///
/// # Panics
///
/// If the configuration is invalid.
pub fn test_node_with(f: impl FnOnce(NodeBuilder) -> NodeBuilder) -> Node {
    f(NodeBuilder::new()).build().expect("invalid test node configuration")
}

#[derive(Debug, Default)]
struct MemoryForkInner {
    accounts: Mutex<HashMap<Address, AccountInfo>>,
    storage: Mutex<HashMap<(Address, U256), U256>>,
    code: Mutex<HashMap<B256, Bytecode>>,
    blocks: Mutex<HashMap<u64, Block>>,
    account_fetches: AtomicUsize,
}

/// An in-memory [`ForkBackend`]. Its state is the same at every block.
///
/// Clones share the same data and counters.
#[derive(Debug, Clone, Default)]
pub struct MemoryFork(Arc<MemoryForkInner>);

impl MemoryFork {
    /// Set an account, deploying `code` if non-empty.
    pub fn set_account(&self, address: Address, balance: U256, nonce: u64, code: Bytes) {
        let bytecode = Bytecode::new_raw(code);
        let code_hash = bytecode.hash_slow();
        let info = AccountInfo { balance, nonce, code_hash, code: Some(bytecode.clone()) };
        self.0.code.lock().unwrap().insert(code_hash, bytecode);
        self.0.accounts.lock().unwrap().insert(address, info);
    }

    /// Set a storage slot.
    pub fn set_storage(&self, address: Address, index: U256, value: U256) {
        self.0.storage.lock().unwrap().insert((address, index), value);
    }

    /// Make a block known.
    pub fn set_block(&self, block: Block) {
        self.0.blocks.lock().unwrap().insert(block.number(), block);
    }

    /// Number of account lookups served.
    pub fn account_fetches(&self) -> usize {
        self.0.account_fetches.load(Ordering::Relaxed)
    }
}

impl ForkBackend for MemoryFork {
    fn account(&self, address: Address, _block: u64) -> Result<Option<AccountInfo>, StateError> {
        self.0.account_fetches.fetch_add(1, Ordering::Relaxed);
        Ok(self.0.accounts.lock().unwrap().get(&address).cloned())
    }

    fn storage(&self, address: Address, index: U256, _block: u64) -> Result<U256, StateError> {
        Ok(self.0.storage.lock().unwrap().get(&(address, index)).copied().unwrap_or_default())
    }

    fn code_by_hash(&self, code_hash: B256) -> Result<Bytecode, StateError> {
        self.0.code.lock().unwrap().get(&code_hash).cloned().ok_or(StateError::MissingCode(code_hash))
    }

    fn block_hash(&self, number: u64) -> Result<B256, StateError> {
        Ok(self
            .0
            .blocks
            .lock()
            .unwrap()
            .get(&number)
            .map_or_else(|| keccak256(number.to_be_bytes()), Block::hash))
    }

    fn block(&self, number: u64) -> Result<Option<Block>, StateError> {
        Ok(self.0.blocks.lock().unwrap().get(&number).cloned())
    }
}
