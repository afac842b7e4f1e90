use crate::{chain::Block, state::StateError};
use alloy::primitives::{Address, B256, U256};
use revm::{
    state::{AccountInfo, Bytecode},
    DatabaseRef,
};
use std::sync::Arc;

/// A source of remote chain state that a node can fork from.
///
/// Implementors answer historical queries at an explicit block number. Code
/// is expected to be returned with the account, so [`code_by_hash`] is only a
/// fallback.
///
/// [`code_by_hash`]: ForkBackend::code_by_hash
pub trait ForkBackend: core::fmt::Debug + Send + Sync + 'static {
    /// Account info at `block`, or `None` if the account does not exist.
    fn account(&self, address: Address, block: u64) -> Result<Option<AccountInfo>, StateError>;

    /// Storage slot value at `block`.
    fn storage(&self, address: Address, index: U256, block: u64) -> Result<U256, StateError>;

    /// Contract code by hash.
    fn code_by_hash(&self, code_hash: B256) -> Result<Bytecode, StateError>;

    /// Hash of the block with the given number.
    fn block_hash(&self, number: u64) -> Result<B256, StateError>;

    /// The block with the given number, including its transactions.
    fn block(&self, number: u64) -> Result<Option<Block>, StateError>;
}

/// A [`ForkBackend`] pinned to a block number, usable as a revm database.
#[derive(Debug, Clone)]
pub struct ForkDb {
    backend: Arc<dyn ForkBackend>,
    block_number: u64,
}

impl ForkDb {
    /// Pin `backend` at `block_number`.
    pub fn new(backend: Arc<dyn ForkBackend>, block_number: u64) -> Self {
        Self { backend, block_number }
    }

    /// The pinned block number.
    pub const fn block_number(&self) -> u64 {
        self.block_number
    }

    /// The shared backend.
    pub const fn backend(&self) -> &Arc<dyn ForkBackend> {
        &self.backend
    }

    /// The same backend pinned at a different block.
    pub fn at(&self, block_number: u64) -> Self {
        Self { backend: self.backend.clone(), block_number }
    }
}

impl DatabaseRef for ForkDb {
    type Error = StateError;

    fn basic_ref(&self, address: Address) -> Result<Option<AccountInfo>, Self::Error> {
        self.backend.account(address, self.block_number)
    }

    fn code_by_hash_ref(&self, code_hash: B256) -> Result<Bytecode, Self::Error> {
        self.backend.code_by_hash(code_hash)
    }

    fn storage_ref(&self, address: Address, index: U256) -> Result<U256, Self::Error> {
        self.backend.storage(address, index, self.block_number)
    }

    fn block_hash_ref(&self, number: u64) -> Result<B256, Self::Error> {
        self.backend.block_hash(number)
    }
}
