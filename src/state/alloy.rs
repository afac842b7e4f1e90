use crate::{
    chain::Block,
    state::{ForkBackend, StateError},
};
use alloy::{
    eips::{BlockId, BlockNumberOrTag},
    primitives::{Address, B256, U256},
    providers::{network::Ethereum, Provider},
    transports::TransportError,
};
use core::future::Future;
use revm::state::{AccountInfo, Bytecode};
use tokio::runtime::{Handle, RuntimeFlavor};

impl From<TransportError> for StateError {
    fn from(err: TransportError) -> Self {
        Self::Fork(err.to_string())
    }
}

/// An alloy-powered [`ForkBackend`].
///
/// Every query is answered by the provider at the block it names. Queries
/// block the calling thread on the given runtime handle, so a multi-threaded
/// runtime is required when called from async code.
pub struct AlloyFork<P> {
    /// The provider to fetch the data from.
    provider: P,
    handle: Handle,
}

impl<P> core::fmt::Debug for AlloyFork<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AlloyFork").finish_non_exhaustive()
    }
}

impl<P: Provider<Ethereum>> AlloyFork<P> {
    /// A backend over `provider`, running queries on the current tokio
    /// runtime. `None` outside of a runtime.
    pub fn new(provider: P) -> Option<Self> {
        Handle::try_current().ok().map(|handle| Self::with_handle(provider, handle))
    }

    /// A backend over `provider`, running queries on `handle`.
    pub const fn with_handle(provider: P, handle: Handle) -> Self {
        Self { provider, handle }
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        match Handle::try_current() {
            Ok(current) if current.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| self.handle.block_on(fut))
            }
            _ => self.handle.block_on(fut),
        }
    }

    async fn fetch_account(&self, address: Address, block: u64) -> Result<AccountInfo, StateError> {
        let block = BlockId::number(block);
        let nonce = self.provider.get_transaction_count(address).block_id(block);
        let balance = self.provider.get_balance(address).block_id(block);
        let code = self.provider.get_code_at(address).block_id(block);

        let (nonce, balance, code) = tokio::join!(nonce, balance, code);

        let code = Bytecode::new_raw(code?);
        let code_hash = code.hash_slow();
        Ok(AccountInfo::new(balance?, nonce?, code_hash, code))
    }

    async fn fetch_block(&self, number: u64) -> Result<Option<Block>, StateError> {
        let block = self.provider.get_block_by_number(BlockNumberOrTag::Number(number)).await?;
        // fetched blocks carry no transactions; their state is read from the
        // provider at their own height
        Ok(block.map(|block| Block::with_hash(block.header.inner.clone(), block.header.hash, vec![])))
    }
}

impl<P: Provider<Ethereum> + 'static> ForkBackend for AlloyFork<P> {
    fn account(&self, address: Address, block: u64) -> Result<Option<AccountInfo>, StateError> {
        self.block_on(self.fetch_account(address, block)).map(Some)
    }

    fn storage(&self, address: Address, index: U256, block: u64) -> Result<U256, StateError> {
        let fut = self.provider.get_storage_at(address, index).block_id(BlockId::number(block));
        self.block_on(async { fut.await }).map_err(Into::into)
    }

    fn code_by_hash(&self, code_hash: B256) -> Result<Bytecode, StateError> {
        // code arrives with the account
        Err(StateError::MissingCode(code_hash))
    }

    fn block_hash(&self, number: u64) -> Result<B256, StateError> {
        self.block_on(self.fetch_block(number))?
            .map(|block| block.hash())
            .ok_or_else(|| StateError::Fork(format!("block {number} not found")))
    }

    fn block(&self, number: u64) -> Result<Option<Block>, StateError> {
        self.block_on(self.fetch_block(number))
    }
}


// This code has been adapted from the original AlloyDB implementation
// contained in revm.
// <https://github.com/bluealloy/revm>
// The original license is included below:
//
// MIT License
// Copyright (c) 2021-2025 draganrakita
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.
