//! `simulateCall`: run a call inside a historical block, after a prefix of
//! the block's transactions.

use crate::{
    call::{clone_vm_with_block, CallParams, CallResult, Prepared},
    chain::Block,
    error::{ErrorTag, HandlerError},
    fail::{maybe_throw_on_fail, TevmFailure},
    node::Node,
};
use alloy::primitives::B256;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Parameters of [`Node::simulate_call`]. Exactly one of `block_number` and
/// `block_hash` must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateCallParams {
    /// The block to simulate in, by number.
    #[serde(default, with = "alloy::serde::quantity::opt", skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    /// The block to simulate in, by hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<B256>,
    /// Run after this many of the block's transactions. All of them when
    /// unset.
    #[serde(default, with = "alloy::serde::quantity::opt", skip_serializing_if = "Option::is_none")]
    pub transaction_index: Option<u64>,
    /// The call. Admission fields are ignored.
    #[serde(flatten)]
    pub call: CallParams,
}

fn unknown_block(what: impl core::fmt::Display) -> HandlerError {
    HandlerError::new(ErrorTag::UnknownBlock, format!("block {what} not found"))
}

impl Node {
    /// Simulate a call at a point inside a historical block.
    #[instrument(skip_all, fields(number = ?params.block_number, hash = ?params.block_hash))]
    pub async fn simulate_call(&self, params: SimulateCallParams) -> Result<CallResult, TevmFailure> {
        let throw_on_fail = params.call.throws();
        let result = match self.prepare_simulation(&params).await {
            Ok(prepared) => {
                let call = CallParams {
                    create_transaction: None,
                    add_to_mempool: None,
                    add_to_blockchain: None,
                    ..params.call
                };
                self.dispatch(&call, Some(prepared)).await
            }
            Err(err) => CallResult::from_error(err),
        };
        maybe_throw_on_fail(throw_on_fail, result)
    }

    async fn prepare_simulation(&self, params: &SimulateCallParams) -> Result<Prepared, HandlerError> {
        let block = match (params.block_number, params.block_hash) {
            (Some(number), None) => self.block_by_number(number).await?,
            (None, Some(hash)) => self.chain().read().await.get_block(hash).ok_or_else(|| unknown_block(hash))?,
            _ => {
                return Err(HandlerError::invalid_params(
                    "exactly one of blockNumber and blockHash must be set",
                ))
            }
        };

        let txs = block.transactions();
        let prefix = params.transaction_index.map_or(txs.len(), |index| txs.len().min(index as usize));

        // without transactions the block's post-state is its pre-state
        let base = if txs.is_empty() {
            block.clone()
        } else {
            match self.chain().read().await.get_block(block.header().parent_hash) {
                Some(parent) => parent,
                None => self.block_by_number(block.number().saturating_sub(1)).await?,
            }
        };

        let head = self.head().await;
        let mut vm = {
            let live = self.vm().read().await;
            clone_vm_with_block(&live, &head, &base)?
        };

        debug!(number = block.number(), prefix, "replaying block prefix");
        for tx in &txs[..prefix] {
            vm.run_tx(&block, tx).map_err(|err| {
                HandlerError::unexpected(format!("failed to replay transaction {}: {err}", tx.hash()))
            })?;
        }
        Ok(Prepared { vm, block })
    }

    /// A canonical block by number, fetched from the fork and cached when
    /// it predates the local chain.
    pub(crate) async fn block_by_number(&self, number: u64) -> Result<Arc<Block>, HandlerError> {
        if let Some(block) = self.chain().read().await.get_block_by_number(number) {
            return Ok(block);
        }
        let fork = self.config().fork.as_ref().ok_or_else(|| unknown_block(number))?;
        if number > fork.block_number {
            return Err(unknown_block(number));
        }

        let block = fork.backend.block(number)?.ok_or_else(|| unknown_block(number))?;
        debug!(number, hash = %block.hash(), "fetched block from the fork");
        Ok(self.chain().write().await.insert_historical(block))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        call::{AccountOverride, CreateTransaction},
        test_utils::{self, MemoryFork},
    };
    use alloy::{
        consensus::Header,
        primitives::{Address, Bytes, U256},
    };
    use std::collections::BTreeMap;

    const RECIPIENT: Address = Address::repeat_byte(0x69);
    const READER: Address = Address::repeat_byte(0x42);

    /// `PUSH20 RECIPIENT BALANCE PUSH1 0 MSTORE PUSH1 32 PUSH1 0 RETURN`
    fn balance_reader() -> Bytes {
        let mut code = vec![0x73];
        code.extend_from_slice(RECIPIENT.as_slice());
        code.extend_from_slice(&[0x31, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3]);
        code.into()
    }

    fn read_balance(block_number: u64, transaction_index: Option<u64>) -> SimulateCallParams {
        let mut overrides = BTreeMap::new();
        overrides.insert(READER, AccountOverride { code: Some(balance_reader()), ..Default::default() });
        SimulateCallParams {
            block_number: Some(block_number),
            transaction_index,
            call: CallParams { state_override_set: Some(overrides), ..CallParams::to(READER) },
            ..Default::default()
        }
    }

    fn word(value: u64) -> Bytes {
        Bytes::copy_from_slice(&U256::from(value).to_be_bytes::<32>())
    }

    async fn mined_node() -> Node {
        let node = test_utils::test_node();
        for value in [1, 2] {
            node.call(CallParams {
                to: Some(RECIPIENT),
                value: Some(U256::from(value)),
                skip_balance: Some(true),
                create_transaction: Some(CreateTransaction::Always),
                ..Default::default()
            })
            .await
            .unwrap();
        }
        node.mine_blocks(1).await.unwrap();
        node
    }

    #[tokio::test]
    async fn replays_a_prefix() {
        let node = mined_node().await;
        assert_eq!(node.simulate_call(read_balance(1, Some(0))).await.unwrap().raw_data, word(0));
        assert_eq!(node.simulate_call(read_balance(1, Some(1))).await.unwrap().raw_data, word(1));
        assert_eq!(node.simulate_call(read_balance(1, None)).await.unwrap().raw_data, word(3));
        assert_eq!(node.simulate_call(read_balance(1, Some(99))).await.unwrap().raw_data, word(3));
    }

    #[tokio::test]
    async fn by_hash_and_admission_ignored() {
        let node = mined_node().await;
        let head = node.head().await;
        let mut params = read_balance(1, Some(1));
        params.block_number = None;
        params.block_hash = Some(head.hash());
        params.call.create_transaction = Some(CreateTransaction::Always);

        let result = node.simulate_call(params).await.unwrap();
        assert_eq!(result.raw_data, word(1));
        assert!(result.tx_hash.is_none());
        assert!(node.pool().is_empty().await);
    }

    #[tokio::test]
    async fn unknown_and_ambiguous_blocks() {
        let node = test_utils::test_node();
        let err = node.simulate_call(read_balance(5, None)).await.unwrap_err();
        assert_eq!(err.errors()[0].tag, ErrorTag::UnknownBlock);

        let mut both = read_balance(0, None);
        both.block_hash = Some(B256::ZERO);
        let err = node.simulate_call(both).await.unwrap_err();
        assert_eq!(err.errors()[0].tag, ErrorTag::InvalidParams);
    }

    #[tokio::test]
    async fn historical_fork_block_is_fetched() {
        let fork = MemoryFork::default();
        fork.set_account(RECIPIENT, U256::from(77), 0, Bytes::new());
        for number in [8, 10] {
            let header = Header {
                number,
                state_root: B256::with_last_byte(number as u8),
                gas_limit: 30_000_000,
                ..Default::default()
            };
            fork.set_block(Block::new(header, vec![]));
        }

        let node = test_utils::test_node_with(|builder| builder.with_fork(Arc::new(fork), 10));
        let result = node.simulate_call(read_balance(8, None)).await.unwrap();
        assert_eq!(result.raw_data, word(77));
        assert!(node.chain().read().await.get_block_by_number(8).is_some());

        // beyond the fork point nothing is fetched
        let err = node.simulate_call(read_balance(11, None)).await.unwrap_err();
        assert_eq!(err.errors()[0].tag, ErrorTag::UnknownBlock);
    }
}
