//! A minimal block builder over the transaction pool.

use crate::{
    chain::Block,
    error::HandlerError,
    fail::{maybe_throw_on_fail, HasErrors, TevmFailure},
    node::{Node, NodeEvent},
    tx::ImpersonatedTx,
};
use alloy::{
    consensus::{proofs::ordered_trie_root_with_encoder, Header},
    primitives::B256,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, instrument, warn};

/// Parameters of [`Node::mine`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MineParams {
    /// Number of blocks to mine. Defaults to one.
    #[serde(default, with = "alloy::serde::quantity::opt", skip_serializing_if = "Option::is_none")]
    pub blocks: Option<u64>,
    /// Raise errors instead of returning them inline. Defaults to true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throw_on_fail: Option<bool>,
}

/// The outcome of [`Node::mine`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MineResult {
    /// Hashes of the mined blocks, oldest first.
    pub block_hashes: Vec<B256>,
    /// Errors, if any.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<HandlerError>,
}

impl HasErrors for MineResult {
    fn errors(&self) -> &[HandlerError] {
        &self.errors
    }

    fn take_errors(&mut self) -> Vec<HandlerError> {
        std::mem::take(&mut self.errors)
    }
}

/// Order pooled transactions for inclusion: one transaction per sender per
/// round, senders in first-seen order, each sender's in nonce order.
fn interleave(groups: Vec<Vec<ImpersonatedTx>>) -> Vec<ImpersonatedTx> {
    let mut queues: Vec<_> = groups.into_iter().map(Vec::into_iter).collect();
    let mut ordered = Vec::new();
    loop {
        let before = ordered.len();
        ordered.extend(queues.iter_mut().filter_map(Iterator::next));
        if ordered.len() == before {
            return ordered;
        }
    }
}

fn timestamp_after(parent: &Header) -> u64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |elapsed| elapsed.as_secs());
    now.max(parent.timestamp + 1)
}

impl Node {
    /// Mine blocks from the pool.
    pub async fn mine(&self, params: MineParams) -> Result<MineResult, TevmFailure> {
        let result = match self.mine_blocks(params.blocks.unwrap_or(1)).await {
            Ok(blocks) => MineResult {
                block_hashes: blocks.iter().map(|block| block.hash()).collect(),
                errors: vec![],
            },
            Err(errors) => MineResult { block_hashes: vec![], errors },
        };
        maybe_throw_on_fail(params.throw_on_fail.unwrap_or(true), result)
    }

    /// Mine `count` blocks on top of the head.
    #[instrument(skip(self))]
    pub(crate) async fn mine_blocks(&self, count: u64) -> Result<Vec<Arc<Block>>, Vec<HandlerError>> {
        let mut mined = Vec::new();
        for _ in 0..count {
            mined.push(self.mine_block().await?);
        }
        Ok(mined)
    }

    async fn mine_block(&self) -> Result<Arc<Block>, Vec<HandlerError>> {
        let candidates = interleave(self.pool().txs_by_sender_and_nonce().await);

        let (block, failed) = {
            let mut vm = self.vm().write().await;
            let mut chain = self.chain().write().await;
            let parent = chain.canonical_head();

            let mut header = Header {
                parent_hash: parent.hash(),
                number: parent.number() + 1,
                beneficiary: self.config().coinbase,
                timestamp: timestamp_after(parent.header()),
                gas_limit: parent.header().gas_limit,
                base_fee_per_gas: Some(parent.next_base_fee()),
                excess_blob_gas: Some(0),
                blob_gas_used: Some(0),
                parent_beacon_block_root: Some(B256::ZERO),
                ..Default::default()
            };
            let env = Block::new(header.clone(), vec![]);

            let mut included = Vec::new();
            let mut failed = Vec::new();
            let mut skipped = HashSet::new();
            for tx in candidates {
                if skipped.contains(&tx.sender()) {
                    continue;
                }
                if header.gas_used + tx.gas_limit() > header.gas_limit {
                    debug!(tx_hash = %tx.hash(), "block is full for this sender");
                    skipped.insert(tx.sender());
                    continue;
                }
                match vm.run_tx(&env, &tx) {
                    Ok(execution) => {
                        header.gas_used += execution.gas_used;
                        included.push(tx);
                    }
                    Err(err) => {
                        warn!(tx_hash = %tx.hash(), %err, "dropping sender queue, transaction failed to execute");
                        skipped.insert(tx.sender());
                        failed.push(tx.sender());
                    }
                }
            }

            header.state_root = vm.state().save_state_root();
            header.transactions_root =
                ordered_trie_root_with_encoder(&included, |tx, buf| buf.extend_from_slice(&tx.encoded()));

            let block = chain
                .put_block(Block::new(header, included))
                .map_err(|err| vec![HandlerError::unexpected(err.to_string())])?;
            vm.state_mut().put_block_hash(block.number(), block.hash());
            vm.state().graft(block.header().state_root);
            (block, failed)
        };

        let hashes: Vec<_> = block.transactions().iter().map(ImpersonatedTx::hash).collect();
        self.pool().remove_mined(&hashes).await;
        // a failed nonce leaves a gap, nothing after it can be included
        for sender in failed {
            let removed = self.pool().remove_sender(sender).await;
            debug!(%sender, removed = removed.len(), "dropped sender queue");
        }

        debug!(number = block.number(), txs = block.transactions().len(), "mined block");
        self.emit(NodeEvent::NewBlock { number: block.number(), hash: block.hash() });
        Ok(block)
    }
}
