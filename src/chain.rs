use crate::tx::ImpersonatedTx;
use alloy::{
    consensus::Header,
    eips::{eip1559::BaseFeeParams, eip4844::calc_blob_gasprice},
    primitives::{B256, U256},
};
use revm::{context::BlockEnv, context_interface::block::BlobExcessGasAndPrice};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

/// Errors produced when extending the chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ChainError {
    /// The block is not a child of the canonical head.
    #[error("block {number} ({hash}) does not extend the canonical head {head}")]
    NotChildOfHead {
        /// Number of the rejected block.
        number: u64,
        /// Hash of the rejected block.
        hash: B256,
        /// Hash of the current head.
        head: B256,
    },
}

/// A block: header, hash and the transactions it carries.
///
/// Blocks fetched from a fork may carry no transactions when only the header
/// is known locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    header: Header,
    hash: B256,
    transactions: Vec<ImpersonatedTx>,
}

impl Block {
    /// Seal a header with its computed hash.
    pub fn new(header: Header, transactions: Vec<ImpersonatedTx>) -> Self {
        let hash = header.hash_slow();
        Self { header, hash, transactions }
    }

    /// A block whose hash is already known, e.g. one fetched from a remote
    /// node.
    pub const fn with_hash(header: Header, hash: B256, transactions: Vec<ImpersonatedTx>) -> Self {
        Self { header, hash, transactions }
    }

    /// The block header.
    pub const fn header(&self) -> &Header {
        &self.header
    }

    /// The block hash.
    pub const fn hash(&self) -> B256 {
        self.hash
    }

    /// The block number.
    pub const fn number(&self) -> u64 {
        self.header.number
    }

    /// The block's transactions.
    pub fn transactions(&self) -> &[ImpersonatedTx] {
        &self.transactions
    }

    /// Base fee per gas, zero before London.
    pub fn base_fee(&self) -> u64 {
        self.header.base_fee_per_gas.unwrap_or_default()
    }

    /// Base fee of the next block under mainnet EIP-1559 parameters.
    pub fn next_base_fee(&self) -> u64 {
        self.header.next_block_base_fee(BaseFeeParams::ethereum()).unwrap_or_default()
    }
}

impl crate::fill::Block for Block {
    fn fill_block_env(&self, block_env: &mut BlockEnv) {
        let header = &self.header;
        block_env.number = U256::from(header.number);
        block_env.beneficiary = header.beneficiary;
        block_env.timestamp = U256::from(header.timestamp);
        block_env.gas_limit = header.gas_limit;
        block_env.basefee = header.base_fee_per_gas.unwrap_or_default();
        block_env.difficulty = header.difficulty;
        block_env.prevrandao = Some(header.mix_hash);

        let excess_blob_gas = header.excess_blob_gas.unwrap_or_default();
        block_env.blob_excess_gas_and_price = Some(BlobExcessGasAndPrice {
            excess_blob_gas,
            blob_gasprice: calc_blob_gasprice(excess_blob_gas),
        });
    }
}

/// The local block store and canonical chain.
#[derive(Debug, Clone)]
pub struct Chain {
    blocks: HashMap<B256, Arc<Block>>,
    canonical: BTreeMap<u64, B256>,
    head: Arc<Block>,
}

impl Chain {
    /// A chain whose genesis (or fork anchor) is `genesis`.
    pub fn new(genesis: Block) -> Self {
        let head = Arc::new(genesis);
        let mut blocks = HashMap::new();
        blocks.insert(head.hash(), head.clone());
        let mut canonical = BTreeMap::new();
        canonical.insert(head.number(), head.hash());
        Self { blocks, canonical, head }
    }

    /// The canonical head block.
    pub fn canonical_head(&self) -> Arc<Block> {
        self.head.clone()
    }

    /// A block by hash.
    pub fn get_block(&self, hash: B256) -> Option<Arc<Block>> {
        self.blocks.get(&hash).cloned()
    }

    /// A canonical block by number.
    pub fn get_block_by_number(&self, number: u64) -> Option<Arc<Block>> {
        self.canonical.get(&number).and_then(|hash| self.get_block(*hash))
    }

    /// Append a block on top of the canonical head, making it the new head.
    pub fn put_block(&mut self, block: Block) -> Result<Arc<Block>, ChainError> {
        if block.header.parent_hash != self.head.hash() || block.number() != self.head.number() + 1
        {
            return Err(ChainError::NotChildOfHead {
                number: block.number(),
                hash: block.hash(),
                head: self.head.hash(),
            });
        }
        let block = Arc::new(block);
        self.blocks.insert(block.hash(), block.clone());
        self.canonical.insert(block.number(), block.hash());
        self.head = block.clone();
        Ok(block)
    }

    /// Store a block below the head, e.g. one fetched from a fork.
    pub fn insert_historical(&mut self, block: Block) -> Arc<Block> {
        let block = Arc::new(block);
        self.blocks.insert(block.hash(), block.clone());
        if block.number() < self.head.number() {
            self.canonical.entry(block.number()).or_insert(block.hash());
        }
        block
    }
}
