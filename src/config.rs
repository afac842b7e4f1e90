//! Node configuration and the [`NodeBuilder`].

use crate::{
    account::{write_account, SetAccountParams},
    chain::{Block, Chain},
    node::Node,
    state::{ForkBackend, ForkDb, StateError, StateManager},
    vm::Vm,
};
use alloy::{
    consensus::Header,
    eips::eip1559::INITIAL_BASE_FEE,
    primitives::{Address, B256},
};
use revm::primitives::hardfork::SpecId;
use std::sync::Arc;
use tracing::{debug, info};

/// Default chain id of a local node.
pub const DEFAULT_CHAIN_ID: u64 = 900;

/// Default genesis gas limit.
pub const DEFAULT_GAS_LIMIT: u64 = 30_000_000;

/// The chain family, which decides chain-specific result fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChainKind {
    /// An L1 chain.
    #[default]
    Ethereum,
    /// An OP-stack rollup. Admitted transactions report their L1 data fee.
    OpStack,
}

impl ChainKind {
    /// True for OP-stack chains.
    pub const fn is_op_stack(self) -> bool {
        matches!(self, Self::OpStack)
    }
}

/// When blocks are produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MiningMode {
    /// Only on request.
    #[default]
    Manual,
    /// After every admitted transaction.
    Auto,
}

impl MiningMode {
    /// True in auto mode.
    pub const fn is_auto(self) -> bool {
        matches!(self, Self::Auto)
    }
}

/// Limits of the transaction pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of pooled transactions.
    pub max_size: usize,
    /// Maximum number of pooled transactions per sender.
    pub max_per_sender: usize,
    /// Maximum call data size in bytes.
    pub max_data_size: usize,
    /// Minimum fee increase, in percent, for a same-nonce replacement.
    pub price_bump_percent: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_size: 5000, max_per_sender: 100, max_data_size: 128 * 1024, price_bump_percent: 10 }
    }
}

/// A remote chain to fork from.
#[derive(Debug, Clone)]
pub struct ForkConfig {
    /// The remote state source.
    pub backend: Arc<dyn ForkBackend>,
    /// The block to fork at. It becomes the local genesis.
    pub block_number: u64,
}

/// Node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Chain id stamped on admitted transactions.
    pub chain_id: u64,
    /// Active hardfork.
    pub spec_id: SpecId,
    /// Chain family.
    pub chain_kind: ChainKind,
    /// Beneficiary of mined blocks.
    pub coinbase: Address,
    /// Mining mode.
    pub mining: MiningMode,
    /// Genesis gas limit. Mined blocks inherit their parent's.
    pub gas_limit: u64,
    /// Genesis base fee per gas.
    pub base_fee: u64,
    /// Accounts written into the genesis state.
    pub genesis_accounts: Vec<SetAccountParams>,
    /// Remote chain to fork from, if any.
    pub fork: Option<ForkConfig>,
    /// Pool limits.
    pub pool: PoolConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_CHAIN_ID,
            spec_id: SpecId::PRAGUE,
            chain_kind: ChainKind::default(),
            coinbase: Address::ZERO,
            mining: MiningMode::default(),
            gas_limit: DEFAULT_GAS_LIMIT,
            base_fee: INITIAL_BASE_FEE,
            genesis_accounts: vec![],
            fork: None,
            pool: PoolConfig::default(),
        }
    }
}

/// Errors that can occur when building a [`Node`].
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum NodeBuilderError {
    /// Chain id zero.
    #[error("chain id must not be zero")]
    InvalidChainId,
    /// Gas limit zero.
    #[error("gas limit must not be zero")]
    InvalidGasLimit,
    /// The fork backend does not know the fork block.
    #[error("fork block {0} not found")]
    ForkBlockNotFound(u64),
    /// The fork backend failed.
    #[error(transparent)]
    Fork(#[from] StateError),
    /// A genesis account could not be written.
    #[error("invalid genesis account {address}: {message}")]
    InvalidGenesisAccount {
        /// The account.
        address: Address,
        /// What went wrong.
        message: String,
    },
}

/// A builder for [`Node`].
#[derive(Debug, Clone, Default)]
pub struct NodeBuilder {
    config: NodeConfig,
}

impl NodeBuilder {
    /// A builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub const fn from_config(config: NodeConfig) -> Self {
        Self { config }
    }

    /// Set the chain id.
    pub const fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.config.chain_id = chain_id;
        self
    }

    /// Set the hardfork.
    pub const fn with_spec_id(mut self, spec_id: SpecId) -> Self {
        self.config.spec_id = spec_id;
        self
    }

    /// Set the chain family.
    pub const fn with_chain_kind(mut self, chain_kind: ChainKind) -> Self {
        self.config.chain_kind = chain_kind;
        self
    }

    /// Set the beneficiary of mined blocks.
    pub const fn with_coinbase(mut self, coinbase: Address) -> Self {
        self.config.coinbase = coinbase;
        self
    }

    /// Set the mining mode.
    pub const fn with_mining(mut self, mining: MiningMode) -> Self {
        self.config.mining = mining;
        self
    }

    /// Set the genesis gas limit.
    pub const fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.config.gas_limit = gas_limit;
        self
    }

    /// Set the genesis base fee.
    pub const fn with_base_fee(mut self, base_fee: u64) -> Self {
        self.config.base_fee = base_fee;
        self
    }

    /// Add an account to the genesis state.
    pub fn with_genesis_account(mut self, account: SetAccountParams) -> Self {
        self.config.genesis_accounts.push(account);
        self
    }

    /// Fork `backend` at `block_number`.
    pub fn with_fork(mut self, backend: Arc<dyn ForkBackend>, block_number: u64) -> Self {
        self.config.fork = Some(ForkConfig { backend, block_number });
        self
    }

    /// Set the pool limits.
    pub const fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.config.pool = pool;
        self
    }

    /// Build the node: write the genesis state and seal the genesis block.
    ///
    /// A forked node takes the fork block as its genesis and registers the
    /// local state under that block's state root.
    pub fn build(self) -> Result<Node, NodeBuilderError> {
        let config = self.config;
        if config.chain_id == 0 {
            return Err(NodeBuilderError::InvalidChainId);
        }
        if config.gas_limit == 0 {
            return Err(NodeBuilderError::InvalidGasLimit);
        }

        let (mut state, fork_block) = match &config.fork {
            Some(fork) => {
                let block = fork
                    .backend
                    .block(fork.block_number)?
                    .ok_or(NodeBuilderError::ForkBlockNotFound(fork.block_number))?;
                let db = ForkDb::new(fork.backend.clone(), fork.block_number);
                (StateManager::new(Some(db)), Some(block))
            }
            None => (StateManager::default(), None),
        };

        for account in &config.genesis_accounts {
            if let Some(err) = write_account(&mut state, account).into_iter().next() {
                return Err(NodeBuilderError::InvalidGenesisAccount {
                    address: account.address,
                    message: err.message,
                });
            }
        }

        let genesis = match fork_block {
            Some(block) => {
                info!(number = block.number(), hash = %block.hash(), "forking");
                state.graft(block.header().state_root);
                state.put_block_hash(block.number(), block.hash());
                Block::with_hash(block.header().clone(), block.hash(), vec![])
            }
            None => {
                let state_root = state.save_genesis();
                let header = Header {
                    beneficiary: config.coinbase,
                    state_root,
                    gas_limit: config.gas_limit,
                    base_fee_per_gas: Some(config.base_fee),
                    excess_blob_gas: Some(0),
                    blob_gas_used: Some(0),
                    parent_beacon_block_root: Some(B256::ZERO),
                    ..Default::default()
                };
                let block = Block::new(header, vec![]);
                state.put_block_hash(0, block.hash());
                block
            }
        };
        debug!(chain_id = config.chain_id, genesis = %genesis.hash(), "node built");

        let vm = Vm::new(state, config.chain_id, config.spec_id);
        Ok(Node::from_parts(config, vm, Chain::new(genesis)))
    }
}
