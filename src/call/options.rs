use crate::{
    chain::Block,
    fill::{Block as BlockFiller, Tx},
};
use alloy::{
    eips::eip4844::calc_blob_gasprice,
    primitives::{Address, Bytes, TxKind, B256, U256},
};
use revm::{
    context::{BlockEnv, TxEnv},
    context_interface::block::BlobExcessGasAndPrice,
};
use std::{collections::BTreeSet, sync::Arc};

/// The strictly typed form of a call, consumed by the interpreter.
///
/// Fields the request left out stay `None`; they are defaulted only when the
/// environment is filled.
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Call target. `None` for a create.
    pub to: Option<Address>,
    /// `msg.sender` of the outermost frame.
    pub caller: Option<Address>,
    /// `tx.origin`.
    pub origin: Option<Address>,
    /// Call data or init code.
    pub data: Option<Bytes>,
    /// Value transferred.
    pub value: Option<U256>,
    /// Gas limit. Defaults to the block gas limit.
    pub gas_limit: Option<u64>,
    /// Gas price. When absent the base fee is not enforced.
    pub gas_price: Option<u128>,
    /// Priority fee.
    pub max_priority_fee_per_gas: Option<u128>,
    /// Refund counter to start from.
    pub gas_refund: Option<u64>,
    /// CREATE2 salt.
    pub salt: Option<Bytes>,
    /// Addresses to treat as already self-destructed.
    pub selfdestruct: Option<BTreeSet<Address>>,
    /// Call depth to start at.
    pub depth: Option<u64>,
    /// EIP-4844 blob versioned hashes.
    pub blob_versioned_hashes: Option<Vec<B256>>,
    /// Nonce, when the call should carry one.
    pub nonce: Option<u64>,
    /// The block the call executes in.
    pub block: Arc<Block>,
    /// Blob base fee override.
    pub blob_base_fee: Option<u128>,
    /// Disable the balance check.
    pub skip_balance: bool,
}

impl ExecutionOptions {
    /// Options for an empty call in `block`.
    pub const fn new(block: Arc<Block>) -> Self {
        Self {
            to: None,
            caller: None,
            origin: None,
            data: None,
            value: None,
            gas_limit: None,
            gas_price: None,
            max_priority_fee_per_gas: None,
            gas_refund: None,
            salt: None,
            selfdestruct: None,
            depth: None,
            blob_versioned_hashes: None,
            nonce: None,
            block,
            blob_base_fee: None,
            skip_balance: false,
        }
    }

    /// The transaction sender: origin, then caller, then the zero address.
    pub fn sender(&self) -> Address {
        self.origin.or(self.caller).unwrap_or_default()
    }

    /// The call data, empty if unset.
    pub fn input(&self) -> Bytes {
        self.data.clone().unwrap_or_default()
    }

    /// True if the call creates a contract.
    pub const fn is_create(&self) -> bool {
        self.to.is_none()
    }

    /// The gas limit the call runs with.
    pub fn effective_gas_limit(&self) -> u64 {
        self.gas_limit.unwrap_or_else(|| self.block.header().gas_limit)
    }
}

impl Tx for ExecutionOptions {
    fn fill_tx_env(&self, tx_env: &mut TxEnv) {
        let blob_hashes = self.blob_versioned_hashes.clone().unwrap_or_default();
        tx_env.tx_type = if !blob_hashes.is_empty() {
            3
        } else if self.max_priority_fee_per_gas.is_some() {
            2
        } else {
            0
        };
        tx_env.caller = self.sender();
        tx_env.gas_limit = self.effective_gas_limit();
        tx_env.gas_price = self.gas_price.unwrap_or_default();
        tx_env.gas_priority_fee = self.max_priority_fee_per_gas;
        tx_env.kind = self.to.map_or(TxKind::Create, TxKind::Call);
        tx_env.value = self.value.unwrap_or_default();
        tx_env.data = self.input();
        tx_env.nonce = self.nonce.unwrap_or_default();
        tx_env.max_fee_per_blob_gas = if blob_hashes.is_empty() {
            0
        } else {
            self.gas_price.unwrap_or_default().max(self.block_blob_gasprice())
        };
        tx_env.blob_hashes = blob_hashes;
        tx_env.access_list = Default::default();
        tx_env.authorization_list.clear();
    }
}

impl ExecutionOptions {
    fn block_blob_gasprice(&self) -> u128 {
        self.blob_base_fee.unwrap_or_else(|| {
            calc_blob_gasprice(self.block.header().excess_blob_gas.unwrap_or_default())
        })
    }
}

impl BlockFiller for ExecutionOptions {
    fn fill_block_env(&self, block_env: &mut BlockEnv) {
        self.block.fill_block_env(block_env);
        if let Some(blob_gasprice) = self.blob_base_fee {
            let excess_blob_gas = block_env
                .blob_excess_gas_and_price
                .as_ref()
                .map(|blob| blob.excess_blob_gas)
                .unwrap_or_default();
            block_env.blob_excess_gas_and_price =
                Some(BlobExcessGasAndPrice { excess_blob_gas, blob_gasprice });
        }
    }
}
