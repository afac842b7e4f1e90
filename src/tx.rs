use crate::fill::Tx;
use alloy::{
    consensus::{SignableTransaction, TxEip1559},
    primitives::{keccak256, Address, Bytes, TxKind, B256, U256},
};
use revm::context::TxEnv;

/// An unsigned EIP-1559 transaction whose sender is carried out of band.
///
/// Impersonated transactions are valid in the local pool without a
/// signature. Their hash commits to both the signing payload and the
/// sender, so the same payload from two senders never collides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImpersonatedTx {
    tx: TxEip1559,
    sender: Address,
    hash: B256,
}

impl ImpersonatedTx {
    /// Impersonate `sender` for `tx`.
    pub fn new(tx: TxEip1559, sender: Address) -> Self {
        let mut preimage = tx.encoded_for_signing();
        preimage.extend_from_slice(sender.as_slice());
        let hash = keccak256(preimage);
        Self { tx, sender, hash }
    }

    /// The inner transaction.
    pub const fn tx(&self) -> &TxEip1559 {
        &self.tx
    }

    /// The impersonated sender.
    pub const fn sender(&self) -> Address {
        self.sender
    }

    /// The transaction hash.
    pub const fn hash(&self) -> B256 {
        self.hash
    }

    /// The transaction nonce.
    pub const fn nonce(&self) -> u64 {
        self.tx.nonce
    }

    /// The gas limit.
    pub const fn gas_limit(&self) -> u64 {
        self.tx.gas_limit
    }

    /// Max fee per gas.
    pub const fn max_fee_per_gas(&self) -> u128 {
        self.tx.max_fee_per_gas
    }

    /// Max priority fee per gas.
    pub const fn max_priority_fee_per_gas(&self) -> u128 {
        self.tx.max_priority_fee_per_gas
    }

    /// Call target or create.
    pub const fn kind(&self) -> TxKind {
        self.tx.to
    }

    /// Value transferred.
    pub const fn value(&self) -> U256 {
        self.tx.value
    }

    /// Call data.
    pub const fn input(&self) -> &Bytes {
        &self.tx.input
    }

    /// Impersonated transactions never carry a signature.
    pub const fn is_signed(&self) -> bool {
        false
    }

    /// The serialized unsigned transaction.
    pub fn encoded(&self) -> Bytes {
        self.tx.encoded_for_signing().into()
    }

    /// The most the sender can be charged: `value + gas_limit * max_fee`.
    pub fn up_front_cost(&self) -> U256 {
        self.tx.value + U256::from(self.tx.gas_limit) * U256::from(self.tx.max_fee_per_gas)
    }

    /// The price per gas paid in a block with the given base fee.
    pub fn effective_gas_price(&self, base_fee: u64) -> u128 {
        self.tx
            .max_fee_per_gas
            .min(u128::from(base_fee).saturating_add(self.tx.max_priority_fee_per_gas))
    }
}

impl Tx for ImpersonatedTx {
    fn fill_tx_env(&self, tx_env: &mut TxEnv) {
        tx_env.tx_type = 2;
        tx_env.caller = self.sender;
        tx_env.gas_limit = self.tx.gas_limit;
        tx_env.gas_price = self.tx.max_fee_per_gas;
        tx_env.gas_priority_fee = Some(self.tx.max_priority_fee_per_gas);
        tx_env.kind = self.tx.to;
        tx_env.value = self.tx.value;
        tx_env.data = self.tx.input.clone();
        tx_env.nonce = self.tx.nonce;
        tx_env.chain_id = Some(self.tx.chain_id);
        tx_env.access_list = self.tx.access_list.clone();
        tx_env.blob_hashes.clear();
        tx_env.max_fee_per_blob_gas = 0;
        tx_env.authorization_list.clear();
    }
}
