//! The pending transaction pool.

use crate::{config::PoolConfig, tx::ImpersonatedTx};
use alloy::primitives::{Address, B256, U256};
use revm::state::AccountInfo;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use tracing::trace;

/// Reasons a transaction is refused by the pool.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The pool requires signed transactions.
    #[error("transaction {0} is not signed")]
    SignatureRequired(B256),
    /// Call data is larger than the pool accepts.
    #[error("transaction data is {size} bytes, the limit is {max}")]
    DataTooLarge {
        /// Data size.
        size: usize,
        /// Configured limit.
        max: usize,
    },
    /// Gas limit above the block gas limit.
    #[error("gas limit {gas_limit} exceeds the block gas limit {block_gas_limit}")]
    GasLimitExceeded {
        /// Transaction gas limit.
        gas_limit: u64,
        /// Block gas limit.
        block_gas_limit: u64,
    },
    /// Nonce below the sender's account nonce.
    #[error("nonce {nonce} is below the account nonce {account_nonce}")]
    NonceTooLow {
        /// Transaction nonce.
        nonce: u64,
        /// Account nonce.
        account_nonce: u64,
    },
    /// A transaction with the same sender and nonce is pooled and the new one
    /// does not pay enough more to replace it.
    #[error("replacement transaction for nonce {0} is underpriced")]
    ReplacementUnderpriced(u64),
    /// The transaction is already pooled.
    #[error("transaction {0} is already known")]
    AlreadyKnown(B256),
    /// The pool is full.
    #[error("transaction pool is full")]
    PoolFull,
    /// The sender has too many pooled transactions.
    #[error("sender {0} has too many pooled transactions")]
    SenderFull(Address),
    /// The sender cannot pay the up-front cost.
    #[error("insufficient balance: {balance} available, {required} required")]
    InsufficientBalance {
        /// Up-front cost of the transaction.
        required: U256,
        /// Sender balance.
        balance: U256,
    },
}

/// How [`TxPool::add`] treats a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOptions {
    /// Reject unsigned transactions.
    pub require_signature: bool,
    /// Do not compare the up-front cost with the sender balance.
    pub skip_balance: bool,
}

#[derive(Debug, Default)]
struct PoolInner {
    by_sender: HashMap<Address, BTreeMap<u64, ImpersonatedTx>>,
    senders: Vec<Address>,
    by_hash: HashMap<B256, (Address, u64)>,
}

impl PoolInner {
    fn remove(&mut self, hash: B256) -> Option<ImpersonatedTx> {
        let (sender, nonce) = self.by_hash.remove(&hash)?;
        let txs = self.by_sender.get_mut(&sender)?;
        let tx = txs.remove(&nonce);
        if txs.is_empty() {
            self.by_sender.remove(&sender);
            self.senders.retain(|s| *s != sender);
        }
        tx
    }
}

/// Pending transactions, keyed by sender and nonce.
#[derive(Debug, Default)]
pub struct TxPool {
    config: PoolConfig,
    inner: Mutex<PoolInner>,
}

impl TxPool {
    /// An empty pool with the given limits.
    pub fn new(config: PoolConfig) -> Self {
        Self { config, inner: Mutex::default() }
    }

    /// The pool limits.
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Add a transaction. `account` is the sender's current account state.
    pub async fn add(
        &self,
        tx: ImpersonatedTx,
        opts: AddOptions,
        account: &AccountInfo,
        block_gas_limit: u64,
    ) -> Result<(), PoolError> {
        self.check(&tx, opts, account, block_gas_limit)?;
        let mut inner = self.inner.lock().await;
        self.insert(&mut inner, tx)
    }

    /// Build the sender's next transaction and add it, atomically.
    ///
    /// The nonce passed to `build` is the account nonce plus the number of
    /// transactions `sender` already has pooled. It is assigned under the
    /// same lock as the insertion, so concurrent callers never share a
    /// nonce.
    pub async fn add_next(
        &self,
        sender: Address,
        opts: AddOptions,
        account: &AccountInfo,
        block_gas_limit: u64,
        build: impl FnOnce(u64) -> ImpersonatedTx,
    ) -> Result<ImpersonatedTx, PoolError> {
        let mut inner = self.inner.lock().await;
        let pooled = inner.by_sender.get(&sender).map_or(0, BTreeMap::len) as u64;
        let tx = build(account.nonce + pooled);
        self.check(&tx, opts, account, block_gas_limit)?;
        self.insert(&mut inner, tx.clone())?;
        Ok(tx)
    }

    /// Checks that need no pool state.
    fn check(
        &self,
        tx: &ImpersonatedTx,
        opts: AddOptions,
        account: &AccountInfo,
        block_gas_limit: u64,
    ) -> Result<(), PoolError> {
        if opts.require_signature && !tx.is_signed() {
            return Err(PoolError::SignatureRequired(tx.hash()));
        }
        if tx.input().len() > self.config.max_data_size {
            return Err(PoolError::DataTooLarge { size: tx.input().len(), max: self.config.max_data_size });
        }
        if tx.gas_limit() > block_gas_limit {
            return Err(PoolError::GasLimitExceeded { gas_limit: tx.gas_limit(), block_gas_limit });
        }
        if tx.nonce() < account.nonce {
            return Err(PoolError::NonceTooLow { nonce: tx.nonce(), account_nonce: account.nonce });
        }
        if !opts.skip_balance && tx.up_front_cost() > account.balance {
            return Err(PoolError::InsufficientBalance {
                required: tx.up_front_cost(),
                balance: account.balance,
            });
        }
        Ok(())
    }

    fn insert(&self, inner: &mut PoolInner, tx: ImpersonatedTx) -> Result<(), PoolError> {
        if inner.by_hash.contains_key(&tx.hash()) {
            return Err(PoolError::AlreadyKnown(tx.hash()));
        }

        let sender = tx.sender();
        let replaced = inner.by_sender.get(&sender).and_then(|txs| txs.get(&tx.nonce())).cloned();
        match &replaced {
            Some(existing) => {
                if !self.is_sufficient_bump(existing, &tx) {
                    return Err(PoolError::ReplacementUnderpriced(tx.nonce()));
                }
                inner.remove(existing.hash());
            }
            None => {
                if inner.by_hash.len() >= self.config.max_size {
                    return Err(PoolError::PoolFull);
                }
                let pooled = inner.by_sender.get(&sender).map_or(0, BTreeMap::len);
                if pooled >= self.config.max_per_sender {
                    return Err(PoolError::SenderFull(sender));
                }
            }
        }

        if !inner.by_sender.contains_key(&sender) {
            inner.senders.push(sender);
        }
        inner.by_hash.insert(tx.hash(), (sender, tx.nonce()));
        inner.by_sender.entry(sender).or_default().insert(tx.nonce(), tx);
        trace!(%sender, replaced = replaced.is_some(), "transaction pooled");
        Ok(())
    }

    fn is_sufficient_bump(&self, existing: &ImpersonatedTx, new: &ImpersonatedTx) -> bool {
        let factor = 100 + u128::from(self.config.price_bump_percent);
        let bump = |old: u128| old.saturating_mul(factor) / 100;
        new.max_fee_per_gas() >= bump(existing.max_fee_per_gas())
            && new.max_priority_fee_per_gas() >= bump(existing.max_priority_fee_per_gas())
    }

    /// Remove a transaction by hash.
    pub async fn remove_by_hash(&self, hash: B256) -> Option<ImpersonatedTx> {
        self.inner.lock().await.remove(hash)
    }

    /// A pooled transaction by hash.
    pub async fn get(&self, hash: B256) -> Option<ImpersonatedTx> {
        let inner = self.inner.lock().await;
        let (sender, nonce) = inner.by_hash.get(&hash)?;
        inner.by_sender.get(sender)?.get(nonce).cloned()
    }

    /// The sender's pooled transactions in nonce order.
    pub async fn get_by_sender_address(&self, sender: Address) -> Vec<ImpersonatedTx> {
        self.inner
            .lock()
            .await
            .by_sender
            .get(&sender)
            .map(|txs| txs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Pooled transactions grouped by sender in first-seen order, each group
    /// in nonce order.
    pub async fn txs_by_sender_and_nonce(&self) -> Vec<Vec<ImpersonatedTx>> {
        let inner = self.inner.lock().await;
        inner
            .senders
            .iter()
            .filter_map(|sender| inner.by_sender.get(sender))
            .map(|txs| txs.values().cloned().collect())
            .collect()
    }

    /// Drop the given transactions, e.g. after they were mined.
    pub async fn remove_mined(&self, hashes: &[B256]) {
        let mut inner = self.inner.lock().await;
        for hash in hashes {
            inner.remove(*hash);
        }
    }

    /// Drop every pooled transaction of `sender`, returning them in nonce
    /// order.
    pub async fn remove_sender(&self, sender: Address) -> Vec<ImpersonatedTx> {
        let mut inner = self.inner.lock().await;
        let Some(txs) = inner.by_sender.remove(&sender) else { return vec![] };
        inner.senders.retain(|s| *s != sender);
        for tx in txs.values() {
            inner.by_hash.remove(&tx.hash());
        }
        txs.into_values().collect()
    }

    /// Number of pooled transactions.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.by_hash.len()
    }

    /// True if nothing is pooled.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.by_hash.is_empty()
    }

    /// Drop every transaction.
    pub async fn clear(&self) {
        *self.inner.lock().await = PoolInner::default();
    }
}
