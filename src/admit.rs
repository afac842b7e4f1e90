//! The transaction admitter: turns a completed call into a pooled,
//! impersonated transaction.

use crate::{
    account::{write_account, SetAccountParams},
    call::ExecutionOptions,
    chain::Block,
    error::{ErrorTag, HandlerError},
    node::{Node, NodeEvent},
    pool::AddOptions,
    tx::ImpersonatedTx,
};
use alloy::{
    consensus::TxEip1559,
    primitives::{TxKind, U256},
};
use tracing::{debug, instrument, warn};

/// Flat gas charged for every transaction.
pub const TX_GAS: u64 = 21_000;
/// Gas charged per zero byte of call data.
pub const TX_DATA_ZERO_GAS: u64 = 4;
/// Gas charged per non-zero byte of call data.
pub const TX_DATA_NON_ZERO_GAS: u64 = 16;
/// Gas charged for a contract creation.
pub const TX_CREATE_GAS: u64 = 32_000;

/// Intrinsic gas of a transaction carrying `data`.
pub fn intrinsic_gas(data: &[u8], is_create: bool) -> u64 {
    let zeros = data.iter().filter(|byte| **byte == 0).count() as u64;
    let non_zeros = data.len() as u64 - zeros;
    let create = if is_create { TX_CREATE_GAS } else { 0 };
    TX_GAS + zeros * TX_DATA_ZERO_GAS + non_zeros * TX_DATA_NON_ZERO_GAS + create
}

/// `ceil(gas * 1.1)`.
pub const fn with_gas_buffer(gas: u64) -> u64 {
    gas.saturating_mul(11).saturating_add(9) / 10
}

/// Fee caps for a transaction built on top of `parent`:
/// `max(next base fee + priority fee, parent base fee)` and the priority
/// fee itself.
pub fn fee_caps(parent: &Block, priority_fee: u128) -> (u128, u128) {
    let next = u128::from(parent.next_base_fee()).saturating_add(priority_fee);
    (next.max(u128::from(parent.base_fee())), priority_fee)
}

impl Node {
    /// Build an impersonated transaction from a completed call and add it to
    /// the pool.
    ///
    /// When the call skipped the balance check, the sender is topped up to
    /// the transaction's up-front cost. Any failure after insertion removes
    /// the transaction from the pool again.
    #[instrument(skip_all, fields(sender = %opts.sender()))]
    pub(crate) async fn admit(
        &self,
        opts: &ExecutionOptions,
        execution_gas_used: u64,
        parent: &Block,
    ) -> Result<ImpersonatedTx, Vec<HandlerError>> {
        let input = opts.input();
        let minimum = with_gas_buffer(intrinsic_gas(&input, opts.is_create()) + execution_gas_used);
        let gas_limit = match opts.gas_limit {
            Some(gas_limit) if gas_limit < minimum => {
                warn!(gas_limit, minimum, "gas limit is below the estimated minimum, the transaction may fail");
                gas_limit
            }
            Some(gas_limit) => gas_limit,
            None => minimum,
        };

        let sender = opts.sender();
        let account = {
            let live = self.vm().read().await;
            live.state().get_account(sender)
        }
        .map_err(|err| vec![HandlerError::new(ErrorTag::NoBalance, err.to_string())])?
        .unwrap_or_default();

        let (max_fee_per_gas, max_priority_fee_per_gas) = fee_caps(parent, 0);
        let chain_id = self.config().chain_id;
        let to = opts.to.map_or(TxKind::Create, TxKind::Call);
        let value = opts.value.unwrap_or_default();

        let add = AddOptions { require_signature: false, skip_balance: opts.skip_balance };
        let tx = self
            .pool()
            .add_next(sender, add, &account, parent.header().gas_limit, |nonce| {
                ImpersonatedTx::new(
                    TxEip1559 {
                        chain_id,
                        nonce,
                        gas_limit,
                        max_fee_per_gas,
                        max_priority_fee_per_gas,
                        to,
                        value,
                        access_list: Default::default(),
                        input,
                    },
                    sender,
                )
            })
            .await
            .map_err(|err| vec![HandlerError::unexpected(err.to_string())])?;

        if let Err(errors) = self.settle_balance(&tx, opts.skip_balance).await {
            self.pool().remove_by_hash(tx.hash()).await;
            return Err(errors);
        }

        debug!(tx_hash = %tx.hash(), nonce = tx.nonce(), "transaction admitted");
        self.emit(NodeEvent::NewPendingTransaction(tx.hash()));
        Ok(tx)
    }

    /// Ensure the sender can pay for `tx`, topping it up when the balance
    /// check was skipped.
    async fn settle_balance(&self, tx: &ImpersonatedTx, skip_balance: bool) -> Result<(), Vec<HandlerError>> {
        let sender = tx.sender();
        let required = tx.up_front_cost();

        let mut live = self.vm().write().await;
        let balance = match live.state().get_account(sender) {
            Ok(info) => info.map(|info| info.balance).unwrap_or(U256::ZERO),
            Err(err) => return Err(vec![HandlerError::new(ErrorTag::NoBalance, err.to_string())]),
        };
        if !skip_balance || balance >= required {
            return Ok(());
        }

        debug!(%sender, %balance, %required, "topping up sender balance");
        let top_up = SetAccountParams { address: sender, balance: Some(required), ..Default::default() };
        let errors = write_account(live.state_mut(), &top_up);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into_iter().map(|err| HandlerError::unexpected(err.message)).collect())
        }
    }
}
