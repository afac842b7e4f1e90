use super::{CallParams, ExecutionOptions};
use crate::{
    account::{write_account, SetAccountParams},
    chain::Block,
    error::HandlerError,
    vm::Vm,
};
use alloy::eips::{BlockId, BlockNumberOrTag};
use std::sync::Arc;
use tracing::{debug, warn};

/// The normalizer's output. Errors never stop the remaining fields from
/// being populated.
#[derive(Debug, Clone)]
pub struct NormalizedOptions {
    /// The execution options.
    pub data: ExecutionOptions,
    /// Errors raised while normalizing.
    pub errors: Vec<HandlerError>,
}

/// The block a tag refers to.
///
/// Tags other than `latest` are not resolved yet; every tag executes on the
/// canonical head.
pub fn resolve_block_tag(tag: Option<BlockId>, head: &Arc<Block>) -> Arc<Block> {
    match tag {
        None | Some(BlockId::Number(BlockNumberOrTag::Latest)) => {}
        Some(tag) => warn!(?tag, head = head.number(), "block tag resolves to the canonical head"),
    }
    head.clone()
}

/// Convert a call request into execution options.
///
/// Block overrides are merged over `block`. State overrides are written into
/// `vm`'s state, which must be the call's own clone.
pub fn call_handler_opts(params: &CallParams, block: &Arc<Block>, vm: &mut Vm) -> NormalizedOptions {
    let mut errors = Vec::new();

    let block = match &params.block_override_set {
        Some(overrides) => {
            let mut header = block.header().clone();
            if let Some(coinbase) = overrides.coinbase {
                header.beneficiary = coinbase;
            }
            if let Some(number) = overrides.number {
                header.number = number;
            }
            if let Some(gas_limit) = overrides.gas_limit {
                header.gas_limit = gas_limit;
            }
            if let Some(time) = overrides.time {
                header.timestamp = time;
            }
            if let Some(base_fee) = overrides.base_fee {
                header.base_fee_per_gas = Some(base_fee);
            }
            Arc::new(Block::new(header, vec![]))
        }
        None => block.clone(),
    };

    for (address, account) in params.state_override_set.iter().flatten() {
        let write = SetAccountParams::from_override(*address, account);
        errors.extend(write_account(vm.state_mut(), &write).into_iter().map(|err| {
            HandlerError::new(err.tag, format!("state override for {address}: {}", err.message))
        }));
    }

    let data = ExecutionOptions {
        to: params.to,
        caller: params.caller.or(params.from),
        origin: params.origin.or(params.from),
        data: params.data.clone(),
        value: params.value,
        gas_limit: params.gas,
        gas_price: params.gas_price.or(params.max_fee_per_gas),
        max_priority_fee_per_gas: params.max_priority_fee_per_gas,
        gas_refund: params.gas_refund,
        salt: params.salt.clone(),
        selfdestruct: params.selfdestruct.as_ref().map(|set| set.iter().copied().collect()),
        depth: params.depth,
        blob_versioned_hashes: params.blob_versioned_hashes.clone(),
        nonce: None,
        blob_base_fee: params.block_override_set.as_ref().and_then(|o| o.blob_base_fee),
        skip_balance: params.skip_balance.unwrap_or(false),
        block,
    };

    NormalizedOptions { data, errors }
}
