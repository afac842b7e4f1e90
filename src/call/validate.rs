use super::params::{AccountOverride, CallParams};
use crate::error::{ErrorTag, HandlerError};
use alloy::eips::eip4844::VERSIONED_HASH_VERSION_KZG;

/// Deepest call depth the interpreter supports.
pub const MAX_CALL_DEPTH: u64 = 1024;

/// Structural validation of a call request. Every violation is reported.
pub fn validate_call_params(params: &CallParams) -> Vec<HandlerError> {
    let mut errors = Vec::new();

    let admission_fields = [
        params.create_transaction.is_some(),
        params.add_to_mempool.is_some(),
        params.add_to_blockchain.is_some(),
    ];
    if admission_fields.iter().filter(|set| **set).count() > 1 {
        errors.push(HandlerError::invalid_params(
            "only one of createTransaction, addToMempool and addToBlockchain may be set",
        ));
    }

    if let Some(depth) = params.depth.filter(|depth| *depth > MAX_CALL_DEPTH) {
        errors.push(HandlerError::new(
            ErrorTag::InvalidDepth,
            format!("depth {depth} exceeds the maximum of {MAX_CALL_DEPTH}"),
        ));
    }

    if params.gas == Some(0) {
        errors.push(HandlerError::new(ErrorTag::InvalidGas, "gas must be greater than zero"));
    }

    if let Some(salt) = params.salt.as_ref().filter(|salt| salt.len() > 32) {
        errors.push(HandlerError::new(
            ErrorTag::InvalidSalt,
            format!("salt is {} bytes, at most 32 are allowed", salt.len()),
        ));
    }

    for hash in params.blob_versioned_hashes.iter().flatten() {
        if hash[0] != VERSIONED_HASH_VERSION_KZG {
            errors.push(HandlerError::new(
                ErrorTag::InvalidBlobVersionedHashes,
                format!("blob versioned hash {hash} has an unsupported version"),
            ));
        }
    }

    if params.gas_price.is_some()
        && (params.max_fee_per_gas.is_some() || params.max_priority_fee_per_gas.is_some())
    {
        errors.push(HandlerError::new(
            ErrorTag::InvalidGasPrice,
            "gasPrice cannot be combined with maxFeePerGas or maxPriorityFeePerGas",
        ));
    }
    if let (Some(max_fee), Some(priority)) = (params.max_fee_per_gas, params.max_priority_fee_per_gas)
    {
        if priority > max_fee {
            errors.push(HandlerError::new(
                ErrorTag::InvalidGasPrice,
                format!("maxPriorityFeePerGas {priority} exceeds maxFeePerGas {max_fee}"),
            ));
        }
    }

    for (address, account) in params.state_override_set.iter().flatten() {
        if let Some(err) = validate_account_override(account) {
            errors.push(HandlerError::invalid_params(format!("state override for {address}: {err}")));
        }
    }

    errors
}

/// Checks shared by state overrides and `setAccount`.
pub(crate) fn validate_account_override(account: &AccountOverride) -> Option<&'static str> {
    (account.state.is_some() && account.state_diff.is_some())
        .then_some("state and stateDiff are mutually exclusive")
}
