use super::ExecutionOptions;
use crate::{
    chain::Block,
    error::HandlerError,
    vm::{Capture, Vm},
};
use alloy::{
    primitives::{address, Address, Bytes, U256},
    sol,
    sol_types::SolCall,
};
use std::sync::Arc;

sol! {
    /// The OP-stack L1 fee oracle predeploy.
    #[allow(missing_docs)]
    interface GasPriceOracle {
        function getL1Fee(bytes memory _data) external view returns (uint256);
        function getL1GasUsed(bytes memory _data) external view returns (uint256);
        function l1BaseFee() external view returns (uint256);
        function blobBaseFee() external view returns (uint256);
    }
}

/// Address of the OP-stack `GasPriceOracle` predeploy.
pub const GAS_PRICE_ORACLE: Address = address!("0x420000000000000000000000000000000000000F");

/// The L1 data fee components of a transaction on an OP-stack chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct L1FeeInfo {
    /// Fee charged for posting the transaction to L1.
    pub l1_fee: U256,
    /// L1 base fee.
    pub l1_base_fee: U256,
    /// L1 blob base fee.
    pub l1_blob_fee: U256,
    /// L1 gas the transaction data accounts for.
    pub l1_gas_used: U256,
}

/// Query the oracle for the L1 fee of a serialized transaction.
///
/// The calls run against `vm` and never modify it.
pub fn l1_fee_info(vm: &mut Vm, block: &Arc<Block>, serialized_tx: &Bytes) -> Result<L1FeeInfo, HandlerError> {
    let data = serialized_tx.clone();
    Ok(L1FeeInfo {
        l1_fee: oracle_call(vm, block, GasPriceOracle::getL1FeeCall { _data: data.clone() })?,
        l1_base_fee: oracle_call(vm, block, GasPriceOracle::l1BaseFeeCall {})?,
        l1_blob_fee: oracle_call(vm, block, GasPriceOracle::blobBaseFeeCall {})?,
        l1_gas_used: oracle_call(vm, block, GasPriceOracle::getL1GasUsedCall { _data: data })?,
    })
}

fn oracle_call<C>(vm: &mut Vm, block: &Arc<Block>, call: C) -> Result<U256, HandlerError>
where
    C: SolCall<Return = U256>,
{
    let mut opts = ExecutionOptions::new(block.clone());
    opts.to = Some(GAS_PRICE_ORACLE);
    opts.data = Some(call.abi_encode().into());
    opts.skip_balance = true;

    let execution = vm.run_call(&opts, Capture::default()).map_err(|err| err.to_handler_error())?;
    if let Some(exception) = &execution.exception {
        return Err(exception.to_handler_error());
    }
    C::abi_decode_returns(&execution.return_value).map_err(|err| {
        HandlerError::unexpected(format!("{} returned an undecodable value: {err}", C::SIGNATURE))
    })
}
