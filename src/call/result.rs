use super::l1fee::L1FeeInfo;
use crate::{
    error::HandlerError,
    fail::HasErrors,
    tx::ImpersonatedTx,
    vm::Execution,
};
use alloy::{
    eips::{eip2930::AccessList, eip4844::DATA_GAS_PER_BLOB},
    primitives::{Address, Bytes, Log, B256, U256},
    rpc::types::trace::geth::DefaultFrame,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// A log emitted during a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallLog {
    /// Emitting contract.
    pub address: Address,
    /// Indexed topics.
    pub topics: Vec<B256>,
    /// Unindexed data.
    pub data: Bytes,
}

impl From<Log> for CallLog {
    fn from(log: Log) -> Self {
        let (topics, data) = log.data.split();
        Self { address: log.address, topics, data }
    }
}

/// The client-facing result of a call.
///
/// `raw_data` and `execution_gas_used` are always present. Every other field
/// is set only when the execution produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResult {
    /// Return or revert payload.
    pub raw_data: Bytes,
    /// Gas used by execution, excluding intrinsic gas.
    pub execution_gas_used: u64,
    /// Gas left of the limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas: Option<u64>,
    /// Gas refund.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_refund: Option<u64>,
    /// Emitted logs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<CallLog>>,
    /// Address created by a top-level create.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_address: Option<Address>,
    /// Every address created during the call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_addresses: Option<BTreeSet<Address>>,
    /// Every address destroyed during the call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selfdestruct: Option<BTreeSet<Address>>,
    /// Struct-log trace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<DefaultFrame>,
    /// Touched storage keys by address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_list: Option<BTreeMap<Address, BTreeSet<B256>>>,
    /// Hash of the admitted transaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<B256>,
    /// Gas used including intrinsic gas, for an admitted transaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_gas_spent: Option<u64>,
    /// Wei paid for gas, for an admitted transaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_spent: Option<U256>,
    /// Wei paid to the block beneficiary, for an admitted transaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub miner_value: Option<U256>,
    /// Blob gas consumed, for an admitted blob transaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_gas_used: Option<u64>,
    /// L1 data fee, on OP-stack chains.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l1_fee: Option<U256>,
    /// L1 base fee, on OP-stack chains.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l1_base_fee: Option<U256>,
    /// L1 blob base fee, on OP-stack chains.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l1_blob_fee: Option<U256>,
    /// L1 gas used, on OP-stack chains.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l1_gas_used: Option<U256>,
    /// Errors, if any.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<HandlerError>,
}

impl CallResult {
    /// A result carrying only errors: empty data and no gas used.
    pub fn from_errors(errors: Vec<HandlerError>) -> Self {
        Self { errors, ..Default::default() }
    }

    /// A result carrying a single error.
    pub fn from_error(error: HandlerError) -> Self {
        Self::from_errors(vec![error])
    }

    /// True if the result carries no errors.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Record the admitted transaction and what it will cost in a block with
    /// the given base fee.
    pub fn attach_transaction(&mut self, tx: &ImpersonatedTx, gas_used: u64, base_fee: u64) {
        let price = tx.effective_gas_price(base_fee);
        let tip = price.saturating_sub(u128::from(base_fee));
        self.tx_hash = Some(tx.hash());
        self.total_gas_spent = Some(gas_used);
        self.amount_spent = Some(U256::from(gas_used) * U256::from(price));
        self.miner_value = Some(U256::from(gas_used) * U256::from(tip));
    }

    /// Record blob gas for the given number of blobs.
    pub fn attach_blob_gas(&mut self, blobs: usize) {
        if blobs > 0 {
            self.blob_gas_used = Some(DATA_GAS_PER_BLOB * blobs as u64);
        }
    }

    /// Record the L1 fee components.
    pub const fn attach_l1_fee(&mut self, fee: L1FeeInfo) {
        self.l1_fee = Some(fee.l1_fee);
        self.l1_base_fee = Some(fee.l1_base_fee);
        self.l1_blob_fee = Some(fee.l1_blob_fee);
        self.l1_gas_used = Some(fee.l1_gas_used);
    }
}

impl HasErrors for CallResult {
    fn errors(&self) -> &[HandlerError] {
        &self.errors
    }

    fn take_errors(&mut self) -> Vec<HandlerError> {
        std::mem::take(&mut self.errors)
    }
}

fn access_list_by_address(access_list: AccessList) -> BTreeMap<Address, BTreeSet<B256>> {
    let mut out: BTreeMap<Address, BTreeSet<B256>> = BTreeMap::new();
    for item in access_list.0 {
        out.entry(item.address).or_default().extend(item.storage_keys);
    }
    out
}

/// Map an interpreter execution to the client-facing result.
///
/// An exception becomes the result's single error. Collections are included
/// only when non-empty.
pub fn call_handler_result(execution: Execution) -> CallResult {
    let Execution {
        return_value,
        execution_gas_used,
        gas_refund,
        gas_remaining,
        logs,
        selfdestruct,
        created_addresses,
        created_address,
        exception,
        trace,
        access_list,
        ..
    } = execution;

    CallResult {
        raw_data: return_value,
        execution_gas_used,
        gas: Some(gas_remaining),
        gas_refund,
        logs: (!logs.is_empty()).then(|| logs.into_iter().map(CallLog::from).collect()),
        created_address,
        created_addresses: (!created_addresses.is_empty()).then_some(created_addresses),
        selfdestruct: (!selfdestruct.is_empty()).then_some(selfdestruct),
        trace,
        access_list: access_list.map(access_list_by_address),
        errors: exception.iter().map(|exception| exception.to_handler_error()).collect(),
        ..Default::default()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{error::ErrorTag, vm::Exception};
    use alloy::{
        consensus::TxEip1559,
        eips::eip2930::AccessListItem,
        primitives::{LogData, TxKind},
    };

    #[test]
    fn optional_fields_stay_absent() {
        let result = call_handler_result(Execution { gas_remaining: 5, ..Default::default() });
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["rawData"], "0x");
        assert_eq!(json["executionGasUsed"], 0);
        assert_eq!(json["gas"], 5);
        let absent_fields =
            ["gasRefund", "logs", "selfdestruct", "createdAddresses", "accessList", "errors", "txHash", "l1Fee"];
        for absent in absent_fields {
            assert!(json.get(absent).is_none(), "{absent} should be absent");
        }
    }

    #[test]
    fn exception_becomes_error() {
        let result = call_handler_result(Execution {
            return_value: Bytes::from_static(&[0xde, 0xad]),
            exception: Some(Exception::Revert(Bytes::from_static(&[0xde, 0xad]))),
            ..Default::default()
        });
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].tag, ErrorTag::Revert);
        assert_eq!(result.errors[0].message, "0xdead");
        assert_eq!(result.raw_data, Bytes::from_static(&[0xde, 0xad]));
    }

    #[test]
    fn logs_and_access_list_are_mapped() {
        let address = Address::repeat_byte(7);
        let log = Log {
            address,
            data: LogData::new_unchecked(vec![B256::repeat_byte(1)], Bytes::from_static(&[1])),
        };
        let access_list = AccessList(vec![
            AccessListItem { address, storage_keys: vec![B256::ZERO] },
            AccessListItem { address, storage_keys: vec![B256::with_last_byte(1)] },
        ]);
        let result = call_handler_result(Execution {
            logs: vec![log],
            access_list: Some(access_list),
            ..Default::default()
        });

        let logs = result.logs.unwrap();
        assert_eq!(logs[0].address, address);
        assert_eq!(logs[0].topics, vec![B256::repeat_byte(1)]);
        assert_eq!(result.access_list.unwrap()[&address].len(), 2);
    }

    #[test]
    fn transaction_costs() {
        let tx = ImpersonatedTx::new(
            TxEip1559 {
                max_fee_per_gas: 10,
                max_priority_fee_per_gas: 2,
                to: TxKind::Call(Address::ZERO),
                ..Default::default()
            },
            Address::ZERO,
        );
        let mut result = CallResult::default();
        result.attach_transaction(&tx, 21_000, 7);
        assert_eq!(result.tx_hash, Some(tx.hash()));
        assert_eq!(result.amount_spent, Some(U256::from(21_000 * 9)));
        assert_eq!(result.miner_value, Some(U256::from(21_000 * 2)));

        result.attach_blob_gas(2);
        assert_eq!(result.blob_gas_used, Some(2 * DATA_GAS_PER_BLOB));
    }
}
