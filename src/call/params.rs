use alloy::{
    eips::BlockId,
    primitives::{Address, Bytes, B256, U256},
};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Whether a call's effects are admitted into the mempool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CreateTransaction {
    /// Admit whatever the outcome.
    Always,
    /// Never admit.
    Never,
    /// Admit only if execution raised no exception.
    OnSuccess,
}

impl CreateTransaction {
    /// Decide admission given whether execution succeeded.
    pub const fn admits(self, success: bool) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::OnSuccess => success,
        }
    }
}

impl From<bool> for CreateTransaction {
    fn from(value: bool) -> Self {
        if value {
            Self::Always
        } else {
            Self::Never
        }
    }
}

impl<'de> Deserialize<'de> for CreateTransaction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Str(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Bool(value) => Ok(value.into()),
            Raw::Str(value) => match value.as_str() {
                "always" => Ok(Self::Always),
                "never" => Ok(Self::Never),
                "on-success" => Ok(Self::OnSuccess),
                other => Err(de::Error::unknown_variant(other, &["always", "never", "on-success"])),
            },
        }
    }
}

/// Header fields a call may override on top of the head block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockOverrideSet {
    /// Block beneficiary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coinbase: Option<Address>,
    /// Block number.
    #[serde(default, with = "alloy::serde::quantity::opt", skip_serializing_if = "Option::is_none")]
    pub number: Option<u64>,
    /// Block gas limit.
    #[serde(default, with = "alloy::serde::quantity::opt", skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
    /// Block timestamp.
    #[serde(default, with = "alloy::serde::quantity::opt", skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,
    /// Base fee per gas.
    #[serde(default, with = "alloy::serde::quantity::opt", skip_serializing_if = "Option::is_none")]
    pub base_fee: Option<u64>,
    /// Blob base fee per gas.
    #[serde(default, with = "alloy::serde::quantity::opt", skip_serializing_if = "Option::is_none")]
    pub blob_base_fee: Option<u128>,
}

/// Account fields a call may override before executing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountOverride {
    /// Balance in wei.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<U256>,
    /// Account nonce.
    #[serde(default, with = "alloy::serde::quantity::opt", skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    /// Deployed bytecode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Bytes>,
    /// Storage replacing all existing storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<BTreeMap<B256, B256>>,
    /// Storage merged over existing storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_diff: Option<BTreeMap<B256, B256>>,
}

/// Per-account overrides applied to the call's VM clone.
pub type StateOverrideSet = BTreeMap<Address, AccountOverride>;

/// A loosely specified call request.
///
/// Absent fields are left for the normalizer to default. `caller` and
/// `origin` take precedence over `from`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallParams {
    /// Call target. Absent for a create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    /// `msg.sender` of the outermost frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller: Option<Address>,
    /// `tx.origin`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Address>,
    /// Fallback for both `caller` and `origin`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    /// Call data, or init code for a create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,
    /// Value transferred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    /// Gas limit.
    #[serde(default, with = "alloy::serde::quantity::opt", skip_serializing_if = "Option::is_none")]
    pub gas: Option<u64>,
    /// Legacy gas price.
    #[serde(default, with = "alloy::serde::quantity::opt", skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<u128>,
    /// EIP-1559 max fee per gas.
    #[serde(default, with = "alloy::serde::quantity::opt", skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<u128>,
    /// EIP-1559 max priority fee per gas.
    #[serde(default, with = "alloy::serde::quantity::opt", skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<u128>,
    /// Refund counter to start from. Validated but not applied, revm has no
    /// hook to seed the top-level refund counter.
    #[serde(default, with = "alloy::serde::quantity::opt", skip_serializing_if = "Option::is_none")]
    pub gas_refund: Option<u64>,
    /// CREATE2 salt. Validated but not applied to top-level calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<Bytes>,
    /// Addresses to treat as already self-destructed. Validated but not
    /// applied to top-level calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selfdestruct: Option<Vec<Address>>,
    /// Call depth to start at. Validated but not applied to top-level calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u64>,
    /// EIP-4844 blob versioned hashes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_versioned_hashes: Option<Vec<B256>>,
    /// Block to execute against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_tag: Option<BlockId>,
    /// Header overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_override_set: Option<BlockOverrideSet>,
    /// Account overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_override_set: Option<StateOverrideSet>,
    /// Admission policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_transaction: Option<CreateTransaction>,
    /// Alias of `create_transaction`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_to_mempool: Option<CreateTransaction>,
    /// Admit, then mine a block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_to_blockchain: Option<CreateTransaction>,
    /// Disable the balance check, and top the sender up on admission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_balance: Option<bool>,
    /// Record a struct-log trace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_trace: Option<bool>,
    /// Record an access list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_access_list: Option<bool>,
    /// Raise errors instead of returning them inline. Defaults to true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throw_on_fail: Option<bool>,
}

impl CallParams {
    /// A call to `to`.
    pub fn to(to: Address) -> Self {
        Self { to: Some(to), ..Default::default() }
    }

    /// The effective admission policy and whether a block should be mined
    /// after admission.
    pub fn admission(&self) -> (Option<CreateTransaction>, bool) {
        if let Some(policy) = self.add_to_blockchain {
            return (Some(policy), true);
        }
        (self.create_transaction.or(self.add_to_mempool), false)
    }

    /// True unless the caller asked for errors inline.
    pub fn throws(&self) -> bool {
        self.throw_on_fail.unwrap_or(true)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn admission_policy_from_json() {
        let p: CallParams = serde_json::from_str(r#"{"createTransaction": true}"#).unwrap();
        assert_eq!(p.admission(), (Some(CreateTransaction::Always), false));

        let p: CallParams = serde_json::from_str(r#"{"addToMempool": "on-success"}"#).unwrap();
        assert_eq!(p.admission(), (Some(CreateTransaction::OnSuccess), false));

        let p: CallParams = serde_json::from_str(r#"{"addToBlockchain": "never"}"#).unwrap();
        assert_eq!(p.admission(), (Some(CreateTransaction::Never), true));

        assert!(serde_json::from_str::<CallParams>(r#"{"createTransaction": "sometimes"}"#).is_err());
    }

    #[test]
    fn policy_decisions() {
        assert!(CreateTransaction::Always.admits(false));
        assert!(!CreateTransaction::Never.admits(true));
        assert!(CreateTransaction::OnSuccess.admits(true));
        assert!(!CreateTransaction::OnSuccess.admits(false));
    }

    #[test]
    fn camel_case_fields() {
        let p: CallParams = serde_json::from_str(
            r#"{
                "to": "0x6969696969696969696969696969696969696969",
                "gas": "0x5208",
                "skipBalance": true,
                "stateOverrideSet": {
                    "0x6969696969696969696969696969696969696969": { "balance": "0x1", "stateDiff": {} }
                },
                "blockTag": "latest"
            }"#,
        )
        .unwrap();
        assert_eq!(p.to, Some(Address::repeat_byte(0x69)));
        assert_eq!(p.gas, Some(21_000));
        assert_eq!(p.skip_balance, Some(true));
        assert!(p.throws());
        let overrides = p.state_override_set.unwrap();
        assert_eq!(overrides[&Address::repeat_byte(0x69)].balance, Some(U256::from(1)));
    }
}
