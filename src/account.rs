//! `getAccount` and `setAccount`.

use crate::{
    call::{validate_account_override, AccountOverride},
    error::{ErrorTag, HandlerError},
    fail::{maybe_throw_on_fail, HasErrors, TevmFailure},
    node::Node,
    state::StateManager,
};
use alloy::{
    consensus::constants::KECCAK_EMPTY,
    primitives::{Address, Bytes, B256, U256},
    trie::EMPTY_ROOT_HASH,
};
use revm::state::AccountInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Parameters of [`Node::get_account`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAccountParams {
    /// The account to read.
    pub address: Address,
    /// Include the locally cached storage.
    #[serde(default)]
    pub return_storage: bool,
    /// Raise errors instead of returning them inline. Defaults to true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throw_on_fail: Option<bool>,
}

/// An account as reported to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResult {
    /// The account address.
    pub address: Address,
    /// Balance in wei.
    pub balance: U256,
    /// Account nonce.
    pub nonce: u64,
    /// Deployed bytecode.
    pub deployed_bytecode: Bytes,
    /// Hash of the deployed bytecode.
    pub code_hash: B256,
    /// Root of the locally known storage.
    pub storage_root: B256,
    /// True if the account has code.
    pub is_contract: bool,
    /// True if the account is empty in the EIP-161 sense.
    pub is_empty: bool,
    /// The locally cached storage, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<BTreeMap<B256, B256>>,
    /// Errors, if any.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<HandlerError>,
}

impl AccountResult {
    fn empty(address: Address) -> Self {
        Self {
            address,
            balance: U256::ZERO,
            nonce: 0,
            deployed_bytecode: Bytes::new(),
            code_hash: KECCAK_EMPTY,
            storage_root: EMPTY_ROOT_HASH,
            is_contract: false,
            is_empty: true,
            storage: None,
            errors: vec![],
        }
    }

    fn with_error(address: Address, error: HandlerError) -> Self {
        Self { errors: vec![error], ..Self::empty(address) }
    }
}

impl HasErrors for AccountResult {
    fn errors(&self) -> &[HandlerError] {
        &self.errors
    }

    fn take_errors(&mut self) -> Vec<HandlerError> {
        std::mem::take(&mut self.errors)
    }
}

/// Parameters of [`Node::set_account`]. Unset fields keep their current
/// value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAccountParams {
    /// The account to write.
    pub address: Address,
    /// Balance in wei.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<U256>,
    /// Account nonce.
    #[serde(default, with = "alloy::serde::quantity::opt", skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    /// Deployed bytecode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_bytecode: Option<Bytes>,
    /// Storage replacing all existing storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<BTreeMap<B256, B256>>,
    /// Storage merged over existing storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_diff: Option<BTreeMap<B256, B256>>,
    /// Raise errors instead of returning them inline. Defaults to true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throw_on_fail: Option<bool>,
}

impl SetAccountParams {
    /// The write described by a state override entry.
    pub fn from_override(address: Address, account: &AccountOverride) -> Self {
        Self {
            address,
            balance: account.balance,
            nonce: account.nonce,
            deployed_bytecode: account.code.clone(),
            state: account.state.clone(),
            state_diff: account.state_diff.clone(),
            throw_on_fail: Some(false),
        }
    }

    fn as_override(&self) -> AccountOverride {
        AccountOverride {
            balance: self.balance,
            nonce: self.nonce,
            code: self.deployed_bytecode.clone(),
            state: self.state.clone(),
            state_diff: self.state_diff.clone(),
        }
    }
}

/// Result of [`Node::set_account`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAccountResult {
    /// Errors, if any.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<HandlerError>,
}

impl HasErrors for SetAccountResult {
    fn errors(&self) -> &[HandlerError] {
        &self.errors
    }

    fn take_errors(&mut self) -> Vec<HandlerError> {
        std::mem::take(&mut self.errors)
    }
}

/// Read an account from `state`.
pub(crate) fn read_account(state: &StateManager, params: &GetAccountParams) -> AccountResult {
    let address = params.address;
    let info = match state.get_account(address) {
        Ok(Some(info)) => info,
        Ok(None) => {
            return AccountResult::with_error(
                address,
                HandlerError::new(ErrorTag::AccountNotFound, format!("account {address} not found")),
            )
        }
        Err(err) => return AccountResult::with_error(address, err.into()),
    };

    let deployed_bytecode = if info.code_hash == KECCAK_EMPTY {
        Bytes::new()
    } else {
        info.code.as_ref().map(|code| code.original_bytes()).unwrap_or_default()
    };

    AccountResult {
        address,
        balance: info.balance,
        nonce: info.nonce,
        is_contract: !deployed_bytecode.is_empty(),
        is_empty: info.is_empty(),
        deployed_bytecode,
        code_hash: info.code_hash,
        storage_root: state.storage_root(address),
        storage: params.return_storage.then(|| state.dump_storage(address)),
        errors: vec![],
    }
}

/// Apply an account write to `state`.
///
/// Every field is attempted even after another failed. The writes land
/// between a checkpoint and a commit, or are reverted as a whole if any of
/// them failed.
pub(crate) fn write_account(state: &mut StateManager, params: &SetAccountParams) -> Vec<HandlerError> {
    let address = params.address;
    let current = match state.get_account(address) {
        Ok(info) => info.unwrap_or_default(),
        Err(err) => return vec![err.into()],
    };

    state.checkpoint();
    let mut errors = Vec::new();

    let info = AccountInfo {
        balance: params.balance.unwrap_or(current.balance),
        nonce: params.nonce.unwrap_or(current.nonce),
        ..current
    };
    if let Err(err) = state.put_account(address, info) {
        errors.push(err.into());
    }

    if let Some(code) = &params.deployed_bytecode {
        if let Err(err) = state.put_contract_code(address, code.clone()) {
            errors.push(err.into());
        }
    }

    if let Some(storage) = &params.state {
        if let Err(err) = state.clear_contract_storage(address) {
            errors.push(err.into());
        }
        write_storage(state, address, storage, &mut errors);
    }
    if let Some(diff) = &params.state_diff {
        write_storage(state, address, diff, &mut errors);
    }

    if !errors.is_empty() {
        if let Err(err) = state.revert() {
            errors.push(err.into());
        }
        return errors;
    }
    if let Err(err) = state.commit(false) {
        return vec![err.into()];
    }

    if let Some(code) = &params.deployed_bytecode {
        match state.get_contract_code(address) {
            Ok(stored) if stored == *code => {}
            Ok(stored) => errors.push(HandlerError::new(
                ErrorTag::Internal,
                format!("code of {address} reads back as {stored} after writing {code}"),
            )),
            Err(err) => errors.push(err.into()),
        }
    }
    errors
}

fn write_storage(
    state: &mut StateManager,
    address: Address,
    storage: &BTreeMap<B256, B256>,
    errors: &mut Vec<HandlerError>,
) {
    for (slot, value) in storage {
        if let Err(err) = state.put_contract_storage(address, *slot, *value) {
            errors.push(err.into());
        }
    }
}

impl Node {
    /// Read an account from the live state.
    #[instrument(skip(self, params), fields(address = %params.address))]
    pub async fn get_account(&self, params: GetAccountParams) -> Result<AccountResult, TevmFailure> {
        let result = {
            let vm = self.vm().read().await;
            read_account(vm.state(), &params)
        };
        maybe_throw_on_fail(params.throw_on_fail.unwrap_or(true), result)
    }

    /// Write an account into the live state.
    #[instrument(skip(self, params), fields(address = %params.address))]
    pub async fn set_account(
        &self,
        params: SetAccountParams,
    ) -> Result<SetAccountResult, TevmFailure> {
        let throw_on_fail = params.throw_on_fail.unwrap_or(true);

        if let Some(err) = validate_account_override(&params.as_override()) {
            let result = SetAccountResult { errors: vec![HandlerError::invalid_params(err)] };
            return maybe_throw_on_fail(throw_on_fail, result);
        }

        let errors = {
            let mut vm = self.vm().write().await;
            write_account(vm.state_mut(), &params)
        };
        if errors.is_empty() {
            debug!("account written");
        }
        maybe_throw_on_fail(throw_on_fail, SetAccountResult { errors })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::{self, RETURN_42_CODE};

    fn slot(n: u8) -> B256 {
        B256::with_last_byte(n)
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let node = test_utils::test_node();
        let address = Address::repeat_byte(0x33);

        let mut state = BTreeMap::new();
        state.insert(slot(1), slot(7));
        state.insert(slot(2), slot(8));
        node.set_account(SetAccountParams {
            address,
            balance: Some(U256::from(1_000)),
            nonce: Some(5),
            deployed_bytecode: Some(Bytes::from_static(RETURN_42_CODE)),
            state: Some(state),
            ..Default::default()
        })
        .await
        .unwrap();

        let account = node
            .get_account(GetAccountParams { address, return_storage: true, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(account.balance, U256::from(1_000));
        assert_eq!(account.nonce, 5);
        assert_eq!(account.deployed_bytecode, Bytes::from_static(RETURN_42_CODE));
        assert!(account.is_contract);
        assert!(!account.is_empty);
        assert_ne!(account.storage_root, EMPTY_ROOT_HASH);

        let storage = account.storage.unwrap();
        assert_eq!(storage[&slot(1)], slot(7));
        assert_eq!(storage[&slot(2)], slot(8));
    }

    #[tokio::test]
    async fn unset_fields_are_kept() {
        let node = test_utils::test_node();
        let address = Address::repeat_byte(0x34);
        node.set_account(SetAccountParams {
            address,
            balance: Some(U256::from(9)),
            nonce: Some(3),
            ..Default::default()
        })
        .await
        .unwrap();
        node.set_account(SetAccountParams { address, nonce: Some(4), ..Default::default() })
            .await
            .unwrap();

        let account = node.get_account(GetAccountParams { address, ..Default::default() }).await.unwrap();
        assert_eq!(account.balance, U256::from(9));
        assert_eq!(account.nonce, 4);
    }

    #[tokio::test]
    async fn state_replaces_and_state_diff_merges() {
        let node = test_utils::test_node();
        let address = Address::repeat_byte(0x35);

        let mut first = BTreeMap::new();
        first.insert(slot(1), slot(1));
        node.set_account(SetAccountParams { address, state: Some(first), ..Default::default() })
            .await
            .unwrap();

        let mut diff = BTreeMap::new();
        diff.insert(slot(2), slot(2));
        node.set_account(SetAccountParams { address, state_diff: Some(diff), ..Default::default() })
            .await
            .unwrap();
        let get = GetAccountParams { address, return_storage: true, ..Default::default() };
        assert_eq!(node.get_account(get.clone()).await.unwrap().storage.unwrap().len(), 2);

        let mut replacement = BTreeMap::new();
        replacement.insert(slot(3), slot(3));
        node.set_account(SetAccountParams { address, state: Some(replacement), ..Default::default() })
            .await
            .unwrap();
        let storage = node.get_account(get).await.unwrap().storage.unwrap();
        assert_eq!(storage.len(), 1);
        assert_eq!(storage[&slot(3)], slot(3));
    }

    #[tokio::test]
    async fn missing_account_is_reported_inline() {
        let node = test_utils::test_node();
        let address = Address::repeat_byte(0x36);
        let account = node
            .get_account(GetAccountParams { address, throw_on_fail: Some(false), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(account.errors[0].tag, ErrorTag::AccountNotFound);
        assert_eq!(account.balance, U256::ZERO);
        assert!(account.is_empty);

        let err = node.get_account(GetAccountParams { address, ..Default::default() }).await.unwrap_err();
        assert_eq!(err.errors()[0].tag, ErrorTag::AccountNotFound);
    }

    #[tokio::test]
    async fn bad_write_leaves_state_untouched() {
        let node = test_utils::test_node();
        let address = Address::repeat_byte(0x37);

        // a delegation designator must carry a full address
        let result = node
            .set_account(SetAccountParams {
                address,
                balance: Some(U256::from(1)),
                deployed_bytecode: Some(Bytes::from_static(&[0xef, 0x01, 0x00, 0x01])),
                throw_on_fail: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(result.errors[0].tag, ErrorTag::InvalidBytecode);

        let vm = node.vm().read().await;
        assert!(vm.state().get_account(address).unwrap().is_none());
        assert_eq!(vm.state().checkpoint_depth(), 0);
    }

    #[tokio::test]
    async fn conflicting_storage_is_invalid() {
        let node = test_utils::test_node();
        let err = node
            .set_account(SetAccountParams {
                address: Address::repeat_byte(1),
                state: Some(BTreeMap::new()),
                state_diff: Some(BTreeMap::new()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.errors()[0].tag, ErrorTag::InvalidParams);
    }
}
