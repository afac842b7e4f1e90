//! Versioned, checkpointed and forkable world state.
//!
//! The [`StateManager`] keeps every local write in a copy-on-write [`Cache`]
//! layered over an optional [`ForkDb`]. Reads fall through to the fork when
//! the cache has no answer. Cloning a state manager costs a few reference
//! count increments: the cache is only copied when one of the clones writes.
//!
//! Snapshots of the state are registered under their state root in a store
//! shared by every clone, so a root computed on one clone can be restored on
//! any other.

mod fork;
pub use fork::{ForkBackend, ForkDb};

mod root;

#[cfg(feature = "alloy-db")]
mod alloy;
#[cfg(feature = "alloy-db")]
pub use alloy::AlloyFork;

use crate::error::{ErrorTag, HandlerError};
use ::alloy::{
    consensus::constants::KECCAK_EMPTY,
    primitives::{Address, Bytes, B256, U256},
};
use dashmap::DashMap;
use revm::{
    bytecode::Bytecode,
    database::{in_memory_db::Cache, AccountState, DbAccount},
    database_interface::DBErrorMarker,
    primitives::HashMap,
    state::{Account, AccountInfo},
    Database, DatabaseCommit, DatabaseRef,
};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    sync::{Arc, OnceLock},
};

/// Errors produced by the state manager and its fork backends.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum StateError {
    /// The fork backend failed.
    #[error("fork backend error: {0}")]
    Fork(String),
    /// No snapshot is registered under the state root.
    #[error("unknown state root {0}")]
    UnknownStateRoot(B256),
    /// Commit or revert without a matching checkpoint.
    #[error("no open checkpoint")]
    NoCheckpoint,
    /// Code was referenced by hash but is not known.
    #[error("code for hash {0} not found")]
    MissingCode(B256),
    /// The bytecode could not be decoded.
    #[error("invalid bytecode: {0}")]
    InvalidBytecode(String),
}

impl DBErrorMarker for StateError {}

impl From<StateError> for HandlerError {
    fn from(err: StateError) -> Self {
        let tag = match err {
            StateError::InvalidBytecode(_) => ErrorTag::InvalidBytecode,
            _ => ErrorTag::Unexpected,
        };
        Self::new(tag, err.to_string())
    }
}

/// A snapshot of the state, restorable by state root.
#[derive(Debug, Clone)]
struct Snapshot {
    cache: Arc<Cache>,
    base: Option<ForkDb>,
}

#[derive(Debug, Default)]
struct RootsInner {
    snapshots: DashMap<B256, Snapshot>,
    genesis: OnceLock<B256>,
}

/// Store of state snapshots keyed by state root, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct StateRoots(Arc<RootsInner>);

impl StateRoots {
    /// Number of registered roots.
    pub fn len(&self) -> usize {
        self.0.snapshots.len()
    }

    /// True if no root is registered.
    pub fn is_empty(&self) -> bool {
        self.0.snapshots.is_empty()
    }
}

/// An account as dumped from the local state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDump {
    /// Balance in wei.
    pub balance: U256,
    /// Account nonce.
    pub nonce: u64,
    /// Deployed bytecode.
    pub code: Bytes,
    /// Locally known non-zero storage.
    pub storage: BTreeMap<B256, B256>,
}

/// Versioned world state: a copy-on-write write cache over an optional fork.
#[derive(Debug, Clone, Default)]
pub struct StateManager {
    cache: Arc<Cache>,
    base: Option<ForkDb>,
    checkpoints: Vec<Arc<Cache>>,
    roots: StateRoots,
}

impl StateManager {
    /// A state manager with no local state, reading through to `base` if
    /// given.
    pub fn new(base: Option<ForkDb>) -> Self {
        Self { base, ..Default::default() }
    }

    /// The local write cache.
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// The fork this state reads through to, if any.
    pub const fn fork(&self) -> Option<&ForkDb> {
        self.base.as_ref()
    }

    /// The shared snapshot store.
    pub const fn roots(&self) -> &StateRoots {
        &self.roots
    }

    /// Use `roots` as the snapshot store.
    pub fn with_roots(mut self, roots: StateRoots) -> Self {
        self.roots = roots;
        self
    }

    /// Number of open checkpoints.
    pub fn checkpoint_depth(&self) -> usize {
        self.checkpoints.len()
    }

    fn cache_mut(&mut self) -> &mut Cache {
        Arc::make_mut(&mut self.cache)
    }

    /// Inserts the account's code into the contract table.
    fn insert_contract(&mut self, account: &mut AccountInfo) {
        if let Some(code) = &account.code {
            if !code.is_empty() {
                if account.code_hash == KECCAK_EMPTY || account.code_hash.is_zero() {
                    account.code_hash = code.hash_slow();
                }
                let code = code.clone();
                self.cache_mut().contracts.entry(account.code_hash).or_insert(code);
            }
        }
        if account.code_hash.is_zero() {
            account.code_hash = KECCAK_EMPTY;
        }
    }

    /// Mutable access to the cached account, materializing it from the fork
    /// when it is not cached yet.
    fn account_mut(&mut self, address: Address) -> Result<&mut DbAccount, StateError> {
        if !self.cache.accounts.contains_key(&address) {
            let mut info = match &self.base {
                Some(base) => base.basic_ref(address)?.unwrap_or_default(),
                None => AccountInfo::default(),
            };
            if info.code.is_none() && info.code_hash != KECCAK_EMPTY && !info.code_hash.is_zero()
            {
                info.code = Some(self.code_by_hash_ref(info.code_hash)?);
            }
            self.insert_contract(&mut info);
            self.cache_mut().accounts.insert(
                address,
                DbAccount { info, account_state: AccountState::Touched, ..Default::default() },
            );
        }

        let account = self.cache_mut().accounts.entry(address).or_default();
        if matches!(account.account_state, AccountState::NotExisting) {
            account.account_state = AccountState::StorageCleared;
        }
        Ok(account)
    }

    /// Read an account, with its code loaded.
    pub fn get_account(&self, address: Address) -> Result<Option<AccountInfo>, StateError> {
        let Some(mut info) = self.basic_ref(address)? else { return Ok(None) };
        if info.code.is_none() && info.code_hash != KECCAK_EMPTY && !info.code_hash.is_zero() {
            info.code = Some(self.code_by_hash_ref(info.code_hash)?);
        }
        Ok(Some(info))
    }

    /// Write balance, nonce and code of an account. Storage is untouched.
    pub fn put_account(&mut self, address: Address, mut info: AccountInfo) -> Result<(), StateError> {
        self.insert_contract(&mut info);
        let account = self.account_mut(address)?;
        account.info = info;
        Ok(())
    }

    /// The deployed bytecode of an account, empty if none.
    pub fn get_contract_code(&self, address: Address) -> Result<Bytes, StateError> {
        Ok(self
            .get_account(address)?
            .and_then(|info| info.code)
            .map(|code| code.original_bytes())
            .unwrap_or_default())
    }

    /// Replace the deployed bytecode of an account.
    pub fn put_contract_code(&mut self, address: Address, code: Bytes) -> Result<(), StateError> {
        let bytecode = if code.is_empty() {
            Bytecode::default()
        } else {
            Bytecode::new_raw_checked(code)
                .map_err(|err| StateError::InvalidBytecode(err.to_string()))?
        };
        let mut info = self.account_mut(address)?.info.clone();
        info.code_hash = if bytecode.is_empty() { KECCAK_EMPTY } else { bytecode.hash_slow() };
        info.code = Some(bytecode);
        self.put_account(address, info)
    }

    /// Read a storage slot.
    pub fn get_contract_storage(&self, address: Address, slot: B256) -> Result<B256, StateError> {
        self.storage_ref(address, U256::from_be_bytes(slot.0)).map(|value| B256::from(value.to_be_bytes::<32>()))
    }

    /// Write a storage slot. A zero value shadows any forked value.
    pub fn put_contract_storage(
        &mut self,
        address: Address,
        slot: B256,
        value: B256,
    ) -> Result<(), StateError> {
        self.account_mut(address)?
            .storage
            .insert(U256::from_be_bytes(slot.0), U256::from_be_bytes(value.0));
        Ok(())
    }

    /// Drop every storage slot of an account, including forked ones.
    pub fn clear_contract_storage(&mut self, address: Address) -> Result<(), StateError> {
        let account = self.account_mut(address)?;
        account.storage.clear();
        account.account_state = AccountState::StorageCleared;
        Ok(())
    }

    /// The locally known non-zero storage of an account.
    pub fn dump_storage(&self, address: Address) -> BTreeMap<B256, B256> {
        self.cache
            .accounts
            .get(&address)
            .map(|account| {
                account
                    .storage
                    .iter()
                    .filter(|(_, value)| !value.is_zero())
                    .map(|(slot, value)| (B256::from(slot.to_be_bytes::<32>()), B256::from(value.to_be_bytes::<32>())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The storage root of the locally known storage of an account.
    pub fn storage_root(&self, address: Address) -> B256 {
        self.cache
            .accounts
            .get(&address)
            .map(|account| root::storage_root(account.storage.iter()))
            .unwrap_or(::alloy::trie::EMPTY_ROOT_HASH)
    }

    /// Open a checkpoint. Every checkpoint must be closed by
    /// [`Self::commit`] or [`Self::revert`].
    pub fn checkpoint(&mut self) {
        self.checkpoints.push(self.cache.clone());
    }

    /// Close the innermost checkpoint, keeping its writes. With `flush`, the
    /// resulting state is also registered under its state root.
    pub fn commit(&mut self, flush: bool) -> Result<(), StateError> {
        self.checkpoints.pop().ok_or(StateError::NoCheckpoint)?;
        if flush {
            self.save_state_root();
        }
        Ok(())
    }

    /// Close the innermost checkpoint, discarding its writes.
    pub fn revert(&mut self) -> Result<(), StateError> {
        self.cache = self.checkpoints.pop().ok_or(StateError::NoCheckpoint)?;
        Ok(())
    }

    /// True if a snapshot is registered under `root`.
    pub fn has_state_root(&self, root: B256) -> bool {
        self.roots.0.snapshots.contains_key(&root)
    }

    /// Restore the snapshot registered under `root`. Open checkpoints are
    /// discarded.
    pub fn set_state_root(&mut self, root: B256) -> Result<(), StateError> {
        let snapshot =
            self.roots.0.snapshots.get(&root).ok_or(StateError::UnknownStateRoot(root))?;
        self.cache = snapshot.cache.clone();
        self.base = snapshot.base.clone();
        self.checkpoints.clear();
        Ok(())
    }

    /// Register the current state under `root`.
    pub fn graft(&self, root: B256) {
        self.roots.0.snapshots.insert(root, Snapshot { cache: self.cache.clone(), base: self.base.clone() });
    }

    /// Compute the current state root and register the state under it.
    pub fn save_state_root(&self) -> B256 {
        let root = self.state_root();
        self.graft(root);
        root
    }

    /// Register the current state as genesis.
    pub fn save_genesis(&self) -> B256 {
        let root = self.save_state_root();
        let _ = self.roots.0.genesis.set(root);
        root
    }

    /// The state root of the locally materialized accounts.
    ///
    /// On a fork this covers only accounts and slots that were written
    /// locally.
    pub fn state_root(&self) -> B256 {
        root::state_root(self.cache.accounts.iter().filter_map(|(address, account)| {
            if matches!(account.account_state, AccountState::NotExisting) {
                return None;
            }
            Some((address, &account.info, root::storage_root(account.storage.iter())))
        }))
    }

    /// Dump the accounts of the genesis state.
    pub fn dump_canonical_genesis(&self) -> Result<BTreeMap<Address, AccountDump>, StateError> {
        let Some(root) = self.roots.0.genesis.get() else { return Ok(BTreeMap::new()) };
        let snapshot = self
            .roots
            .0
            .snapshots
            .get(root)
            .map(|s| s.cache.clone())
            .ok_or(StateError::UnknownStateRoot(*root))?;

        snapshot
            .accounts
            .iter()
            .filter(|(_, account)| !matches!(account.account_state, AccountState::NotExisting))
            .map(|(address, account)| {
                let code = match &account.info.code {
                    Some(code) => code.original_bytes(),
                    None => snapshot
                        .contracts
                        .get(&account.info.code_hash)
                        .map(Bytecode::original_bytes)
                        .unwrap_or_default(),
                };
                let storage = account
                    .storage
                    .iter()
                    .filter(|(_, value)| !value.is_zero())
                    .map(|(slot, value)| (B256::from(slot.to_be_bytes::<32>()), B256::from(value.to_be_bytes::<32>())))
                    .collect();
                Ok((
                    *address,
                    AccountDump {
                        balance: account.info.balance,
                        nonce: account.info.nonce,
                        code,
                        storage,
                    },
                ))
            })
            .collect()
    }

    /// Record a block hash for `BLOCKHASH`.
    pub fn put_block_hash(&mut self, number: u64, hash: B256) {
        self.cache_mut().block_hashes.insert(U256::from(number), hash);
    }
}

impl Database for StateManager {
    type Error = StateError;

    fn basic(&mut self, address: Address) -> Result<Option<AccountInfo>, Self::Error> {
        self.basic_ref(address)
    }

    fn code_by_hash(&mut self, code_hash: B256) -> Result<Bytecode, Self::Error> {
        self.code_by_hash_ref(code_hash)
    }

    fn storage(&mut self, address: Address, index: U256) -> Result<U256, Self::Error> {
        self.storage_ref(address, index)
    }

    fn block_hash(&mut self, number: u64) -> Result<B256, Self::Error> {
        self.block_hash_ref(number)
    }
}

impl DatabaseRef for StateManager {
    type Error = StateError;

    fn basic_ref(&self, address: Address) -> Result<Option<AccountInfo>, Self::Error> {
        if let Some(account) = self.cache.accounts.get(&address) {
            return Ok(account.info());
        }
        match &self.base {
            Some(base) => base.basic_ref(address),
            None => Ok(None),
        }
    }

    fn code_by_hash_ref(&self, code_hash: B256) -> Result<Bytecode, Self::Error> {
        if code_hash == KECCAK_EMPTY || code_hash.is_zero() {
            return Ok(Bytecode::default());
        }
        if let Some(code) = self.cache.contracts.get(&code_hash) {
            return Ok(code.clone());
        }
        match &self.base {
            Some(base) => base.code_by_hash_ref(code_hash),
            None => Err(StateError::MissingCode(code_hash)),
        }
    }

    fn storage_ref(&self, address: Address, index: U256) -> Result<U256, Self::Error> {
        if let Some(account) = self.cache.accounts.get(&address) {
            if let Some(value) = account.storage.get(&index) {
                return Ok(*value);
            }
            if matches!(
                account.account_state,
                AccountState::StorageCleared | AccountState::NotExisting
            ) {
                return Ok(U256::ZERO);
            }
        }
        match &self.base {
            Some(base) => base.storage_ref(address, index),
            None => Ok(U256::ZERO),
        }
    }

    fn block_hash_ref(&self, number: u64) -> Result<B256, Self::Error> {
        if let Some(hash) = self.cache.block_hashes.get(&U256::from(number)) {
            return Ok(*hash);
        }
        match &self.base {
            Some(base) => base.block_hash_ref(number),
            None => Ok(B256::ZERO),
        }
    }
}

impl DatabaseCommit for StateManager {
    fn commit(&mut self, changes: HashMap<Address, Account>) {
        for (address, mut account) in changes {
            if !account.is_touched() {
                continue;
            }

            if account.is_selfdestructed() {
                let db_account = self.cache_mut().accounts.entry(address).or_default();
                db_account.storage.clear();
                db_account.account_state = AccountState::NotExisting;
                db_account.info = AccountInfo::default();
                continue;
            }

            let is_newly_created = account.is_created();
            self.insert_contract(&mut account.info);

            let db_account = self.cache_mut().accounts.entry(address).or_default();
            db_account.info = account.info;

            db_account.account_state = if is_newly_created {
                db_account.storage.clear();
                AccountState::StorageCleared
            } else if db_account.account_state.is_storage_cleared() {
                AccountState::StorageCleared
            } else {
                AccountState::Touched
            };

            db_account.storage.extend(
                account.storage.into_iter().map(|(key, value)| (key, value.present_value())),
            );
        }
    }
}
