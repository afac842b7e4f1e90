//! Merkle-Patricia roots over the locally materialized state.

use alloy::{
    consensus::constants::KECCAK_EMPTY,
    primitives::{keccak256, Address, B256, U256},
    rlp::{Encodable, Header},
    trie::{HashBuilder, Nibbles},
};
use revm::state::AccountInfo;

fn trie_root(mut leaves: Vec<(B256, Vec<u8>)>) -> B256 {
    leaves.sort_unstable_by(|a, b| a.0.cmp(&b.0));
    let mut builder = HashBuilder::default();
    for (key, value) in leaves {
        builder.add_leaf(Nibbles::unpack(key), &value);
    }
    builder.root()
}

/// Storage root of the given slots. Zero slots are not part of the trie.
pub(crate) fn storage_root<'a>(storage: impl IntoIterator<Item = (&'a U256, &'a U256)>) -> B256 {
    let leaves = storage
        .into_iter()
        .filter(|(_, value)| !value.is_zero())
        .map(|(slot, value)| {
            (keccak256(B256::from(slot.to_be_bytes::<32>())), alloy::rlp::encode(*value))
        })
        .collect();
    trie_root(leaves)
}

fn encode_account(info: &AccountInfo, storage_root: B256) -> Vec<u8> {
    let code_hash = if info.code_hash.is_zero() { KECCAK_EMPTY } else { info.code_hash };
    let payload_length = info.nonce.length()
        + info.balance.length()
        + storage_root.length()
        + code_hash.length();

    let mut out = Vec::with_capacity(payload_length + 3);
    Header { list: true, payload_length }.encode(&mut out);
    info.nonce.encode(&mut out);
    info.balance.encode(&mut out);
    storage_root.encode(&mut out);
    code_hash.encode(&mut out);
    out
}

/// State root of the given accounts and their storage roots.
pub(crate) fn state_root<'a>(
    accounts: impl IntoIterator<Item = (&'a Address, &'a AccountInfo, B256)>,
) -> B256 {
    let leaves = accounts
        .into_iter()
        .map(|(address, info, storage_root)| {
            (keccak256(address), encode_account(info, storage_root))
        })
        .collect();
    trie_root(leaves)
}
