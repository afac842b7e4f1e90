use crate::{
    chain::Block,
    error::HandlerError,
    state::{ForkDb, StateManager},
    vm::Vm,
};
use tracing::{debug, instrument, warn};

/// An isolated copy of the VM whose state is the post-state of `block`.
///
/// The head's state is the live state, so a head clone is a plain copy.
/// Older blocks are restored by state root, and forked on demand when the
/// root is unknown locally.
pub(crate) fn clone_vm_with_block(live: &Vm, head: &Block, block: &Block) -> Result<Vm, HandlerError> {
    let mut vm = live.deep_copy();
    if block.hash() == head.hash() {
        return Ok(vm);
    }

    let root = block.header().state_root;
    if vm.state().has_state_root(root) {
        debug!(number = block.number(), %root, "restoring cached state");
        vm.state_mut().set_state_root(root)?;
        return Ok(vm);
    }

    match live.state().fork() {
        Some(fork) => Ok(fork_and_cache(&vm, block, fork)),
        None => Err(HandlerError::unexpected(format!(
            "no state is known for block {} ({})",
            block.number(),
            block.hash()
        ))),
    }
}

/// Materialize the post-state of `block` from the fork and register it under
/// the block's state root in the store shared with the live state.
///
/// Known transactions are replayed on the parent state. A block fetched
/// without its transactions is served from the fork at its own height.
/// Replay failures are logged; the state is cached regardless.
#[instrument(skip_all, fields(number = block.number()))]
pub(crate) fn fork_and_cache(vm: &Vm, block: &Block, fork: &ForkDb) -> Vm {
    warn!("state of block is not cached, forking it from the remote; this is slow");

    let replay = !block.transactions().is_empty();
    let base = if replay { fork.at(block.number().saturating_sub(1)) } else { fork.at(block.number()) };
    let state = StateManager::new(Some(base)).with_roots(vm.state().roots().clone());
    let mut fresh = vm.with_state(state);

    for tx in block.transactions() {
        if let Err(err) = fresh.run_tx(block, tx) {
            warn!(tx_hash = %tx.hash(), %err, "failed to replay transaction");
        }
    }

    fresh.state().graft(block.header().state_root);
    fresh
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::MemoryFork;
    use alloy::{
        consensus::Header,
        primitives::{Address, Bytes, B256, U256},
    };
    use revm::primitives::hardfork::SpecId;
    use std::sync::Arc;

    fn forked_vm(fork: &MemoryFork, number: u64) -> Vm {
        let state = StateManager::new(Some(ForkDb::new(Arc::new(fork.clone()), number)));
        Vm::new(state, 1, SpecId::PRAGUE)
    }

    fn block(number: u64, root: u8) -> Block {
        Block::new(
            Header { number, state_root: B256::repeat_byte(root), gas_limit: 30_000_000, ..Default::default() },
            vec![],
        )
    }

    #[test]
    fn head_is_a_plain_copy() {
        let fork = MemoryFork::default();
        let live = forked_vm(&fork, 10);
        let head = block(10, 1);
        let vm = clone_vm_with_block(&live, &head, &head).unwrap();
        assert_eq!(vm.state().fork().unwrap().block_number(), 10);
        assert_eq!(fork.account_fetches(), 0);
    }

    #[test]
    fn uncached_block_is_forked_once() {
        let fork = MemoryFork::default();
        let alice = Address::repeat_byte(0xa1);
        fork.set_account(alice, U256::from(5), 0, Bytes::new());

        let live = forked_vm(&fork, 10);
        let head = block(10, 1);
        let old = block(8, 2);

        let vm = clone_vm_with_block(&live, &head, &old).unwrap();
        assert_eq!(vm.state().fork().unwrap().block_number(), 8);
        assert!(live.state().has_state_root(old.header().state_root));

        // the second clone is served from the cached root
        let again = clone_vm_with_block(&live, &head, &old).unwrap();
        assert_eq!(again.state().get_account(alice).unwrap().unwrap().balance, U256::from(5));
    }

    #[test]
    fn unknown_block_without_fork_fails() {
        let live = Vm::new(StateManager::default(), 1, SpecId::PRAGUE);
        let err = clone_vm_with_block(&live, &block(3, 1), &block(1, 2)).unwrap_err();
        assert_eq!(err.tag, crate::error::ErrorTag::Unexpected);
    }
}
