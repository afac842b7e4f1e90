use super::{
    call_handler_opts, call_handler_result, clone_vm_with_block, l1_fee_info, resolve_block_tag,
    validate_call_params, CallParams, CallResult, NormalizedOptions,
};
use crate::{
    chain::Block,
    error::{ErrorTag, HandlerError},
    fail::{maybe_throw_on_fail, TevmFailure},
    node::Node,
    vm::{Capture, Vm},
};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// A VM and block to run a call on, in place of a clone of the live VM at
/// the head.
#[derive(Debug, Clone)]
pub struct Prepared {
    /// The VM the call runs on.
    pub vm: Vm,
    /// The block the call executes in.
    pub block: Arc<Block>,
}

impl Node {
    /// Execute a call and, if requested, admit it as a transaction.
    #[instrument(skip_all, fields(to = ?params.to))]
    pub async fn call(&self, params: CallParams) -> Result<CallResult, TevmFailure> {
        let throw_on_fail = params.throws();
        let result = self.dispatch(&params, None).await;
        maybe_throw_on_fail(throw_on_fail, result)
    }

    /// The call pipeline. Never fails: every error is carried in the result.
    pub(crate) async fn dispatch(&self, params: &CallParams, prepared: Option<Prepared>) -> CallResult {
        let errors = validate_call_params(params);
        if !errors.is_empty() {
            debug!(count = errors.len(), "call rejected by validation");
            return CallResult::from_errors(errors);
        }

        let head = self.head().await;
        let (mut vm, block) = match prepared {
            Some(Prepared { vm, block }) => (vm, block),
            None => {
                let block = resolve_block_tag(params.block_tag, &head);
                let cloned = {
                    let live = self.vm().read().await;
                    clone_vm_with_block(&live, &head, &block)
                };
                match cloned {
                    Ok(vm) => (vm, block),
                    Err(err) => return CallResult::from_error(err),
                }
            }
        };

        let NormalizedOptions { data: opts, errors } = call_handler_opts(params, &block, &mut vm);
        if !errors.is_empty() {
            return CallResult::from_errors(errors);
        }

        if let Some(to) = opts.to {
            let sends_data = opts.data.as_ref().is_some_and(|data| !data.is_empty());
            let has_code = vm.state().get_contract_code(to).map_or(true, |code| !code.is_empty());
            if sends_data && !has_code && !vm.is_precompile(to) {
                warn!(%to, "sending call data to an address without code");
            }
        }

        let capture = Capture {
            trace: params.create_trace.unwrap_or_default(),
            access_list: params.create_access_list.unwrap_or_default(),
        };
        let execution = match vm.run_call(&opts, capture) {
            Ok(execution) => execution,
            Err(err) => {
                warn!(%err, "interpreter rejected the call");
                return CallResult::from_error(err.to_handler_error());
            }
        };
        let success = execution.is_success();
        let gas_used = execution.gas_used;
        let mut result = call_handler_result(execution);

        let (policy, mine_after) = params.admission();
        if !policy.is_some_and(|policy| policy.admits(success)) {
            return result;
        }

        let sender = opts.sender();
        if !opts.skip_balance {
            let balance = {
                let live = self.vm().read().await;
                live.state().get_account(sender).map(|info| info.unwrap_or_default().balance)
            };
            if !balance.is_ok_and(|balance| !balance.is_zero()) {
                result.errors.push(HandlerError::new(
                    ErrorTag::InsufficientBalance,
                    format!("{sender} has no balance to pay for the transaction"),
                ));
                return result;
            }
        }

        let tx = match self.admit(&opts, result.execution_gas_used, &head).await {
            Ok(tx) => tx,
            Err(errors) => {
                result.errors.extend(errors);
                return result;
            }
        };
        result.attach_transaction(&tx, gas_used, head.next_base_fee());
        result.attach_blob_gas(opts.blob_versioned_hashes.as_ref().map_or(0, Vec::len));

        if self.config().chain_kind.is_op_stack() {
            match l1_fee_info(&mut vm, &head, &tx.encoded()) {
                Ok(fee) => result.attach_l1_fee(fee),
                Err(err) => warn!(%err, "failed to read the L1 fee from the gas price oracle"),
            }
        }

        if mine_after || self.config().mining.is_auto() {
            if let Err(errors) = self.mine_blocks(1).await {
                result.errors.extend(errors);
            }
        }
        result
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        call::{AccountOverride, CreateTransaction, GAS_PRICE_ORACLE},
        config::{ChainKind, MiningMode},
        node::NodeEvent,
        test_utils::{self, ERC20_BALANCE_OF_GAS, ERC20_CODE, RETURN_42_CODE, REVERT_NOPE_CODE, SLOAD_0_CODE},
        GetAccountParams, SetAccountParams,
    };
    use alloy::primitives::{Address, Bytes, B256, U256};
    use std::collections::BTreeMap;

    const RECIPIENT: Address = Address::repeat_byte(0x69);

    fn transfer(value: u64) -> CallParams {
        CallParams {
            to: Some(RECIPIENT),
            value: Some(U256::from(value)),
            skip_balance: Some(true),
            create_transaction: Some(CreateTransaction::Always),
            ..Default::default()
        }
    }

    async fn balance(node: &Node, address: Address) -> U256 {
        node.get_account(GetAccountParams { address, ..Default::default() }).await.unwrap().balance
    }

    async fn deploy_code(node: &Node, address: Address, code: &'static [u8]) {
        node.set_account(SetAccountParams {
            address,
            deployed_bytecode: Some(Bytes::from_static(code)),
            ..Default::default()
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn value_transfer_is_admitted_and_mined() {
        let node = test_utils::test_node();
        let result = node.call(transfer(420)).await.unwrap();

        assert!(result.tx_hash.is_some());
        assert_eq!(result.execution_gas_used, 0);
        assert!(result.raw_data.is_empty());
        assert_eq!(result.total_gas_spent, Some(21_000));

        // the same request on a fresh node yields the same hash
        let other = test_utils::test_node().call(transfer(420)).await.unwrap();
        assert_eq!(other.tx_hash, result.tx_hash);

        node.mine_blocks(1).await.unwrap();
        assert_eq!(balance(&node, RECIPIENT).await, U256::from(420));
        assert!(node.pool().is_empty().await);
    }

    #[tokio::test]
    async fn sequential_admissions_are_nonce_ordered() {
        let node = test_utils::test_node();
        let mut hashes = Vec::new();
        for value in 1..=3 {
            hashes.push(node.call(transfer(value)).await.unwrap().tx_hash.unwrap());
        }

        let pooled = node.pool().get_by_sender_address(Address::ZERO).await;
        assert_eq!(pooled.iter().map(|tx| tx.nonce()).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(pooled.iter().map(|tx| tx.hash()).collect::<Vec<_>>(), hashes);

        node.mine_blocks(1).await.unwrap();
        assert_eq!(balance(&node, RECIPIENT).await, U256::from(6));
        let sender = node
            .get_account(GetAccountParams { address: Address::ZERO, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(sender.nonce, 3);
    }

    #[tokio::test]
    async fn nonce_counts_pooled_transactions() {
        let node = test_utils::test_node();
        node.set_account(SetAccountParams { address: Address::ZERO, nonce: Some(7), ..Default::default() })
            .await
            .unwrap();
        node.call(transfer(1)).await.unwrap();
        node.call(transfer(1)).await.unwrap();

        let pooled = node.pool().get_by_sender_address(Address::ZERO).await;
        assert_eq!(pooled.iter().map(|tx| tx.nonce()).collect::<Vec<_>>(), vec![7, 8]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_admissions_get_distinct_nonces() {
        let node = test_utils::test_node();
        let calls: Vec<_> = (1..=8)
            .map(|value| {
                let node = node.clone();
                tokio::spawn(async move { node.call(transfer(value)).await })
            })
            .collect();
        for call in calls {
            assert!(call.await.unwrap().unwrap().tx_hash.is_some());
        }

        let pooled = node.pool().get_by_sender_address(Address::ZERO).await;
        assert_eq!(pooled.iter().map(|tx| tx.nonce()).collect::<Vec<_>>(), (0..8).collect::<Vec<_>>());

        node.mine_blocks(1).await.unwrap();
        assert_eq!(balance(&node, RECIPIENT).await, U256::from(36));
        assert!(node.pool().is_empty().await);
    }

    #[tokio::test]
    async fn erc20_balance_of_gas() {
        let node = test_utils::test_node();
        let token = Address::repeat_byte(0x33);
        deploy_code(&node, token, ERC20_CODE).await;

        let mut data = vec![0x70, 0xa0, 0x82, 0x31];
        data.extend_from_slice(B256::left_padding_from(token.as_slice()).as_slice());
        let result = node
            .call(CallParams { to: Some(token), data: Some(data.into()), gas: Some(16_784_800), ..Default::default() })
            .await
            .unwrap();

        assert!(result.errors.is_empty());
        assert_eq!(result.execution_gas_used, ERC20_BALANCE_OF_GAS);
        assert_eq!(result.raw_data, Bytes::from(vec![0; 32]));
    }

    #[tokio::test]
    async fn admission_policies_are_exclusive() {
        let node = test_utils::test_node();
        let target = Address::repeat_byte(0x42);
        deploy_code(&node, target, REVERT_NOPE_CODE).await;

        let call = |policy: Option<CreateTransaction>| CallParams {
            to: Some(target),
            skip_balance: Some(true),
            create_transaction: policy,
            throw_on_fail: Some(false),
            ..Default::default()
        };

        let on_success = node.call(call(Some(CreateTransaction::OnSuccess))).await.unwrap();
        assert!(on_success.tx_hash.is_none());
        assert_eq!(on_success.errors[0].tag, ErrorTag::Revert);

        let never = node.call(call(Some(CreateTransaction::Never))).await.unwrap();
        assert!(never.tx_hash.is_none());

        let unset = node.call(call(None)).await.unwrap();
        assert!(unset.tx_hash.is_none());
        assert!(node.pool().is_empty().await);

        let always = node.call(call(Some(CreateTransaction::Always))).await.unwrap();
        assert!(always.tx_hash.is_some());
        assert_eq!(always.errors[0].tag, ErrorTag::Revert);
        assert_eq!(node.pool().len().await, 1);
    }

    #[tokio::test]
    async fn admission_requires_balance() {
        let node = test_utils::test_node();
        let result = node
            .call(CallParams {
                skip_balance: Some(false),
                throw_on_fail: Some(false),
                ..transfer(1)
            })
            .await
            .unwrap();
        assert!(result.tx_hash.is_none());
        assert_eq!(result.errors[0].tag, ErrorTag::InsufficientBalance);
        assert!(node.pool().is_empty().await);
    }

    #[tokio::test]
    async fn concurrent_calls_are_isolated() {
        let node = test_utils::test_node();
        let target = Address::repeat_byte(0x42);
        deploy_code(&node, target, SLOAD_0_CODE).await;

        let with_slot = |value: u8| {
            let mut diff = BTreeMap::new();
            diff.insert(B256::ZERO, B256::with_last_byte(value));
            let mut overrides = BTreeMap::new();
            overrides.insert(target, AccountOverride { state_diff: Some(diff), ..Default::default() });
            CallParams { to: Some(target), state_override_set: Some(overrides), ..Default::default() }
        };

        let (a, b) = tokio::join!(node.call(with_slot(1)), node.call(with_slot(2)));
        assert_eq!(a.unwrap().raw_data, Bytes::copy_from_slice(B256::with_last_byte(1).as_slice()));
        assert_eq!(b.unwrap().raw_data, Bytes::copy_from_slice(B256::with_last_byte(2).as_slice()));

        // the live state never saw either override
        let plain = node.call(CallParams::to(target)).await.unwrap();
        assert_eq!(plain.raw_data, Bytes::copy_from_slice(B256::ZERO.as_slice()));
    }

    #[tokio::test]
    async fn failures_keep_result_shape() {
        let node = test_utils::test_node();
        let result = node
            .call(CallParams { depth: Some(2000), throw_on_fail: Some(false), ..Default::default() })
            .await
            .unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["rawData"], "0x");
        assert_eq!(json["executionGasUsed"], 0);
        assert_eq!(json["errors"][0]["_tag"], "InvalidDepthError");

        let err = node.call(CallParams { depth: Some(2000), ..Default::default() }).await.unwrap_err();
        assert_eq!(err.errors()[0].tag, ErrorTag::InvalidDepth);
    }

    #[tokio::test]
    async fn trace_and_access_list_on_request() {
        let node = test_utils::test_node();
        let target = Address::repeat_byte(0x42);
        deploy_code(&node, target, SLOAD_0_CODE).await;

        let result = node
            .call(CallParams {
                create_trace: Some(true),
                create_access_list: Some(true),
                ..CallParams::to(target)
            })
            .await
            .unwrap();
        assert!(result.trace.is_some());
        assert!(result.access_list.unwrap()[&target].contains(&B256::ZERO));
    }

    #[tokio::test]
    async fn l1_fee_on_op_stack() {
        let node = test_utils::test_node_with(|builder| builder.with_chain_kind(ChainKind::OpStack));
        deploy_code(&node, GAS_PRICE_ORACLE, RETURN_42_CODE).await;

        let result = node.call(transfer(1)).await.unwrap();
        assert_eq!(result.l1_fee, Some(U256::from(42)));
        assert_eq!(result.l1_gas_used, Some(U256::from(42)));

        // simulations never query the oracle
        let simulated = node.call(CallParams { create_transaction: None, ..transfer(1) }).await.unwrap();
        assert!(simulated.l1_fee.is_none());
    }

    #[tokio::test]
    async fn missing_oracle_omits_l1_fee() {
        let node = test_utils::test_node_with(|builder| builder.with_chain_kind(ChainKind::OpStack));
        let result = node.call(transfer(1)).await.unwrap();
        assert!(result.tx_hash.is_some());
        assert!(result.l1_fee.is_none());
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn ethereum_has_no_l1_fee() {
        let node = test_utils::test_node();
        deploy_code(&node, GAS_PRICE_ORACLE, RETURN_42_CODE).await;
        assert!(node.call(transfer(1)).await.unwrap().l1_fee.is_none());
    }

    #[tokio::test]
    async fn add_to_blockchain_mines() {
        let node = test_utils::test_node();
        let mut events = node.subscribe();
        let result = node
            .call(CallParams {
                create_transaction: None,
                add_to_blockchain: Some(CreateTransaction::Always),
                ..transfer(5)
            })
            .await
            .unwrap();
        let tx_hash = result.tx_hash.unwrap();

        assert_eq!(node.head().await.number(), 1);
        assert_eq!(balance(&node, RECIPIENT).await, U256::from(5));
        assert_eq!(events.recv().await.unwrap(), NodeEvent::NewPendingTransaction(tx_hash));
        assert!(matches!(events.recv().await.unwrap(), NodeEvent::NewBlock { number: 1, .. }));
    }

    #[tokio::test]
    async fn auto_mining() {
        let node = test_utils::test_node_with(|builder| builder.with_mining(MiningMode::Auto));
        node.call(transfer(9)).await.unwrap();
        node.call(transfer(9)).await.unwrap();
        assert_eq!(node.head().await.number(), 2);
        assert_eq!(balance(&node, RECIPIENT).await, U256::from(18));
    }

    #[tokio::test]
    async fn conflicting_admission_fields_are_rejected() {
        let node = test_utils::test_node();
        let err = node
            .call(CallParams { add_to_mempool: Some(CreateTransaction::Always), ..transfer(1) })
            .await
            .unwrap_err();
        assert_eq!(err.errors()[0].tag, ErrorTag::InvalidParams);
        assert!(node.pool().is_empty().await);
    }
}
