//! One-shot execution of runtime bytecode that is never deployed for good.

use crate::{
    account::{write_account, SetAccountParams},
    call::{clone_vm_with_block, CallParams, CreateTransaction, Prepared},
    contract::{ContractParams, ContractResult},
    error::HandlerError,
    fail::{maybe_throw_on_fail, TevmFailure},
    node::Node,
};
use alloy::{
    dyn_abi::DynSolValue,
    json_abi::JsonAbi,
    primitives::{keccak256, Address, Bytes},
};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

/// Parameters of [`Node::script`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptParams {
    /// Runtime bytecode to run.
    pub deployed_bytecode: Bytes,
    /// The script's ABI.
    pub abi: JsonAbi,
    /// The function to call.
    pub function_name: String,
    /// Function arguments.
    pub args: Vec<DynSolValue>,
    /// Everything else about the call. `to` and `data` are replaced.
    pub call: CallParams,
}

/// A fresh address for a script: derived from the code, a per-node counter
/// and the clock.
fn script_address(code: &[u8], nonce: u64) -> Address {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |elapsed| elapsed.as_nanos());
    let mut preimage = code.to_vec();
    preimage.extend_from_slice(&nonce.to_be_bytes());
    preimage.extend_from_slice(&nanos.to_be_bytes());
    Address::from_word(keccak256(preimage))
}

impl Node {
    /// Place `deployed_bytecode` at a synthetic address and call a function
    /// on it.
    ///
    /// The code lives only in the VM clone the call runs on, unless the call
    /// asks for admission, in which case it is written to the live state so
    /// the admitted transaction can execute it when mined. If the call ends
    /// up not admitted, the live code is cleared again.
    #[instrument(skip_all, fields(function = %params.function_name))]
    pub async fn script(&self, params: ScriptParams) -> Result<ContractResult, TevmFailure> {
        let ScriptParams { deployed_bytecode, abi, function_name, args, call } = params;
        let throw_on_fail = call.throws();

        let address = script_address(&deployed_bytecode, self.next_script_nonce());
        let code = SetAccountParams {
            address,
            deployed_bytecode: Some(deployed_bytecode),
            ..Default::default()
        };
        debug!(%address, "placing script code");

        let (policy, _) = call.admission();
        let live = policy.is_some_and(|policy| policy != CreateTransaction::Never);
        let prepared = if live {
            let errors = write_account(self.vm().write().await.state_mut(), &code);
            if !errors.is_empty() {
                return maybe_throw_on_fail(throw_on_fail, ContractResult::from_errors(errors));
            }
            None
        } else {
            match self.script_vm(&code).await {
                Ok(prepared) => Some(prepared),
                Err(errors) => {
                    return maybe_throw_on_fail(throw_on_fail, ContractResult::from_errors(errors))
                }
            }
        };

        let params = ContractParams { to: address, abi, function_name, args, call };
        let mut result = self.contract_with(params, prepared).await;
        if live && result.call.tx_hash.is_none() {
            // nothing was admitted, so nothing will ever run the live code
            debug!(%address, "removing script code");
            let clear = SetAccountParams { deployed_bytecode: Some(Bytes::new()), ..code };
            result.call.errors.extend(write_account(self.vm().write().await.state_mut(), &clear));
        }
        maybe_throw_on_fail(throw_on_fail, result)
    }

    async fn script_vm(&self, code: &SetAccountParams) -> Result<Prepared, Vec<HandlerError>> {
        let head = self.head().await;
        let mut vm = {
            let live = self.vm().read().await;
            clone_vm_with_block(&live, &head, &head).map_err(|err| vec![err])?
        };
        let errors = write_account(vm.state_mut(), code);
        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(Prepared { vm, block: head })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        error::ErrorTag,
        mine::MineParams,
        test_utils::{self, RETURN_42_CODE, REVERT_NOPE_CODE},
        GetAccountParams,
    };
    use alloy::primitives::U256;

    fn answer_abi() -> JsonAbi {
        serde_json::from_str(
            r#"[{"type":"function","name":"answer","inputs":[],
                 "outputs":[{"name":"","type":"uint256"}],"stateMutability":"view"}]"#,
        )
        .unwrap()
    }

    fn answer() -> ScriptParams {
        ScriptParams {
            deployed_bytecode: Bytes::from_static(RETURN_42_CODE),
            abi: answer_abi(),
            function_name: "answer".into(),
            ..Default::default()
        }
    }

    #[test]
    fn addresses_differ_per_nonce() {
        assert_ne!(script_address(RETURN_42_CODE, 0), script_address(RETURN_42_CODE, 1));
    }

    #[tokio::test]
    async fn runs_without_deploying() {
        let node = test_utils::test_node();
        let known = node.vm().read().await.state().cache().accounts.len();

        let result = node.script(answer()).await.unwrap();
        assert_eq!(result.data, Some(vec![DynSolValue::Uint(U256::from(42), 256)]));
        assert!(result.call.tx_hash.is_none());
        assert_eq!(node.vm().read().await.state().cache().accounts.len(), known);
    }

    #[tokio::test]
    async fn admitted_scripts_are_written_to_the_live_state() {
        let node = test_utils::test_node();
        let mut params = answer();
        params.call.create_transaction = Some(CreateTransaction::Always);
        params.call.skip_balance = Some(true);
        let result = node.script(params).await.unwrap();
        assert!(result.call.tx_hash.is_some());

        node.mine(MineParams::default()).await.unwrap();
        let head = node.head().await;
        assert_eq!(head.transactions().len(), 1);

        let target = match head.transactions()[0].kind() {
            alloy::primitives::TxKind::Call(to) => to,
            alloy::primitives::TxKind::Create => panic!("script admitted as a create"),
        };
        let account = node.get_account(GetAccountParams { address: target, ..Default::default() }).await.unwrap();
        assert_eq!(account.deployed_bytecode, Bytes::from_static(RETURN_42_CODE));
    }

    #[tokio::test]
    async fn rejected_scripts_leave_no_live_code() {
        let node = test_utils::test_node();
        let mut params = answer();
        params.deployed_bytecode = Bytes::from_static(REVERT_NOPE_CODE);
        params.call.create_transaction = Some(CreateTransaction::OnSuccess);
        params.call.skip_balance = Some(true);
        params.call.throw_on_fail = Some(false);

        let result = node.script(params).await.unwrap();
        assert!(result.call.tx_hash.is_none());
        assert_eq!(result.call.errors[0].tag, ErrorTag::Revert);
        assert!(node.pool().is_empty().await);

        let code_hash = keccak256(REVERT_NOPE_CODE);
        let live = node.vm().read().await;
        assert!(live.state().cache().accounts.values().all(|account| account.info.code_hash != code_hash));
    }

    #[tokio::test]
    async fn unknown_function() {
        let node = test_utils::test_node();
        let err = node.script(ScriptParams { function_name: "question".into(), ..answer() }).await.unwrap_err();
        assert_eq!(err.errors()[0].tag, ErrorTag::InvalidRequest);
    }
}
