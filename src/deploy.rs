//! Contract deployment.

use crate::{
    abi,
    call::{CallParams, CallResult, CreateTransaction},
    contract::decode_reverts,
    error::HandlerError,
    fail::{maybe_throw_on_fail, TevmFailure},
    node::Node,
};
use alloy::{
    dyn_abi::DynSolValue,
    json_abi::JsonAbi,
    primitives::Bytes,
};
use tracing::instrument;

/// Parameters of [`Node::deploy`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeployParams {
    /// Creation bytecode.
    pub bytecode: Bytes,
    /// The contract's ABI, for the constructor and revert decoding.
    pub abi: JsonAbi,
    /// Constructor arguments.
    pub args: Vec<DynSolValue>,
    /// Everything else about the call. `to` and `data` are replaced. Unlike a
    /// plain call, the deployment is admitted as a transaction unless an
    /// admission field says otherwise.
    pub call: CallParams,
}

impl Node {
    /// Deploy a contract.
    ///
    /// The created address is reported in [`CallResult::created_address`].
    #[instrument(skip_all, fields(code_len = params.bytecode.len()))]
    pub async fn deploy(&self, params: DeployParams) -> Result<CallResult, TevmFailure> {
        let DeployParams { bytecode, abi, args, call } = params;
        let throw_on_fail = call.throws();

        let data = match abi::encode_deploy_data(&abi, &bytecode, &args) {
            Ok(data) => data,
            Err(err) => {
                let result = CallResult::from_error(HandlerError::invalid_request(err.to_string()));
                return maybe_throw_on_fail(throw_on_fail, result);
            }
        };

        let admission_unset =
            call.create_transaction.is_none() && call.add_to_mempool.is_none() && call.add_to_blockchain.is_none();
        let create_transaction =
            if admission_unset { Some(CreateTransaction::Always) } else { call.create_transaction };

        let call = CallParams { to: None, data: Some(data), create_transaction, ..call };
        let mut result = self.dispatch(&call, None).await;
        decode_reverts(&abi, &mut result.errors);
        maybe_throw_on_fail(throw_on_fail, result)
    }
}
