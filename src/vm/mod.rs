//! The interpreter side of the node: a revm configuration paired with a
//! [`StateManager`].

mod execution;
pub use execution::{Exception, Execution};

mod inspector;
pub use inspector::{CallInspector, Capture, FrameGas};

use crate::{
    chain::Block,
    error::{ErrorTag, HandlerError},
    fill::{Block as _, CallFiller, Cfg, ImpersonationFiller, Tx},
    state::{StateError, StateManager},
    tx::ImpersonatedTx,
};
use alloy::primitives::Address;
use revm::{
    context::{
        result::{EVMError, InvalidTransaction, ResultAndState},
        BlockEnv, CfgEnv, TxEnv,
    },
    interpreter::gas::calculate_initial_tx_gas_for_tx,
    precompile::{PrecompileSpecId, Precompiles},
    primitives::hardfork::SpecId,
    Context, DatabaseCommit, InspectEvm, Journal, MainBuilder,
};
use tracing::debug;

/// [`revm::Context`] with default env types and adjustable DB
pub type Ctx<Db, J = Journal<Db>, C = ()> = Context<BlockEnv, TxEnv, CfgEnv, Db, J, C>;

/// Errors produced by the interpreter.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum VmError {
    /// The interpreter rejected or failed to run the transaction.
    #[error(transparent)]
    Evm(#[from] EVMError<StateError>),
}

impl VmError {
    /// The client-facing error for this failure.
    pub fn to_handler_error(&self) -> HandlerError {
        let Self::Evm(err) = self;
        let tag = match err {
            EVMError::Transaction(invalid) => match invalid {
                InvalidTransaction::GasPriceLessThanBasefee
                | InvalidTransaction::PriorityFeeGreaterThanMaxFee => ErrorTag::InvalidGasPrice,
                InvalidTransaction::LackOfFundForMaxFee { .. } => ErrorTag::InsufficientBalance,
                InvalidTransaction::NonceTooHigh { .. } | InvalidTransaction::NonceTooLow { .. } => {
                    ErrorTag::InvalidNonce
                }
                _ => ErrorTag::InvalidTransaction,
            },
            _ => ErrorTag::Unexpected,
        };
        HandlerError::new(tag, err.to_string())
    }
}

/// An interpreter configuration and the state it runs against.
///
/// Cloning a `Vm` is cheap: the state is a copy-on-write snapshot, so a clone
/// shares no mutable state with its source.
#[derive(Debug, Clone)]
pub struct Vm {
    state: StateManager,
    cfg: CfgEnv,
}

impl Vm {
    /// A VM for the given chain id and hardfork.
    pub fn new(state: StateManager, chain_id: u64, spec: SpecId) -> Self {
        let mut cfg = CfgEnv::default();
        cfg.chain_id = chain_id;
        cfg.spec = spec;
        Self { state, cfg }
    }

    /// The world state.
    pub const fn state(&self) -> &StateManager {
        &self.state
    }

    /// Mutable world state.
    pub const fn state_mut(&mut self) -> &mut StateManager {
        &mut self.state
    }

    /// The base interpreter configuration.
    pub const fn cfg(&self) -> &CfgEnv {
        &self.cfg
    }

    /// The active hardfork.
    pub const fn spec_id(&self) -> SpecId {
        self.cfg.spec
    }

    /// An independent copy of this VM.
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }

    /// A VM with this configuration over a different state.
    pub fn with_state(&self, state: StateManager) -> Self {
        Self { state, cfg: self.cfg.clone() }
    }

    /// True if `address` is a precompile under the active hardfork.
    pub fn is_precompile(&self, address: Address) -> bool {
        Precompiles::new(PrecompileSpecId::from_spec_id(self.cfg.spec)).contains(&address)
    }

    /// Simulate a call. The state is left untouched.
    pub fn run_call(
        &mut self,
        opts: &crate::call::ExecutionOptions,
        capture: Capture,
    ) -> Result<Execution, VmError> {
        if opts.depth.is_some() || opts.selfdestruct.is_some() || opts.salt.is_some() || opts.gas_refund.is_some() {
            debug!("depth, selfdestruct, salt and gas refund are not applied to top-level calls");
        }
        let filler = CallFiller {
            skip_balance: opts.skip_balance,
            enforce_base_fee: opts.gas_price.is_some(),
        };
        let mut tx_env = opts.to_tx_env();
        tx_env.chain_id = Some(self.cfg.chain_id);
        self.transact(opts, tx_env, &filler, capture, false)
    }

    /// Execute an impersonated transaction and commit its effects.
    pub fn run_tx(&mut self, block: &Block, tx: &ImpersonatedTx) -> Result<Execution, VmError> {
        self.transact(block, tx.to_tx_env(), &ImpersonationFiller, Capture::default(), true)
    }

    fn transact<B: crate::fill::Block>(
        &mut self,
        block: &B,
        tx_env: TxEnv,
        filler: &impl Cfg,
        capture: Capture,
        commit: bool,
    ) -> Result<Execution, VmError> {
        let gas_limit = tx_env.gas_limit;
        let initial_gas = calculate_initial_tx_gas_for_tx(&tx_env, self.cfg.spec).initial_gas;

        let mut ctx: Ctx<&mut StateManager> = Context::new(&mut self.state, self.cfg.spec);
        ctx.cfg = self.cfg.clone();
        filler.fill_cfg_env(&mut ctx.cfg);
        block.fill_block_env(&mut ctx.block);

        let mut evm = ctx.build_mainnet_with_inspector(CallInspector::new(capture));
        let ResultAndState { result, state } = evm.inspect_tx(tx_env)?;
        let inspector = std::mem::take(&mut evm.inspector);
        drop(evm);

        let mut execution = Execution::from_result(result, &state, gas_limit);
        execution.execution_gas_used = match inspector.frame_gas() {
            Some(frame) => frame.spent,
            None => execution.gas_used.saturating_sub(initial_gas),
        };
        let (trace, access_list) =
            inspector.into_outputs(execution.gas_used, execution.return_value.clone());
        execution.trace = trace;
        execution.access_list = access_list;

        if commit {
            DatabaseCommit::commit(&mut self.state, state);
        }
        Ok(execution)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::{self, RETURN_42_CODE, REVERT_NOPE_CODE, SLOAD_0_CODE};
    use alloy::primitives::{Bytes, B256, U256};

    #[test]
    fn cfg_carries_chain_id_and_hardfork() {
        let vm = Vm::new(StateManager::default(), 10, SpecId::CANCUN);
        assert_eq!(vm.cfg().chain_id, 10);
        assert_eq!(vm.cfg().spec, SpecId::CANCUN);
    }

    #[test]
    fn unapplied_fields_do_not_change_the_call() {
        let mut vm = test_utils::test_vm();
        let target = Address::repeat_byte(0x42);
        vm.state_mut().put_contract_code(target, RETURN_42_CODE.into()).unwrap();

        let plain = test_utils::call_options(Some(target), Bytes::new());
        let opts = crate::call::ExecutionOptions {
            depth: Some(3),
            salt: Some(Bytes::from_static(&[1; 32])),
            selfdestruct: Some([Address::repeat_byte(0x99)].into()),
            gas_refund: Some(100),
            ..plain.clone()
        };
        let expected = vm.run_call(&plain, Capture::default()).unwrap();
        let execution = vm.run_call(&opts, Capture::default()).unwrap();
        assert_eq!(execution.execution_gas_used, expected.execution_gas_used);
        assert_eq!(execution.return_value, expected.return_value);
    }

    #[test]
    fn precompiles_are_known() {
        let vm = test_utils::test_vm();
        assert!(vm.is_precompile(Address::with_last_byte(1)));
        assert!(!vm.is_precompile(Address::repeat_byte(0x42)));
    }

    #[test]
    fn call_measures_execution_gas() {
        let mut vm = test_utils::test_vm();
        let target = Address::repeat_byte(0x42);
        vm.state_mut().put_contract_code(target, RETURN_42_CODE.into()).unwrap();

        let opts = test_utils::call_options(Some(target), Bytes::new());
        let execution = vm.run_call(&opts, Capture::default()).unwrap();

        assert!(execution.is_success());
        assert_eq!(execution.execution_gas_used, 18);
        assert_eq!(execution.return_value, Bytes::copy_from_slice(B256::with_last_byte(42).as_slice()));
    }

    #[test]
    fn transfer_uses_no_execution_gas() {
        let mut vm = test_utils::test_vm();
        let mut opts = test_utils::call_options(Some(Address::repeat_byte(0x69)), Bytes::new());
        opts.value = Some(U256::from(420));
        opts.skip_balance = true;

        let execution = vm.run_call(&opts, Capture::default()).unwrap();
        assert!(execution.is_success());
        assert_eq!(execution.execution_gas_used, 0);
        assert_eq!(execution.gas_used, 21_000);
        assert!(execution.return_value.is_empty());
        // simulation leaves the state alone
        assert!(vm.state().get_account(Address::repeat_byte(0x69)).unwrap().is_none());
    }

    #[test]
    fn revert_is_an_exception() {
        let mut vm = test_utils::test_vm();
        let target = Address::repeat_byte(0x42);
        vm.state_mut().put_contract_code(target, REVERT_NOPE_CODE.into()).unwrap();

        let opts = test_utils::call_options(Some(target), Bytes::new());
        let execution = vm.run_call(&opts, Capture::default()).unwrap();
        assert!(execution.is_revert());
        assert_eq!(execution.exception.unwrap().to_handler_error().tag, ErrorTag::Revert);
    }

    #[test]
    fn captures_trace_and_access_list() {
        let mut vm = test_utils::test_vm();
        let target = Address::repeat_byte(0x42);
        vm.state_mut().put_contract_code(target, SLOAD_0_CODE.into()).unwrap();

        let opts = test_utils::call_options(Some(target), Bytes::new());
        let execution =
            vm.run_call(&opts, Capture { trace: true, access_list: true }).unwrap();

        let trace = execution.trace.unwrap();
        assert!(!trace.struct_logs.is_empty());
        assert!(!trace.failed);

        let access_list = execution.access_list.unwrap();
        let item = access_list.0.iter().find(|item| item.address == target).unwrap();
        assert_eq!(item.storage_keys, vec![B256::ZERO]);
    }

    #[test]
    fn gas_price_below_base_fee_is_rejected() {
        let mut vm = test_utils::test_vm();
        let mut opts = test_utils::call_options(Some(Address::repeat_byte(0x69)), Bytes::new());
        opts.gas_price = Some(1);
        opts.skip_balance = true;

        let err = vm.run_call(&opts, Capture::default()).unwrap_err();
        assert_eq!(err.to_handler_error().tag, ErrorTag::InvalidGasPrice);
    }
}
