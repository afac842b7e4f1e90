use crate::error::{ErrorTag, HandlerError};
use alloy::{
    eips::eip2930::AccessList,
    primitives::{hex, Address, Bytes, Log},
    rpc::types::trace::geth::DefaultFrame,
};
use revm::{
    context::result::{ExecutionResult, HaltReason, Output},
    state::EvmState,
};
use std::collections::BTreeSet;

/// Why execution did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exception {
    /// Execution reverted with the given payload.
    Revert(Bytes),
    /// Execution halted.
    Halt(HaltReason),
}

impl Exception {
    /// The client-facing error for this exception. A revert's message is the
    /// hex revert payload, so ABI-aware layers can decode it.
    pub fn to_handler_error(&self) -> HandlerError {
        match self {
            Self::Revert(output) => HandlerError::new(ErrorTag::Revert, hex::encode_prefixed(output)),
            Self::Halt(reason) => HandlerError::new(ErrorTag::EvmError, format!("{reason:?}")),
        }
    }
}

/// The raw outcome of running a call or transaction in the interpreter.
#[derive(Debug, Clone, Default)]
pub struct Execution {
    /// Return or revert payload. Empty on halt.
    pub return_value: Bytes,
    /// Total gas used, intrinsic gas included.
    pub gas_used: u64,
    /// Gas used by execution alone.
    pub execution_gas_used: u64,
    /// Gas refund, if any was accrued.
    pub gas_refund: Option<u64>,
    /// Gas left of the limit.
    pub gas_remaining: u64,
    /// Emitted logs.
    pub logs: Vec<Log>,
    /// Accounts destroyed during execution.
    pub selfdestruct: BTreeSet<Address>,
    /// Accounts created during execution.
    pub created_addresses: BTreeSet<Address>,
    /// Address created by a top-level create.
    pub created_address: Option<Address>,
    /// Set when execution did not succeed.
    pub exception: Option<Exception>,
    /// Struct-log trace, when requested.
    pub trace: Option<DefaultFrame>,
    /// Touched addresses and storage keys, when requested.
    pub access_list: Option<AccessList>,
}

impl Execution {
    /// Build an execution from the interpreter result and the post-state.
    pub(crate) fn from_result(result: ExecutionResult, state: &EvmState, gas_limit: u64) -> Self {
        let selfdestruct =
            state.iter().filter(|(_, a)| a.is_selfdestructed()).map(|(addr, _)| *addr).collect();
        let created_addresses =
            state.iter().filter(|(_, a)| a.is_created()).map(|(addr, _)| *addr).collect();

        let mut this = Self { selfdestruct, created_addresses, ..Default::default() };
        match result {
            ExecutionResult::Success { gas_used, gas_refunded, logs, output, .. } => {
                this.gas_used = gas_used;
                this.gas_refund = (gas_refunded > 0).then_some(gas_refunded);
                this.logs = logs;
                match output {
                    Output::Call(bytes) => this.return_value = bytes,
                    Output::Create(bytes, address) => {
                        this.return_value = bytes;
                        this.created_address = address;
                    }
                }
            }
            ExecutionResult::Revert { gas_used, output } => {
                this.gas_used = gas_used;
                this.return_value = output.clone();
                this.exception = Some(Exception::Revert(output));
            }
            ExecutionResult::Halt { reason, gas_used } => {
                this.gas_used = gas_used;
                this.exception = Some(Exception::Halt(reason));
            }
        }
        this.gas_remaining = gas_limit.saturating_sub(this.gas_used);
        this
    }

    /// True if execution succeeded.
    pub const fn is_success(&self) -> bool {
        self.exception.is_none()
    }

    /// True if execution reverted.
    pub const fn is_revert(&self) -> bool {
        matches!(self.exception, Some(Exception::Revert(_)))
    }
}
