//! The call pipeline: request types, validation, normalization of requests
//! and results, and the dispatcher tying them to the interpreter and the
//! transaction admitter.

mod clone;
pub(crate) use clone::clone_vm_with_block;

mod handler;
pub use handler::Prepared;

mod l1fee;
pub use l1fee::{l1_fee_info, L1FeeInfo, GAS_PRICE_ORACLE};

mod normalize;
pub use normalize::{call_handler_opts, resolve_block_tag, NormalizedOptions};

mod options;
pub use options::ExecutionOptions;

mod params;
pub use params::{
    AccountOverride, BlockOverrideSet, CallParams, CreateTransaction, StateOverrideSet,
};

mod result;
pub use result::{call_handler_result, CallLog, CallResult};

mod validate;
pub(crate) use validate::validate_account_override;
pub use validate::{validate_call_params, MAX_CALL_DEPTH};
