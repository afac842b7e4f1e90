use crate::fill::traits::Cfg;
use revm::context::CfgEnv;

/// Prime the EVM for a simulated call.
///
/// Nonce, EIP-3607 and block gas limit checks are always disabled. The
/// balance check is disabled when the caller asked to skip it, and the base
/// fee check when the caller supplied no gas price.
///
/// ## Warning
///
/// This filler relies on the following optional features:
/// - `optional_balance_check`
/// - `optional_block_gas_limit`
/// - `optional_eip3607`
/// - `optional_no_base_fee`
///
/// Checks whose feature is disabled stay enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallFiller {
    /// Disable the balance check.
    pub skip_balance: bool,
    /// Keep the base fee check.
    pub enforce_base_fee: bool,
}

impl Cfg for CallFiller {
    #[allow(unused_variables)]
    fn fill_cfg_env(&self, cfg_env: &mut CfgEnv) {
        cfg_env.disable_nonce_check = true;
        #[cfg(feature = "optional_eip3607")]
        {
            cfg_env.disable_eip3607 = true;
        }
        #[cfg(feature = "optional_block_gas_limit")]
        {
            cfg_env.disable_block_gas_limit = true;
        }
        #[cfg(feature = "optional_balance_check")]
        {
            cfg_env.disable_balance_check = self.skip_balance;
        }
        #[cfg(feature = "optional_no_base_fee")]
        {
            cfg_env.disable_base_fee = !self.enforce_base_fee;
        }
    }
}

/// Prime the EVM for executing impersonated transactions in a block.
///
/// Nonces and the base fee are enforced. Senders may be contracts, and their
/// balance was settled at admission, so EIP-3607 and balance checks are
/// disabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImpersonationFiller;

impl Cfg for ImpersonationFiller {
    #[allow(unused_variables)]
    fn fill_cfg_env(&self, cfg_env: &mut CfgEnv) {
        cfg_env.disable_nonce_check = false;
        #[cfg(feature = "optional_eip3607")]
        {
            cfg_env.disable_eip3607 = true;
        }
        #[cfg(feature = "optional_balance_check")]
        {
            cfg_env.disable_balance_check = true;
        }
        #[cfg(feature = "optional_no_base_fee")]
        {
            cfg_env.disable_base_fee = false;
        }
    }
}
