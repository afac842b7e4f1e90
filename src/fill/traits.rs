use revm::context::{BlockEnv, CfgEnv, TxEnv};

/// Sources of a transaction environment: call requests and pooled
/// transactions.
pub trait Tx: Send + Sync {
    /// Write this transaction into `tx_env`. Implementations set every field,
    /// so no state leaks from a previous transaction.
    fn fill_tx_env(&self, tx_env: &mut TxEnv);

    /// A fresh [`TxEnv`] for this transaction.
    fn to_tx_env(&self) -> TxEnv {
        let mut tx_env = TxEnv::default();
        self.fill_tx_env(&mut tx_env);
        tx_env
    }
}

/// Sources of a block environment.
pub trait Block: Send + Sync {
    /// Write the block's number, time, fees, gas limit and beneficiary into
    /// `block_env`.
    fn fill_block_env(&self, block_env: &mut BlockEnv);
}

impl Block for BlockEnv {
    fn fill_block_env(&self, block_env: &mut BlockEnv) {
        block_env.clone_from(self);
    }
}

/// Adjustments to the interpreter configuration for a kind of execution.
///
/// The `disable_*` switches of [`CfgEnv`] only exist with revm's matching
/// `optional_*` features; implementations gate their writes the same way.
pub trait Cfg: Send + Sync {
    /// Apply the adjustments to `cfg_env`.
    fn fill_cfg_env(&self, cfg_env: &mut CfgEnv);
}
