//! A local, forkable EVM execution node.
//!
//! `tevm-node` runs calls, contract interactions, deployments and one-shot
//! scripts against a versioned world state, optionally forked from a remote
//! chain, and admits their effects into a local mempool as impersonated
//! transactions. Blocks are built from the pool on demand.
//!
//! Tevm-node is NOT an EVM implementation. Execution is delegated to
//! [`revm`].
//!
//! ## Quickstart
//!
//! Build a [`Node`] with a [`NodeBuilder`], then drive it with the handlers:
//!
//! - [`Node::call`] simulates a call and, when asked, admits it as a
//!   transaction.
//! - [`Node::contract`], [`Node::deploy`] and [`Node::script`] add ABI
//!   encoding and decoding on top.
//! - [`Node::get_account`] and [`Node::set_account`] read and write accounts.
//! - [`Node::mine`] turns pooled transactions into blocks.
//! - [`Node::simulate_call`] runs a call inside a historical block.
//!
//! ```
//! use tevm_node::{CallParams, CreateTransaction, MineParams, NodeBuilder};
//! use alloy::primitives::{Address, U256};
//!
//! # async fn t() -> Result<(), Box<dyn std::error::Error>> {
//! let node = NodeBuilder::new().with_chain_id(31337).build()?;
//!
//! let result = node
//!     .call(CallParams {
//!         to: Some(Address::repeat_byte(0x69)),
//!         value: Some(U256::from(420)),
//!         skip_balance: Some(true),
//!         create_transaction: Some(CreateTransaction::Always),
//!         ..Default::default()
//!     })
//!     .await?;
//! assert!(result.tx_hash.is_some());
//!
//! node.mine(MineParams::default()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Failures
//!
//! Handlers never panic and report problems as [`HandlerError`]s. By default
//! a result carrying errors is raised as a [`TevmFailure`]; with
//! `throw_on_fail: Some(false)` the errors are returned inline in the result
//! instead.
//!
//! ## Concurrency
//!
//! A [`Node`] is a cheap, cloneable handle. Every request runs on its own
//! copy-on-write clone of the live VM. Only account writes, admission
//! top-ups and mining touch the live state.
//!
//! ## Forking
//!
//! [`NodeBuilder::with_fork`] takes any [`ForkBackend`]. State not written
//! locally is read through to the backend at the fork block. With the
//! `alloy-db` feature, [`AlloyFork`] serves a backend from an alloy
//! provider.

#![doc(
    html_logo_url = "https://raw.githubusercontent.com/alloy-rs/core/main/assets/alloy.jpg",
    html_favicon_url = "https://raw.githubusercontent.com/alloy-rs/core/main/assets/favicon.ico"
)]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod error;
pub use error::{ErrorTag, HandlerError};

mod fail;
pub use fail::{maybe_throw_on_fail, HasErrors, TevmFailure};

mod config;
pub use config::{
    ChainKind, ForkConfig, MiningMode, NodeBuilder, NodeBuilderError, NodeConfig, PoolConfig,
    DEFAULT_CHAIN_ID, DEFAULT_GAS_LIMIT,
};

pub mod fill;

pub mod state;
#[cfg(feature = "alloy-db")]
pub use state::AlloyFork;
pub use state::{ForkBackend, ForkDb, StateError, StateManager};

mod chain;
pub use chain::{Block, Chain, ChainError};

mod tx;
pub use tx::ImpersonatedTx;

mod pool;
pub use pool::{AddOptions, PoolError, TxPool};

pub mod vm;
pub use vm::{Execution, Vm, VmError};

pub mod call;
pub use call::{
    AccountOverride, BlockOverrideSet, CallParams, CallResult, CreateTransaction, StateOverrideSet,
};

mod admit;
pub use admit::{fee_caps, intrinsic_gas, with_gas_buffer};

pub mod abi;

mod contract;
pub use contract::{ContractParams, ContractResult};

mod deploy;
pub use deploy::DeployParams;

mod script;
pub use script::ScriptParams;

mod account;
pub use account::{AccountResult, GetAccountParams, SetAccountParams, SetAccountResult};

mod mine;
pub use mine::{MineParams, MineResult};

mod simulate;
pub use simulate::SimulateCallParams;

mod node;
pub use node::{Node, NodeEvent};

pub use revm;

/// Utilities for testing the node or testing with it.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
