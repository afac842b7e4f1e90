//! The [`Node`] client handle.

use crate::{
    chain::{Block, Chain},
    config::{NodeBuilder, NodeConfig},
    pool::TxPool,
    vm::Vm,
};
use alloy::primitives::B256;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::{broadcast, RwLock};
use tracing::trace;

const EVENT_CAPACITY: usize = 256;

/// Events emitted by a [`Node`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// A transaction entered the pool.
    NewPendingTransaction(B256),
    /// A block became the canonical head.
    NewBlock {
        /// Block number.
        number: u64,
        /// Block hash.
        hash: B256,
    },
}

#[derive(Debug)]
struct NodeInner {
    config: NodeConfig,
    vm: RwLock<Vm>,
    chain: RwLock<Chain>,
    pool: TxPool,
    events: broadcast::Sender<NodeEvent>,
    scripts: AtomicU64,
}

/// A local execution node: the live VM, the chain, and the transaction pool.
///
/// Cloning a node is cheap; clones share everything. Every request runs on
/// its own clone of the live VM, so concurrent requests never observe each
/// other's speculative writes. The live VM and the chain are only written by
/// account writes, admission top-ups, and mining.
#[derive(Debug, Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// A builder with the default configuration.
    pub fn builder() -> NodeBuilder {
        NodeBuilder::new()
    }

    pub(crate) fn from_parts(config: NodeConfig, vm: Vm, chain: Chain) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let pool = TxPool::new(config.pool);
        Self {
            inner: Arc::new(NodeInner {
                config,
                vm: RwLock::new(vm),
                chain: RwLock::new(chain),
                pool,
                events,
                scripts: AtomicU64::new(0),
            }),
        }
    }

    /// The node configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// The live VM.
    pub(crate) fn vm(&self) -> &RwLock<Vm> {
        &self.inner.vm
    }

    /// The chain.
    pub(crate) fn chain(&self) -> &RwLock<Chain> {
        &self.inner.chain
    }

    /// The transaction pool.
    pub fn pool(&self) -> &TxPool {
        &self.inner.pool
    }

    /// The canonical head block.
    pub async fn head(&self) -> Arc<Block> {
        self.inner.chain.read().await.canonical_head()
    }

    /// Subscribe to node events.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.inner.events.subscribe()
    }

    /// Emit an event. Nobody listening is not an error.
    pub(crate) fn emit(&self, event: NodeEvent) {
        if let Err(err) = self.inner.events.send(event) {
            trace!(event = ?err.0, "no event subscribers");
        }
    }

    /// A fresh value for deriving script addresses.
    pub(crate) fn next_script_nonce(&self) -> u64 {
        self.inner.scripts.fetch_add(1, Ordering::Relaxed)
    }
}
