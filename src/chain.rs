//! Chain adapter interface
//!
//! The oracle talks to the execution layer through the `ChainClient` trait:
//! pinned view calls against the Rocket Pool registry contracts, ranged
//! historical log queries, and the two live subscriptions (filtered logs and
//! new heads). The production implementation lives in `rpc`; tests drive the
//! oracle through an in-memory implementation.

use crate::types::{LogEvent, NewHead, ValidatorPubkey};
use alloy_primitives::{Address, B256};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Buffered capacity of subscription channels.
///
/// Events arriving while the snapshot-to-stream back-fill runs queue here.
pub const SUBSCRIPTION_BUFFER: usize = 32;

/// Log filter: a set of emitting contracts and a topic0 OR-set.
#[derive(Debug, Clone)]
pub struct LogFilter {
    /// Contract addresses to match.
    pub addresses: Vec<Address>,
    /// Event signature hashes to match (any of).
    pub topics: Vec<B256>,
}

/// A minipool as enumerated from the minipool manager.
#[derive(Debug, Clone, Copy)]
pub struct MinipoolDetails {
    /// The minipool contract address.
    pub address: Address,
    /// The validator pubkey the minipool stakes for.
    pub pubkey: ValidatorPubkey,
}

/// Callback that tears down an active subscription feed.
///
/// Invoking it closes the item and error channels of the subscription it was
/// returned with; the consumer drains whatever was already buffered.
pub struct Unsubscriber(Box<dyn FnOnce() + Send>);

impl Unsubscriber {
    /// Wrap a teardown closure.
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    /// Tear down the feed.
    pub fn unsubscribe(self) {
        (self.0)()
    }
}

/// A live subscription: an item channel, an error channel, and the teardown
/// handle.
///
/// The error channel delivers at most one error, when the underlying feed
/// dies unexpectedly. A feed closed through its `Unsubscriber` closes both
/// channels without reporting an error.
pub struct Subscription<T> {
    /// Delivered items.
    pub items: mpsc::Receiver<T>,
    /// Feed failure notifications.
    pub errors: mpsc::Receiver<anyhow::Error>,
    /// Teardown handle; taken by the oracle so shutdown can close the feed
    /// while the receivers live inside the ingest loop.
    pub unsub: Option<Unsubscriber>,
}

/// Execution-layer access required by the oracle.
///
/// View calls take an explicit block so the snapshot loader can pin every
/// read to a single height while the chain advances underneath it; `None`
/// means the latest block.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current head block number.
    async fn latest_block(&self) -> Result<u64>;

    /// Resolve a contract address by name through the rocket storage
    /// registry, at the given block.
    async fn contract_address(&self, name: &str, block: u64) -> Result<Address>;

    /// All registered node addresses at the given block.
    async fn node_addresses(&self, block: u64) -> Result<Vec<Address>>;

    /// Whether a node is registered with the smoothing pool at the given
    /// block.
    async fn smoothing_pool_state(&self, node: Address, block: u64) -> Result<bool>;

    /// The node's fee distributor address.
    async fn fee_distributor(&self, node: Address, block: Option<u64>) -> Result<Address>;

    /// The node's minipools (addresses and validator pubkeys) at the given
    /// block.
    async fn node_minipools(&self, node: Address, block: u64) -> Result<Vec<MinipoolDetails>>;

    /// The validator pubkey staked by a minipool contract.
    async fn minipool_pubkey(
        &self,
        minipool: Address,
        block: Option<u64>,
    ) -> Result<ValidatorPubkey>;

    /// Historical logs matching the filter in the inclusive range
    /// `[from, to]`.
    async fn filter_logs(&self, filter: &LogFilter, from: u64, to: u64) -> Result<Vec<LogEvent>>;

    /// Subscribe to live logs matching the filter.
    async fn subscribe_logs(&self, filter: &LogFilter) -> Result<Subscription<LogEvent>>;

    /// Subscribe to new chain heads.
    async fn subscribe_heads(&self) -> Result<Subscription<NewHead>>;
}
