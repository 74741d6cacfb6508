//! Fee-recipient oracle
//!
//! Maintains an in-memory projection of the Rocket Pool node and minipool
//! registries so fee-recipient queries are answered in constant time without
//! per-query chain round-trips. State is built cold from a snapshot pinned to
//! a single block, then kept current by the event ingestor (see `ingest`).
//!
//! Writer discipline: the snapshot loader populates the indices before any
//! other task starts, after which only the ingest task (and the back-fill it
//! runs synchronously) mutates them. Readers are unrestricted.

use crate::chain::{ChainClient, LogFilter, Unsubscriber};
use crate::index::{MinipoolIndex, NodeIndex};
use crate::types::{
    minipool_created_topic, node_registered_topic, smoothing_pool_state_changed_topic, NodeInfo,
    ValidatorPubkey,
};
use alloy_primitives::Address;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// The oracle: two indices, a watermark, and the plumbing that keeps them
/// current.
pub struct Oracle {
    pub(crate) chain: Arc<dyn ChainClient>,
    pub(crate) minipools: MinipoolIndex,
    pub(crate) nodes: NodeIndex,

    /// Contracts whose events the oracle follows.
    pub(crate) node_manager: Address,
    pub(crate) minipool_manager: Address,
    /// Fee recipient for nodes opted into the smoothing pool.
    pub(crate) smoothing_pool: Address,
    /// Filter covering both contracts and the three event topics.
    pub(crate) filter: LogFilter,

    /// Highest block whose events and headers have been applied.
    highest_block: AtomicU64,
    /// Set during graceful teardown so subscription errors stop triggering
    /// reconnection.
    shutdown: AtomicBool,
    /// Teardown handles for the active subscriptions.
    unsubscribers: Mutex<Vec<Unsubscriber>>,
    ingest_task: Mutex<Option<JoinHandle<()>>>,
}

impl Oracle {
    /// Build and warm up the oracle.
    ///
    /// Pins the current head block, loads the full node and minipool state at
    /// that height, subscribes to events, back-fills the gap between the pin
    /// and the stream, and starts the ingest task. Any failure is fatal: the
    /// caller never observes a partially loaded oracle.
    pub async fn init(chain: Arc<dyn ChainClient>) -> Result<Arc<Self>> {
        // Pin every view call to one height; the chain advances while the
        // cache loads and back-fill covers the difference afterwards.
        let pin = chain
            .latest_block()
            .await
            .context("Failed to fetch the snapshot block")?;

        let node_manager = chain.contract_address("rocketNodeManager", pin).await?;
        let minipool_manager = chain.contract_address("rocketMinipoolManager", pin).await?;
        let smoothing_pool = chain.contract_address("rocketSmoothingPool", pin).await?;

        let minipools = MinipoolIndex::new();
        let nodes = NodeIndex::new();

        let node_addrs = chain
            .node_addresses(pin)
            .await
            .context("Failed to enumerate nodes")?;
        debug!("Found {} nodes to preload at block {}", node_addrs.len(), pin);

        let mut minipool_count = 0;
        for addr in node_addrs.iter().copied() {
            let in_smoothing_pool = chain
                .smoothing_pool_state(addr, pin)
                .await
                .with_context(|| format!("Failed to read smoothing pool state for {}", addr))?;
            let fee_distributor = chain
                .fee_distributor(addr, Some(pin))
                .await
                .with_context(|| format!("Failed to compute fee distributor for {}", addr))?;
            nodes.insert(
                addr,
                NodeInfo {
                    in_smoothing_pool,
                    fee_distributor,
                },
            );

            let pools = chain
                .node_minipools(addr, pin)
                .await
                .with_context(|| format!("Failed to enumerate minipools of {}", addr))?;
            minipool_count += pools.len();
            for minipool in pools {
                minipools.insert(minipool.pubkey, addr);
            }
        }
        info!(
            "Pre-loaded {} nodes and {} minipools at block {}",
            node_addrs.len(),
            minipool_count,
            pin
        );

        let filter = LogFilter {
            addresses: vec![minipool_manager, node_manager],
            topics: vec![
                node_registered_topic(),
                smoothing_pool_state_changed_topic(),
                minipool_created_topic(),
            ],
        };

        let oracle = Arc::new(Self {
            chain,
            minipools,
            nodes,
            node_manager,
            minipool_manager,
            smoothing_pool,
            filter,
            highest_block: AtomicU64::new(pin),
            shutdown: AtomicBool::new(false),
            unsubscribers: Mutex::new(Vec::new()),
            ingest_task: Mutex::new(None),
        });

        Oracle::connect_events(&oracle)
            .await
            .context("Failed to connect to execution layer events")?;

        Ok(oracle)
    }

    /// Gracefully shut the oracle down.
    ///
    /// Closes both subscription feeds and waits for the ingest task to drain
    /// whatever events were already buffered. In-flight queries complete
    /// against the frozen indices.
    pub async fn deinit(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.cancel_subscriptions().await;

        let task = self.ingest_task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Event ingest task ended abnormally: {}", e);
            }
        }
    }

    /// Invoke the callback with the address of every node the oracle has
    /// observed. The callback returning `false` stops the iteration early.
    /// No ordering guarantee.
    pub fn for_each_node<F>(&self, f: F)
    where
        F: FnMut(Address) -> bool,
    {
        self.nodes.for_each(f);
    }

    /// The expected fee recipient for a validator.
    ///
    /// Returns `(None, false)` for a validator the oracle has never seen.
    /// If `query_node` is given and the validator is a minipool owned by a
    /// different node, returns `(None, true)`: the validator is known but the
    /// caller's ownership claim is wrong.
    pub fn validator_fee_recipient(
        &self,
        pubkey: &ValidatorPubkey,
        query_node: Option<Address>,
    ) -> (Option<Address>, bool) {
        let Some(node_addr) = self.minipools.node_for(pubkey) else {
            // Hopefully not a minipool at all.
            return (None, false);
        };

        if let Some(claimed) = query_node {
            if claimed != node_addr {
                return (None, true);
            }
        }

        let Some(info) = self.nodes.get(&node_addr) else {
            // Should be impossible under single-writer discipline.
            error!(
                "Validator {} is in the minipool index but its node {} is missing",
                pubkey, node_addr
            );
            return (None, false);
        };

        if info.in_smoothing_pool {
            (Some(self.smoothing_pool), false)
        } else {
            (Some(info.fee_distributor), false)
        }
    }

    /// The highest block whose events and headers have been applied.
    ///
    /// An informational watermark, not a read fence.
    pub fn highest_block(&self) -> u64 {
        self.highest_block.load(Ordering::Acquire)
    }

    /// Advance the watermark, never letting it decrease. Returns the previous
    /// value.
    pub(crate) fn advance_highest_block(&self, block: u64) -> u64 {
        self.highest_block.fetch_max(block, Ordering::AcqRel)
    }

    /// Whether graceful teardown has begun.
    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Replace the stored subscription teardown handles.
    pub(crate) async fn store_unsubscribers(&self, subs: Vec<Unsubscriber>) {
        let mut guard = self.unsubscribers.lock().await;
        for stale in guard.drain(..) {
            stale.unsubscribe();
        }
        *guard = subs;
    }

    /// Tear down the active subscription feeds, closing their channels.
    pub(crate) async fn cancel_subscriptions(&self) {
        let subs: Vec<_> = self.unsubscribers.lock().await.drain(..).collect();
        for sub in subs {
            sub.unsubscribe();
        }
    }

    pub(crate) async fn set_ingest_task(&self, task: JoinHandle<()>) {
        *self.ingest_task.lock().await = Some(task);
    }
}
