//! Event ingestion, back-fill, and reconnection
//!
//! After the snapshot loads, the oracle follows the chain through two live
//! feeds: filtered contract events and new heads. A single long-lived task
//! multiplexes both feeds and their error channels; back-fill replays any
//! block range the feeds did not deliver (behind the snapshot, or across a
//! reconnection gap) through the same event handler, so replayed and live
//! events are indistinguishable to the indices.

use crate::chain::Subscription;
use crate::oracle::Oracle;
use crate::types::{
    address_from_topic, bool_from_data, minipool_created_topic, node_registered_topic,
    smoothing_pool_state_changed_topic, LogEvent, NewHead, NodeInfo,
};
use alloy_primitives::Address;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Reconnection attempts before giving up.
const RECONNECT_RETRIES: u32 = 10;
/// Back-off unit: the i-th failed attempt waits `i` times this.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Unrecoverable cache-consistency failure. The supervisor is expected to
/// restart the service, which rebuilds from chain.
fn fatal(message: &str) -> ! {
    error!("{}", message);
    std::process::exit(1);
}

impl Oracle {
    /// Subscribe to both feeds, back-fill the blocks the snapshot missed, and
    /// start the ingest task.
    pub(crate) async fn connect_events(oracle: &Arc<Oracle>) -> Result<()> {
        let mut logs = oracle
            .chain
            .subscribe_logs(&oracle.filter)
            .await
            .context("Failed to subscribe to contract events")?;
        let mut heads = oracle
            .chain
            .subscribe_heads()
            .await
            .context("Failed to subscribe to new heads")?;

        let mut subs = Vec::new();
        if let Some(unsub) = logs.unsub.take() {
            subs.push(unsub);
        }
        if let Some(unsub) = heads.unsub.take() {
            subs.push(unsub);
        }
        oracle.store_unsubscribers(subs).await;
        debug!("Subscribed to execution layer events");

        // The log subscription does not replay history, no matter what its
        // from-block is set to; events emitted while the snapshot loaded can
        // only be recovered here.
        oracle
            .backfill_to_head()
            .await
            .context("Failed to back-fill events behind the snapshot")?;

        let ingestor = Arc::clone(oracle);
        let task = tokio::spawn(async move {
            ingestor.ingest(logs, heads).await;
        });
        oracle.set_ingest_task(task).await;

        Ok(())
    }

    /// The ingest loop. Runs until both item feeds are closed, which only
    /// happens during graceful teardown; buffered events are drained first.
    async fn ingest(
        self: Arc<Self>,
        mut logs: Subscription<LogEvent>,
        mut heads: Subscription<NewHead>,
    ) {
        let mut logs_open = true;
        let mut heads_open = true;
        let mut log_errors_open = true;
        let mut head_errors_open = true;

        while logs_open || heads_open {
            tokio::select! {
                event = logs.items.recv(), if logs_open => match event {
                    Some(event) => self.handle_event(event).await,
                    None => logs_open = false,
                },
                head = heads.items.recv(), if heads_open => match head {
                    Some(head) => {
                        // fetch_max: a late header from a lower block must
                        // not rewind the watermark past queued events.
                        let previous = self.advance_highest_block(head.number);
                        if head.number > previous {
                            debug!(
                                "New block received: height={} previous={}",
                                head.number, previous
                            );
                        }
                    }
                    None => heads_open = false,
                },
                failure = logs.errors.recv(), if log_errors_open => match failure {
                    Some(failure) => match self.handle_subscription_error(failure).await {
                        Some((new_logs, new_heads)) => {
                            logs = new_logs;
                            heads = new_heads;
                            logs_open = true;
                            heads_open = true;
                            log_errors_open = true;
                            head_errors_open = true;
                        }
                        None => log_errors_open = false,
                    },
                    None => log_errors_open = false,
                },
                failure = heads.errors.recv(), if head_errors_open => match failure {
                    Some(failure) => match self.handle_subscription_error(failure).await {
                        Some((new_logs, new_heads)) => {
                            logs = new_logs;
                            heads = new_heads;
                            logs_open = true;
                            heads_open = true;
                            log_errors_open = true;
                            head_errors_open = true;
                        }
                        None => head_errors_open = false,
                    },
                    None => head_errors_open = false,
                },
            }
        }

        debug!(
            "Finished processing events at block {}",
            self.highest_block()
        );
    }

    /// Apply one event to the indices and advance the watermark.
    ///
    /// Decode problems are per-event noise: logged and swallowed, never
    /// fatal. The watermark advances even for events that were dropped.
    pub(crate) async fn handle_event(&self, event: LogEvent) {
        if event.address == self.node_manager {
            self.handle_node_event(&event).await;
        } else if event.address == self.minipool_manager {
            self.handle_minipool_event(&event).await;
        } else {
            // Shouldn't happen barring a filter bug upstream.
            warn!("Received event for unknown contract {}", event.address);
        }

        self.advance_highest_block(event.block_number);
    }

    async fn handle_node_event(&self, event: &LogEvent) {
        let Some(topic0) = event.topics.first().copied() else {
            warn!("Node manager event with no topics");
            return;
        };

        if topic0 == node_registered_topic() {
            let Some(addr) = event.topics.get(1).map(address_from_topic) else {
                warn!("NodeRegistered event missing its address topic");
                return;
            };

            // A just-registered node can't have minipools yet, but resolving
            // the distributor now keeps the read path free of chain calls.
            let fee_distributor = match self.chain.fee_distributor(addr, None).await {
                Ok(distributor) => distributor,
                Err(e) => {
                    warn!(
                        "Couldn't compute fee distributor for new node {}: {}",
                        addr, e
                    );
                    Address::ZERO
                }
            };
            self.nodes.insert(
                addr,
                NodeInfo {
                    in_smoothing_pool: false,
                    fee_distributor,
                },
            );
            debug!("New node registered: {}", addr);
            return;
        }

        if topic0 == smoothing_pool_state_changed_topic() {
            let Some(addr) = event.topics.get(1).map(address_from_topic) else {
                warn!("Smoothing pool state change missing its address topic");
                return;
            };
            let in_pool = match bool_from_data(&event.data) {
                Ok(value) => value,
                Err(e) => {
                    warn!(
                        "Undecodable smoothing pool state change for {}: {}",
                        addr, e
                    );
                    return;
                }
            };

            let mut info = match self.nodes.get(&addr) {
                Some(info) => info,
                None => {
                    // Odd that we don't have this node already, but add it
                    // and carry on.
                    warn!("Unknown node {} updated its smoothing pool status", addr);
                    NodeInfo::default()
                }
            };
            if info.fee_distributor == Address::ZERO {
                match self.chain.fee_distributor(addr, None).await {
                    Ok(distributor) => info.fee_distributor = distributor,
                    Err(e) => warn!(
                        "Couldn't compute fee distributor address for node {}: {}",
                        addr, e
                    ),
                }
            }
            info.in_smoothing_pool = in_pool;
            self.nodes.insert(addr, info);
            debug!(
                "Node {} smoothing pool status changed: in_pool={}",
                addr, in_pool
            );
            return;
        }

        warn!("Event with unknown topic received: {}", topic0);
    }

    async fn handle_minipool_event(&self, event: &LogEvent) {
        let Some(topic0) = event.topics.first().copied() else {
            warn!("Minipool manager event with no topics");
            return;
        };
        if topic0 != minipool_created_topic() {
            warn!("Event with unknown topic received: {}", topic0);
            return;
        }

        let (Some(minipool), Some(node)) = (
            event.topics.get(1).map(address_from_topic),
            event.topics.get(2).map(address_from_topic),
        ) else {
            warn!("MinipoolCreated event missing its address topics");
            return;
        };

        let pubkey = match self.chain.minipool_pubkey(minipool, None).await {
            Ok(pubkey) => pubkey,
            Err(e) => {
                warn!("Error fetching pubkey for new minipool {}: {}", minipool, e);
                return;
            }
        };

        self.minipools.insert(pubkey, node);
        debug!("Added new minipool: pubkey={} node={}", pubkey, node);
    }

    /// Replay all matching logs in the inclusive range `[start, stop]`
    /// through the live handler, then advance the watermark to `stop`.
    ///
    /// An empty range (`start > stop`) is a successful no-op.
    pub(crate) async fn backfill_range(&self, start: u64, stop: u64) -> Result<()> {
        if start > stop {
            debug!("No blocks to back-fill events from");
            return Ok(());
        }

        let missed = self
            .chain
            .filter_logs(&self.filter, start, stop)
            .await
            .with_context(|| format!("Historical log query for blocks {}-{} failed", start, stop))?;

        let count = missed.len();
        for event in missed {
            self.handle_event(event).await;
        }

        // The range may have held no events for the watermark to track.
        self.advance_highest_block(stop);

        debug!(
            "Back-filled {} events from {} blocks ({}-{})",
            count,
            stop - start + 1,
            start,
            stop
        );
        Ok(())
    }

    /// Back-fill from just past the watermark to the current head.
    pub(crate) async fn backfill_to_head(&self) -> Result<()> {
        let start = self.highest_block() + 1;
        let stop = self
            .chain
            .latest_block()
            .await
            .context("Failed to fetch the head block for back-fill")?;
        self.backfill_range(start, stop).await
    }

    /// Recover from a dead subscription: re-establish both feeds with linear
    /// back-off, then back-fill the gap. Returns the fresh subscriptions, or
    /// `None` when teardown is in progress and errors should be ignored.
    ///
    /// Exhausting the retries, or failing the post-reconnect back-fill,
    /// terminates the process.
    async fn handle_subscription_error(
        &self,
        failure: anyhow::Error,
    ) -> Option<(Subscription<LogEvent>, Subscription<NewHead>)> {
        if self.is_shutting_down() {
            return None;
        }

        warn!(
            "Error received from execution client subscription: {}",
            failure
        );
        // Tear down whichever feed is still alive before redialing.
        self.cancel_subscriptions().await;

        for attempt in 1..=RECONNECT_RETRIES {
            if attempt > 1 {
                // The i-th failed attempt waits 5i seconds.
                tokio::time::sleep(RECONNECT_DELAY * (attempt - 1)).await;
            }
            warn!("Attempting to reconnect (attempt {})", attempt);

            let mut logs = match self.chain.subscribe_logs(&self.filter).await {
                Ok(sub) => sub,
                Err(e) => {
                    warn!("Error trying to reconnect to execution client: {}", e);
                    continue;
                }
            };
            let mut heads = match self.chain.subscribe_heads().await {
                Ok(sub) => sub,
                Err(e) => {
                    // Both feeds or neither: count the attempt as failed.
                    warn!(
                        "Couldn't resubscribe to block headers after reconnecting: {}",
                        e
                    );
                    if let Some(unsub) = logs.unsub.take() {
                        unsub.unsubscribe();
                    }
                    continue;
                }
            };
            warn!("Reconnected (attempt {})", attempt);

            let mut subs = Vec::new();
            if let Some(unsub) = logs.unsub.take() {
                subs.push(unsub);
            }
            if let Some(unsub) = heads.unsub.take() {
                subs.push(unsub);
            }
            self.store_unsubscribers(subs).await;

            if let Err(e) = self.backfill_to_head().await {
                fatal(&format!(
                    "Couldn't back-fill blocks after reconnecting to the execution client: {}",
                    e
                ));
            }

            return Some((logs, heads));
        }

        fatal("Couldn't re-establish the execution client connection");
    }
}
