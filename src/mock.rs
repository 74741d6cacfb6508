//! In-memory chain fixture for oracle tests
//!
//! A scriptable `ChainClient`: snapshot state is declared up front with
//! `MockNode`, historical logs are appended to a replayable history, and the
//! live feeds are plain channels the test writes into. Subscription failures
//! can be injected to exercise the reconnect path.

use crate::chain::{
    ChainClient, LogFilter, MinipoolDetails, Subscription, Unsubscriber, SUBSCRIPTION_BUFFER,
};
use crate::types::{
    minipool_created_topic, node_registered_topic, smoothing_pool_state_changed_topic, LogEvent,
    NewHead, ValidatorPubkey,
};
use alloy_primitives::{address, Address, B256};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const NODE_MANAGER: Address = address!("00000000000000000000000000000000000000e1");
const MINIPOOL_MANAGER: Address = address!("00000000000000000000000000000000000000e2");
const SMOOTHING_POOL: Address = address!("00000000000000000000000000000000000000e3");

type Feed<T> = Arc<Mutex<Option<mpsc::Sender<T>>>>;

/// Snapshot fixture for one registered node.
pub struct MockNode {
    address: Address,
    in_smoothing_pool: bool,
    distributor: Address,
    minipools: Vec<(Address, ValidatorPubkey)>,
}

impl MockNode {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            in_smoothing_pool: false,
            distributor: Address::ZERO,
            minipools: Vec::new(),
        }
    }

    pub fn in_smoothing_pool(mut self) -> Self {
        self.in_smoothing_pool = true;
        self
    }

    pub fn distributor(mut self, distributor: Address) -> Self {
        self.distributor = distributor;
        self
    }

    pub fn minipool(mut self, minipool: Address, pubkey: ValidatorPubkey) -> Self {
        self.minipools.push((minipool, pubkey));
        self
    }
}

/// Scriptable in-memory chain.
pub struct MockChain {
    /// Head numbers returned by `latest_block`; the front is popped while
    /// more than one remains, then the last value repeats.
    latest: Mutex<VecDeque<u64>>,
    nodes: Mutex<Vec<(Address, bool)>>,
    distributors: Mutex<HashMap<Address, Address>>,
    minipools_by_node: Mutex<HashMap<Address, Vec<(Address, ValidatorPubkey)>>>,
    pubkeys: Mutex<HashMap<Address, ValidatorPubkey>>,
    history: Mutex<Vec<LogEvent>>,

    log_feed: Feed<LogEvent>,
    log_error_feed: Feed<anyhow::Error>,
    head_feed: Feed<NewHead>,
    head_error_feed: Feed<anyhow::Error>,

    log_subscribe_failures: AtomicU32,
    head_subscribe_failures: AtomicU32,
    log_subscribes: AtomicU32,
    fail_snapshot: AtomicBool,
}

impl MockChain {
    pub fn new(head: u64) -> Self {
        Self {
            latest: Mutex::new(VecDeque::from([head])),
            nodes: Mutex::new(Vec::new()),
            distributors: Mutex::new(HashMap::new()),
            minipools_by_node: Mutex::new(HashMap::new()),
            pubkeys: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
            log_feed: Arc::new(Mutex::new(None)),
            log_error_feed: Arc::new(Mutex::new(None)),
            head_feed: Arc::new(Mutex::new(None)),
            head_error_feed: Arc::new(Mutex::new(None)),
            log_subscribe_failures: AtomicU32::new(0),
            head_subscribe_failures: AtomicU32::new(0),
            log_subscribes: AtomicU32::new(0),
            fail_snapshot: AtomicBool::new(false),
        }
    }

    pub fn smoothing_pool_address(&self) -> Address {
        SMOOTHING_POOL
    }

    /// Declare a node (and its minipools) as part of the snapshot state.
    pub fn add_node(&self, node: MockNode) {
        self.nodes
            .lock()
            .unwrap()
            .push((node.address, node.in_smoothing_pool));
        self.distributors
            .lock()
            .unwrap()
            .insert(node.address, node.distributor);
        for (minipool, pubkey) in &node.minipools {
            self.pubkeys.lock().unwrap().insert(*minipool, *pubkey);
        }
        self.minipools_by_node
            .lock()
            .unwrap()
            .insert(node.address, node.minipools);
    }

    /// Fix the distributor the chain derives for a node.
    pub fn set_distributor(&self, node: Address, distributor: Address) {
        self.distributors.lock().unwrap().insert(node, distributor);
    }

    /// Fix the pubkey a minipool contract reports.
    pub fn set_minipool_pubkey(&self, minipool: Address, pubkey: ValidatorPubkey) {
        self.pubkeys.lock().unwrap().insert(minipool, pubkey);
    }

    /// Append a log to the historical record served by `filter_logs`.
    pub fn add_history(&self, event: LogEvent) {
        self.history.lock().unwrap().push(event);
    }

    /// Replace the head number returned by `latest_block` from now on.
    pub fn set_latest(&self, head: u64) {
        *self.latest.lock().unwrap() = VecDeque::from([head]);
    }

    /// Queue an additional head number; earlier entries are consumed first.
    pub fn push_latest(&self, head: u64) {
        self.latest.lock().unwrap().push_back(head);
    }

    /// Make snapshot view calls fail, to exercise fatal initialization.
    pub fn fail_snapshot_reads(&self) {
        self.fail_snapshot.store(true, Ordering::Release);
    }

    /// Fail the next `count` log subscription attempts.
    pub fn fail_next_log_subscribes(&self, count: u32) {
        self.log_subscribe_failures.store(count, Ordering::Release);
    }

    /// Fail the next `count` head subscription attempts.
    pub fn fail_next_head_subscribes(&self, count: u32) {
        self.head_subscribe_failures.store(count, Ordering::Release);
    }

    /// How many log subscriptions have been established.
    pub fn log_subscribe_count(&self) -> u32 {
        self.log_subscribes.load(Ordering::Acquire)
    }

    /// Deliver a log on the live feed.
    pub async fn send_log(&self, event: LogEvent) {
        let sender = self.log_feed.lock().unwrap().clone();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    /// Deliver a head on the live feed.
    pub async fn send_head(&self, number: u64) {
        let sender = self.head_feed.lock().unwrap().clone();
        if let Some(sender) = sender {
            let _ = sender.send(NewHead { number }).await;
        }
    }

    /// Report a log subscription failure.
    pub async fn send_log_error(&self, error: anyhow::Error) {
        let sender = self.log_error_feed.lock().unwrap().clone();
        if let Some(sender) = sender {
            let _ = sender.send(error).await;
        }
    }

    /// Report a head subscription failure.
    pub async fn send_head_error(&self, error: anyhow::Error) {
        let sender = self.head_error_feed.lock().unwrap().clone();
        if let Some(sender) = sender {
            let _ = sender.send(error).await;
        }
    }

    fn open_feed<T: Send + 'static>(feed: &Feed<T>, error_feed: &Feed<anyhow::Error>) -> Subscription<T> {
        let (items_tx, items_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (errors_tx, errors_rx) = mpsc::channel(1);
        *feed.lock().unwrap() = Some(items_tx);
        *error_feed.lock().unwrap() = Some(errors_tx);

        let feed = Arc::clone(feed);
        let error_feed = Arc::clone(error_feed);
        Subscription {
            items: items_rx,
            errors: errors_rx,
            unsub: Some(Unsubscriber::new(move || {
                feed.lock().unwrap().take();
                error_feed.lock().unwrap().take();
            })),
        }
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn latest_block(&self) -> Result<u64> {
        let mut latest = self.latest.lock().unwrap();
        if latest.len() > 1 {
            Ok(latest.pop_front().unwrap())
        } else {
            Ok(*latest.front().unwrap())
        }
    }

    async fn contract_address(&self, name: &str, _block: u64) -> Result<Address> {
        match name {
            "rocketNodeManager" => Ok(NODE_MANAGER),
            "rocketMinipoolManager" => Ok(MINIPOOL_MANAGER),
            "rocketSmoothingPool" => Ok(SMOOTHING_POOL),
            other => anyhow::bail!("no fixture for contract '{}'", other),
        }
    }

    async fn node_addresses(&self, _block: u64) -> Result<Vec<Address>> {
        if self.fail_snapshot.load(Ordering::Acquire) {
            anyhow::bail!("injected snapshot failure");
        }
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .iter()
            .map(|(addr, _)| *addr)
            .collect())
    }

    async fn smoothing_pool_state(&self, node: Address, _block: u64) -> Result<bool> {
        if self.fail_snapshot.load(Ordering::Acquire) {
            anyhow::bail!("injected snapshot failure");
        }
        self.nodes
            .lock()
            .unwrap()
            .iter()
            .find(|(addr, _)| *addr == node)
            .map(|(_, in_pool)| *in_pool)
            .ok_or_else(|| anyhow::anyhow!("no fixture for node {}", node))
    }

    async fn fee_distributor(&self, node: Address, _block: Option<u64>) -> Result<Address> {
        self.distributors
            .lock()
            .unwrap()
            .get(&node)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no distributor fixture for {}", node))
    }

    async fn node_minipools(&self, node: Address, _block: u64) -> Result<Vec<MinipoolDetails>> {
        Ok(self
            .minipools_by_node
            .lock()
            .unwrap()
            .get(&node)
            .map(|pools| {
                pools
                    .iter()
                    .map(|(address, pubkey)| MinipoolDetails {
                        address: *address,
                        pubkey: *pubkey,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn minipool_pubkey(
        &self,
        minipool: Address,
        _block: Option<u64>,
    ) -> Result<ValidatorPubkey> {
        self.pubkeys
            .lock()
            .unwrap()
            .get(&minipool)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no pubkey fixture for minipool {}", minipool))
    }

    async fn filter_logs(&self, _filter: &LogFilter, from: u64, to: u64) -> Result<Vec<LogEvent>> {
        Ok(self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.block_number >= from && event.block_number <= to)
            .cloned()
            .collect())
    }

    async fn subscribe_logs(&self, _filter: &LogFilter) -> Result<Subscription<LogEvent>> {
        if self.log_subscribe_failures.load(Ordering::Acquire) > 0 {
            self.log_subscribe_failures.fetch_sub(1, Ordering::AcqRel);
            anyhow::bail!("injected log subscription failure");
        }
        self.log_subscribes.fetch_add(1, Ordering::AcqRel);
        Ok(Self::open_feed(&self.log_feed, &self.log_error_feed))
    }

    async fn subscribe_heads(&self) -> Result<Subscription<NewHead>> {
        if self.head_subscribe_failures.load(Ordering::Acquire) > 0 {
            self.head_subscribe_failures.fetch_sub(1, Ordering::AcqRel);
            anyhow::bail!("injected head subscription failure");
        }
        Ok(Self::open_feed(&self.head_feed, &self.head_error_feed))
    }
}

/// Build a `NodeRegistered` event as the node manager emits it.
pub fn node_registered(node: Address, block: u64) -> LogEvent {
    LogEvent {
        address: NODE_MANAGER,
        topics: vec![node_registered_topic(), address_topic(node)],
        data: Vec::new(),
        block_number: block,
    }
}

/// Build a `NodeSmoothingPoolStateChanged` event.
pub fn state_changed(node: Address, in_pool: bool, block: u64) -> LogEvent {
    let mut data = vec![0u8; 32];
    if in_pool {
        data[31] = 1;
    }
    LogEvent {
        address: NODE_MANAGER,
        topics: vec![smoothing_pool_state_changed_topic(), address_topic(node)],
        data,
        block_number: block,
    }
}

/// Build a `MinipoolCreated` event as the minipool manager emits it.
pub fn minipool_created(minipool: Address, node: Address, block: u64) -> LogEvent {
    LogEvent {
        address: MINIPOOL_MANAGER,
        topics: vec![
            minipool_created_topic(),
            address_topic(minipool),
            address_topic(node),
        ],
        data: Vec::new(),
        block_number: block,
    }
}

fn address_topic(addr: Address) -> B256 {
    let mut topic = [0u8; 32];
    topic[12..].copy_from_slice(addr.as_slice());
    B256::from(topic)
}

/// Poll until the condition holds, panicking after a generous timeout.
pub async fn wait_until<F>(what: &str, cond: F)
where
    F: Fn() -> bool,
{
    for _ in 0..3000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Timed out waiting for {}", what);
}
