//! The two in-memory indices behind the read path
//!
//! `MinipoolIndex` maps validator pubkeys to their owning node and only ever
//! grows; a pubkey maps to the same node for the lifetime of the process, so
//! repeated observation of the same creation event is a no-op. `NodeIndex`
//! maps node addresses to their cached state; records are replaced wholesale
//! so concurrent readers never see a torn entry.
//!
//! Both indices are written by a single task (the snapshot loader during
//! startup, then the event ingestor) and read by any number of query tasks.

use crate::types::{NodeInfo, ValidatorPubkey};
use alloy_primitives::Address;
use dashmap::DashMap;

/// Append-only mapping of validator pubkey to owning node address.
pub struct MinipoolIndex {
    map: DashMap<ValidatorPubkey, Address>,
}

impl MinipoolIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self { map: DashMap::new() }
    }

    /// Record a minipool's validator as owned by `node`.
    ///
    /// Idempotent with respect to repeated observation of the same creation
    /// event.
    pub fn insert(&self, pubkey: ValidatorPubkey, node: Address) {
        self.map.insert(pubkey, node);
    }

    /// The node that owns this validator, if known.
    pub fn node_for(&self, pubkey: &ValidatorPubkey) -> Option<Address> {
        self.map.get(pubkey).map(|entry| *entry.value())
    }

    /// Number of known minipools.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for MinipoolIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Mapping of node address to cached node state.
pub struct NodeIndex {
    map: DashMap<Address, NodeInfo>,
}

impl NodeIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self { map: DashMap::new() }
    }

    /// Insert or replace a node's record.
    ///
    /// The record is swapped in whole, never field-by-field.
    pub fn insert(&self, node: Address, info: NodeInfo) {
        self.map.insert(node, info);
    }

    /// A copy of the node's record, if present.
    pub fn get(&self, node: &Address) -> Option<NodeInfo> {
        self.map.get(node).map(|entry| *entry.value())
    }

    /// Visit every node address. The callback returning `false` stops the
    /// iteration early. No ordering guarantee.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(Address) -> bool,
    {
        for entry in self.map.iter() {
            if !f(*entry.key()) {
                break;
            }
        }
    }

    /// Number of known nodes.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for NodeIndex {
    fn default() -> Self {
        Self::new()
    }
}
