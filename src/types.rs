//! Core oracle types and event decoding
//!
//! Type definitions for validator pubkeys, per-node cache records, and the
//! log/header events delivered by the execution layer, plus the topic hashes
//! and decode helpers for the three Rocket Pool events the oracle follows.

use alloy_primitives::{keccak256, Address, B256, U256};
use anyhow::Result;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// A consensus-layer validator public key (48-byte BLS key).
///
/// Opaque and hash-equality comparable; used as the key of the minipool index.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValidatorPubkey([u8; 48]);

impl ValidatorPubkey {
    /// Length of a BLS public key in bytes.
    pub const LEN: usize = 48;

    /// Wrap a raw 48-byte key.
    pub fn new(bytes: [u8; 48]) -> Self {
        Self(bytes)
    }

    /// Parse a pubkey from a byte slice.
    ///
    /// Fails unless the slice is exactly 48 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::LEN {
            anyhow::bail!(
                "Validator pubkey must be {} bytes, got {}",
                Self::LEN,
                bytes.len()
            );
        }
        let mut out = [0u8; Self::LEN];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 48] {
        &self.0
    }
}

impl fmt::Display for ValidatorPubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ValidatorPubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValidatorPubkey({})", self)
    }
}

impl FromStr for ValidatorPubkey {
    type Err = anyhow::Error;

    /// Parse a pubkey from a hex string, with or without 0x prefix.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| anyhow::anyhow!("Invalid pubkey hex: {}", e))?;
        Self::from_slice(&bytes)
    }
}

/// Cached per-node state.
///
/// Replaced wholesale in the node index on every mutation, so concurrent
/// readers never observe a partially updated record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeInfo {
    /// Whether the node has opted into the smoothing pool.
    pub in_smoothing_pool: bool,
    /// The node's fee distributor contract address.
    ///
    /// Zero until resolved. The read path never returns a distributor for a
    /// node whose address has not been resolved or recomputed.
    pub fee_distributor: Address,
}

/// A contract event log delivered by the chain adapter.
#[derive(Debug, Clone)]
pub struct LogEvent {
    /// Address of the contract that emitted the event.
    pub address: Address,
    /// Indexed topics (topics[0] = event signature hash).
    pub topics: Vec<B256>,
    /// Non-indexed event data.
    pub data: Vec<u8>,
    /// Block the event was included in.
    pub block_number: u64,
}

/// A new chain head notification.
#[derive(Debug, Clone, Copy)]
pub struct NewHead {
    /// Block number of the new head.
    pub number: u64,
}

static NODE_REGISTERED_TOPIC: OnceLock<B256> = OnceLock::new();
static SP_STATE_CHANGED_TOPIC: OnceLock<B256> = OnceLock::new();
static MINIPOOL_CREATED_TOPIC: OnceLock<B256> = OnceLock::new();

/// Topic hash of `NodeRegistered(address,uint256)`.
pub fn node_registered_topic() -> B256 {
    *NODE_REGISTERED_TOPIC.get_or_init(|| keccak256(b"NodeRegistered(address,uint256)"))
}

/// Topic hash of `NodeSmoothingPoolStateChanged(address,bool)`.
pub fn smoothing_pool_state_changed_topic() -> B256 {
    *SP_STATE_CHANGED_TOPIC
        .get_or_init(|| keccak256(b"NodeSmoothingPoolStateChanged(address,bool)"))
}

/// Topic hash of `MinipoolCreated(address,address,uint256)`.
pub fn minipool_created_topic() -> B256 {
    *MINIPOOL_CREATED_TOPIC.get_or_init(|| keccak256(b"MinipoolCreated(address,address,uint256)"))
}

/// Extract an address from an indexed topic (left-padded to 32 bytes).
pub fn address_from_topic(topic: &B256) -> Address {
    Address::from_slice(&topic[12..])
}

/// Decode a solidity bool from a 32-byte big-endian event data word.
///
/// The chain encodes `true` as integer 1.
pub fn bool_from_data(data: &[u8]) -> Result<bool> {
    if data.len() != 32 {
        anyhow::bail!("Expected 32-byte bool word, got {} bytes", data.len());
    }
    Ok(U256::from_be_slice(data) == U256::from(1))
}
