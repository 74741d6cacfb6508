//! Rescue proxy - Rocket Pool validator fee-recipient oracle
//!
//! This library maintains an in-memory projection of the Rocket Pool node
//! and minipool registries, built from a pinned on-chain snapshot and kept
//! current through a live event stream with gap back-fill, so fee-recipient
//! queries are answered in constant time.

pub mod abi;
pub mod chain;
pub mod config;
pub mod index;
pub mod ingest;
pub mod oracle;
pub mod rpc;
pub mod server;
pub mod types;

#[cfg(test)]
mod mock;

// Re-export the main types for convenience
pub use chain::{ChainClient, LogFilter, MinipoolDetails, Subscription, Unsubscriber};
pub use config::Config;
pub use oracle::Oracle;
pub use rpc::ElClient;
pub use types::{NodeInfo, ValidatorPubkey};
