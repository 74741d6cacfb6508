//! Service configuration
//!
//! Validates the two external knobs the oracle needs: the execution client
//! endpoint (which must support subscriptions) and the rocket storage
//! contract address that bootstraps all other contract resolution.

use alloy_primitives::Address;
use anyhow::{Context, Result};
use url::Url;

/// Validated oracle configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Execution client endpoint. Websocket or IPC; plain HTTP cannot carry
    /// the log and head subscriptions.
    pub ec_url: Url,
    /// Address of the rocket storage registry contract.
    pub rocket_storage: Address,
}

impl Config {
    /// Parse and validate configuration values.
    pub fn new(ec_url: &str, rocket_storage: &str) -> Result<Self> {
        let ec_url = Url::parse(ec_url)
            .with_context(|| format!("Invalid execution client URL: {}", ec_url))?;

        match ec_url.scheme() {
            "ws" | "wss" | "ipc" => {}
            other => anyhow::bail!(
                "Execution client URL must support subscriptions (ws, wss, or ipc), got '{}'",
                other
            ),
        }

        let rocket_storage = parse_address(rocket_storage)
            .context("Invalid rocket storage contract address")?;

        Ok(Self {
            ec_url,
            rocket_storage,
        })
    }
}

/// Parse an address from a hex string.
///
/// Accepts addresses with or without 0x prefix.
fn parse_address(s: &str) -> Result<Address> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).with_context(|| format!("Invalid hex address: {}", s))?;

    if bytes.len() != 20 {
        anyhow::bail!(
            "Address must be 20 bytes (40 hex chars), got {} bytes",
            bytes.len()
        );
    }

    Ok(Address::from_slice(&bytes))
}
