//! Execution layer client
//!
//! Production `ChainClient` over an alloy pubsub provider (websocket or IPC).
//! Registry view calls are hand-encoded `eth_call`s pinned to a block; the
//! two subscriptions are forwarded from the provider's streams into bounded
//! channels so the ingest loop can multiplex them alongside their error
//! channels.
//!
//! A subscription attempt on a dead connection redials the endpoint once, so
//! the oracle's reconnect loop makes real progress instead of retrying a
//! broken socket.

use crate::abi;
use crate::chain::{
    ChainClient, LogFilter, MinipoolDetails, Subscription, Unsubscriber, SUBSCRIPTION_BUFFER,
};
use crate::config::Config;
use crate::types::{LogEvent, NewHead, ValidatorPubkey};
use alloy::eips::BlockId;
use alloy::providers::{DynProvider, IpcConnect, Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Filter, Log as RpcLog, TransactionInput, TransactionRequest};
use alloy_primitives::{Address, Bytes, TxKind};
use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// Execution layer client backed by a subscription-capable alloy provider.
pub struct ElClient {
    config: Config,
    provider: RwLock<DynProvider>,
    /// Contract addresses resolved through rocket storage, cached by name.
    /// A Rocket Pool upgrade that moves a contract requires a restart.
    contracts: DashMap<String, Address>,
}

impl ElClient {
    /// Connect to the execution client described by the config.
    pub async fn connect(config: &Config) -> Result<Self> {
        let provider = dial(config).await?;
        Ok(Self {
            config: config.clone(),
            provider: RwLock::new(provider),
            contracts: DashMap::new(),
        })
    }

    async fn provider(&self) -> DynProvider {
        self.provider.read().await.clone()
    }

    /// Replace the current provider with a freshly dialed connection.
    async fn redial(&self) -> Result<DynProvider> {
        let provider = dial(&self.config).await?;
        *self.provider.write().await = provider.clone();
        Ok(provider)
    }

    /// Execute a view call, optionally pinned to a block.
    async fn eth_call(&self, to: Address, data: Vec<u8>, block: Option<u64>) -> Result<Vec<u8>> {
        let provider = self.provider().await;
        let tx = TransactionRequest {
            to: Some(TxKind::Call(to)),
            input: TransactionInput::new(Bytes::from(data)),
            ..Default::default()
        };
        let call = provider.call(tx);
        let call = match block {
            Some(number) => call.block(BlockId::number(number)),
            None => call,
        };
        let out = call
            .await
            .with_context(|| format!("eth_call to {} failed", to))?;
        Ok(out.to_vec())
    }

    /// Resolve a contract address by name through rocket storage.
    async fn resolve_contract(&self, name: &str, block: Option<u64>) -> Result<Address> {
        if let Some(entry) = self.contracts.get(name) {
            return Ok(*entry.value());
        }

        let key = abi::contract_address_key(name);
        let data = abi::encode_call("getAddress(bytes32)", &[key.0]);
        let out = self
            .eth_call(self.config.rocket_storage, data, block)
            .await
            .with_context(|| format!("Failed to resolve contract '{}'", name))?;
        let addr = abi::decode_address(&out)?;
        if addr == Address::ZERO {
            anyhow::bail!("Rocket storage has no address for contract '{}'", name);
        }

        self.contracts.insert(name.to_string(), addr);
        Ok(addr)
    }
}

/// Dial the configured endpoint, picking the transport from the URL scheme.
async fn dial(config: &Config) -> Result<DynProvider> {
    let provider = match config.ec_url.scheme() {
        "ws" | "wss" => ProviderBuilder::new()
            .connect_ws(WsConnect::new(config.ec_url.as_str()))
            .await
            .with_context(|| format!("Failed to connect to {}", config.ec_url))?
            .erased(),
        "ipc" => ProviderBuilder::new()
            .connect_ipc(IpcConnect::new(config.ec_url.path().to_string()))
            .await
            .with_context(|| format!("Failed to connect to IPC at {}", config.ec_url.path()))?
            .erased(),
        other => anyhow::bail!("Unsupported execution client scheme '{}'", other),
    };
    Ok(provider)
}

/// Build an alloy filter from the oracle's contract/topic sets.
fn build_filter(filter: &LogFilter) -> Filter {
    Filter::new()
        .address(filter.addresses.clone())
        .event_signature(filter.topics.clone())
}

/// Convert a provider log into the oracle's event type.
///
/// Logs without a block number (pending logs) are dropped; the oracle only
/// tracks included events.
fn convert_log(log: RpcLog) -> Option<LogEvent> {
    let block_number = log.block_number?;
    Some(LogEvent {
        address: log.inner.address,
        topics: log.inner.data.topics().to_vec(),
        data: log.inner.data.data.to_vec(),
        block_number,
    })
}

#[async_trait]
impl ChainClient for ElClient {
    async fn latest_block(&self) -> Result<u64> {
        self.provider()
            .await
            .get_block_number()
            .await
            .context("Failed to fetch latest block number")
    }

    async fn contract_address(&self, name: &str, block: u64) -> Result<Address> {
        self.resolve_contract(name, Some(block)).await
    }

    async fn node_addresses(&self, block: u64) -> Result<Vec<Address>> {
        let manager = self.resolve_contract("rocketNodeManager", Some(block)).await?;

        let out = self
            .eth_call(manager, abi::encode_call("getNodeCount()", &[]), Some(block))
            .await
            .context("Failed to fetch node count")?;
        let count = abi::decode_u64(&out)?;

        let mut nodes = Vec::with_capacity(count as usize);
        for i in 0..count {
            let data = abi::encode_call("getNodeAt(uint256)", &[abi::word_from_u64(i)]);
            let out = self
                .eth_call(manager, data, Some(block))
                .await
                .with_context(|| format!("Failed to fetch node at index {}", i))?;
            nodes.push(abi::decode_address(&out)?);
        }
        Ok(nodes)
    }

    async fn smoothing_pool_state(&self, node: Address, block: u64) -> Result<bool> {
        let manager = self.resolve_contract("rocketNodeManager", Some(block)).await?;
        let data = abi::encode_call(
            "getSmoothingPoolRegistrationState(address)",
            &[abi::word_from_address(node)],
        );
        let out = self
            .eth_call(manager, data, Some(block))
            .await
            .with_context(|| format!("Failed to fetch smoothing pool state for {}", node))?;
        abi::decode_bool(&out)
    }

    async fn fee_distributor(&self, node: Address, block: Option<u64>) -> Result<Address> {
        let factory = self
            .resolve_contract("rocketNodeDistributorFactory", block)
            .await?;
        let data = abi::encode_call("getProxyAddress(address)", &[abi::word_from_address(node)]);
        let out = self
            .eth_call(factory, data, block)
            .await
            .with_context(|| format!("Failed to compute fee distributor for {}", node))?;
        abi::decode_address(&out)
    }

    async fn node_minipools(&self, node: Address, block: u64) -> Result<Vec<MinipoolDetails>> {
        let manager = self
            .resolve_contract("rocketMinipoolManager", Some(block))
            .await?;

        let data = abi::encode_call(
            "getNodeMinipoolCount(address)",
            &[abi::word_from_address(node)],
        );
        let out = self
            .eth_call(manager, data, Some(block))
            .await
            .with_context(|| format!("Failed to fetch minipool count for {}", node))?;
        let count = abi::decode_u64(&out)?;

        let mut minipools = Vec::with_capacity(count as usize);
        for i in 0..count {
            let data = abi::encode_call(
                "getNodeMinipoolAt(address,uint256)",
                &[abi::word_from_address(node), abi::word_from_u64(i)],
            );
            let out = self
                .eth_call(manager, data, Some(block))
                .await
                .with_context(|| format!("Failed to fetch minipool {} of {}", i, node))?;
            let address = abi::decode_address(&out)?;
            let pubkey = self.minipool_pubkey(address, Some(block)).await?;
            minipools.push(MinipoolDetails { address, pubkey });
        }
        Ok(minipools)
    }

    async fn minipool_pubkey(
        &self,
        minipool: Address,
        block: Option<u64>,
    ) -> Result<ValidatorPubkey> {
        let manager = self.resolve_contract("rocketMinipoolManager", block).await?;
        let data = abi::encode_call(
            "getMinipoolPubkey(address)",
            &[abi::word_from_address(minipool)],
        );
        let out = self
            .eth_call(manager, data, block)
            .await
            .with_context(|| format!("Failed to fetch pubkey for minipool {}", minipool))?;
        let raw = abi::decode_bytes(&out)?;
        ValidatorPubkey::from_slice(&raw)
            .with_context(|| format!("Minipool {} returned a malformed pubkey", minipool))
    }

    async fn filter_logs(&self, filter: &LogFilter, from: u64, to: u64) -> Result<Vec<LogEvent>> {
        let query = build_filter(filter).from_block(from).to_block(to);
        let logs = self
            .provider()
            .await
            .get_logs(&query)
            .await
            .with_context(|| format!("Historical log query for blocks {}-{} failed", from, to))?;

        Ok(logs.into_iter().filter_map(convert_log).collect())
    }

    async fn subscribe_logs(&self, filter: &LogFilter) -> Result<Subscription<LogEvent>> {
        let query = build_filter(filter);
        let sub = match self.provider().await.subscribe_logs(&query).await {
            Ok(sub) => sub,
            Err(e) => {
                debug!("Log subscription failed ({}), redialing execution client", e);
                let provider = self.redial().await?;
                provider
                    .subscribe_logs(&query)
                    .await
                    .context("Failed to subscribe to logs after redial")?
            }
        };

        let (items_tx, items_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (errors_tx, errors_rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move {
            let mut stream = sub.into_stream();
            while let Some(log) = stream.next().await {
                match convert_log(log) {
                    Some(event) => {
                        if items_tx.send(event).await.is_err() {
                            return; // receiver gone, feed torn down
                        }
                    }
                    None => warn!("Dropping subscribed log without a block number"),
                }
            }
            let _ = errors_tx
                .send(anyhow::anyhow!("Log subscription stream ended"))
                .await;
        });
        let abort = handle.abort_handle();

        Ok(Subscription {
            items: items_rx,
            errors: errors_rx,
            unsub: Some(Unsubscriber::new(move || abort.abort())),
        })
    }

    async fn subscribe_heads(&self) -> Result<Subscription<NewHead>> {
        let sub = match self.provider().await.subscribe_blocks().await {
            Ok(sub) => sub,
            Err(e) => {
                debug!("Head subscription failed ({}), redialing execution client", e);
                let provider = self.redial().await?;
                provider
                    .subscribe_blocks()
                    .await
                    .context("Failed to subscribe to new heads after redial")?
            }
        };

        let (items_tx, items_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (errors_tx, errors_rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move {
            let mut stream = sub.into_stream();
            while let Some(header) = stream.next().await {
                let head = NewHead {
                    number: header.number,
                };
                if items_tx.send(head).await.is_err() {
                    return;
                }
            }
            let _ = errors_tx
                .send(anyhow::anyhow!("Head subscription stream ended"))
                .await;
        });
        let abort = handle.abort_handle();

        Ok(Subscription {
            items: items_rx,
            errors: errors_rx,
            unsub: Some(Unsubscriber::new(move || abort.abort())),
        })
    }
}
