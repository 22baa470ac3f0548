//! Chain Node Client
//!
//! JSON-RPC access to an EVM chain node plus a block poller that turns head
//! changes into [`BlockNotification`]s on a channel. The watcher only ever
//! sees the channel, never the transport.

use alloy::primitives::U256;
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::transports::BoxTransport;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Default chain node endpoint (Avalanche C-Chain public RPC)
pub const DEFAULT_RPC_URL: &str = "https://api.avax.network/ext/bc/C/rpc";

/// Default bound on a single RPC call
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 10000;

/// Default head polling interval
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Capacity of the notification channel between poller and watcher
pub const NOTIFICATION_BUFFER: usize = 64;

/// Errors that can occur fetching from the chain node
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("RPC transport error: {0}")]
    Transport(String),

    #[error("RPC call timed out after {0}ms")]
    Timeout(u64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Malformed RPC payload: {0}")]
    Malformed(String),
}

/// Configuration for the chain node connection and polling
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Endpoint URL (http(s), ws(s) or IPC path)
    pub rpc_url: String,
    /// Bound on each RPC call in milliseconds
    pub rpc_timeout_ms: u64,
    /// Head polling interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            rpc_timeout_ms: DEFAULT_RPC_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl ChainConfig {
    /// Create a config for the given endpoint
    pub fn with_url(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            ..Default::default()
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// A new block announced by the notification source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockNotification {
    pub number: u64,
    pub hash: String,
}

/// Block as returned by `eth_getBlockBy*` with transaction hashes only
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawBlock {
    pub hash: String,
    pub number: String,
    #[serde(default)]
    pub transactions: Vec<String>,
}

/// Transaction as returned by `eth_getTransactionByHash`
///
/// Quantities are hex strings. Signature, nonce, access list and chain id are
/// carried but never projected into the canonical record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawChainTransaction {
    pub hash: String,
    pub block_hash: Option<String>,
    pub block_number: Option<String>,
    pub transaction_index: Option<String>,
    pub from: String,
    /// Absent for contract creation
    pub to: Option<String>,
    pub value: String,
    /// Gas limit
    pub gas: String,
    pub gas_price: Option<String>,
    pub max_fee_per_gas: Option<String>,
    pub max_priority_fee_per_gas: Option<String>,
    pub nonce: Option<String>,
    pub input: Option<String>,
    pub chain_id: Option<String>,
    #[serde(rename = "type")]
    pub tx_type: Option<String>,
    pub v: Option<String>,
    pub r: Option<String>,
    pub s: Option<String>,
}

/// Subset of `eth_getTransactionReceipt`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawReceipt {
    pub transaction_hash: String,
    pub gas_used: String,
    /// `0x1` success, `0x0` failure; absent before Byzantium
    pub status: Option<String>,
}

/// Read access to a chain node
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current head block number
    async fn head_block_number(&self) -> Result<u64, FetchError>;

    /// Block by height, transaction hashes only
    async fn block_by_number(&self, number: u64) -> Result<RawBlock, FetchError>;

    /// Block by hash, transaction hashes only
    async fn block_by_hash(&self, hash: &str) -> Result<RawBlock, FetchError>;

    /// Full transaction detail
    async fn transaction(&self, hash: &str) -> Result<RawChainTransaction, FetchError>;

    /// Transaction receipt
    async fn receipt(&self, hash: &str) -> Result<RawReceipt, FetchError>;
}

/// Chain client backed by an alloy provider
pub struct RpcChainClient {
    provider: RootProvider<BoxTransport>,
}

impl RpcChainClient {
    /// Wrap an existing provider
    pub fn new(provider: RootProvider<BoxTransport>) -> Self {
        Self { provider }
    }

    /// Connect to the configured endpoint
    ///
    /// The transport is picked from the URL scheme (http, ws, ipc).
    pub async fn connect(config: &ChainConfig) -> Result<Self, FetchError> {
        info!(url = %config.rpc_url, "Connecting to chain node");

        let provider = with_timeout(config.rpc_timeout(), async {
            ProviderBuilder::new()
                .on_builtin(&config.rpc_url)
                .await
                .map_err(|e| FetchError::ConnectionFailed(e.to_string()))
        })
        .await?;

        info!("Chain node transport ready");
        Ok(Self::new(provider))
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn head_block_number(&self) -> Result<u64, FetchError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))
    }

    async fn block_by_number(&self, number: u64) -> Result<RawBlock, FetchError> {
        let block: Option<RawBlock> = self
            .provider
            .raw_request("eth_getBlockByNumber".into(), (format!("{:#x}", number), false))
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        block.ok_or_else(|| FetchError::NotFound(format!("block {}", number)))
    }

    async fn block_by_hash(&self, hash: &str) -> Result<RawBlock, FetchError> {
        let block: Option<RawBlock> = self
            .provider
            .raw_request("eth_getBlockByHash".into(), (hash.to_string(), false))
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        block.ok_or_else(|| FetchError::NotFound(format!("block {}", hash)))
    }

    async fn transaction(&self, hash: &str) -> Result<RawChainTransaction, FetchError> {
        let tx: Option<RawChainTransaction> = self
            .provider
            .raw_request("eth_getTransactionByHash".into(), (hash.to_string(),))
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        tx.ok_or_else(|| FetchError::NotFound(format!("transaction {}", hash)))
    }

    async fn receipt(&self, hash: &str) -> Result<RawReceipt, FetchError> {
        let receipt: Option<RawReceipt> = self
            .provider
            .raw_request("eth_getTransactionReceipt".into(), (hash.to_string(),))
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        receipt.ok_or_else(|| FetchError::NotFound(format!("receipt {}", hash)))
    }
}

/// Bound an RPC future; expiry becomes [`FetchError::Timeout`]
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, FetchError>
where
    F: Future<Output = Result<T, FetchError>>,
{
    timeout(limit, call)
        .await
        .map_err(|_| FetchError::Timeout(limit.as_millis() as u64))?
}

/// Parse a hex quantity (`0x`-prefixed) into a 256-bit integer
pub fn parse_quantity(quantity: &str) -> Result<U256, FetchError> {
    let digits = quantity
        .strip_prefix("0x")
        .ok_or_else(|| FetchError::Malformed(format!("quantity without 0x prefix: {}", quantity)))?;
    if digits.is_empty() {
        return Err(FetchError::Malformed(format!("empty quantity: {}", quantity)));
    }
    U256::from_str_radix(digits, 16)
        .map_err(|e| FetchError::Malformed(format!("bad quantity {}: {}", quantity, e)))
}

/// Convert a hex quantity to its decimal string without precision loss
pub fn quantity_to_decimal(quantity: &str) -> Result<String, FetchError> {
    parse_quantity(quantity).map(|v| v.to_string())
}

/// Parse a hex quantity that must fit in 64 bits
pub fn quantity_to_u64(quantity: &str) -> Result<u64, FetchError> {
    let value = parse_quantity(quantity)?;
    u64::try_from(value).map_err(|_| FetchError::Malformed(format!("quantity overflows u64: {}", quantity)))
}

/// Polls the chain head and announces new blocks on a channel
///
/// Only the newest head is announced; heights skipped between two polls are
/// not backfilled.
pub struct BlockPoller<C> {
    client: Arc<C>,
    poll_interval: Duration,
    rpc_timeout: Duration,
    last_seen: Option<u64>,
}

impl<C: ChainClient + 'static> BlockPoller<C> {
    pub fn new(client: Arc<C>, config: &ChainConfig) -> Self {
        Self {
            client,
            poll_interval: config.poll_interval(),
            rpc_timeout: config.rpc_timeout(),
            last_seen: None,
        }
    }

    /// Last head height announced
    pub fn last_seen(&self) -> Option<u64> {
        self.last_seen
    }

    /// Check the head once; returns a notification if it advanced
    pub async fn poll_once(&mut self) -> Result<Option<BlockNotification>, FetchError> {
        let head = with_timeout(self.rpc_timeout, self.client.head_block_number()).await?;
        if self.last_seen.is_some_and(|last| head <= last) {
            return Ok(None);
        }

        let block = with_timeout(self.rpc_timeout, self.client.block_by_number(head)).await?;
        self.last_seen = Some(head);
        Ok(Some(BlockNotification {
            number: head,
            hash: block.hash,
        }))
    }

    /// Poll until the receiving side of `sender` is dropped
    pub async fn run(mut self, sender: mpsc::Sender<BlockNotification>) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if sender.is_closed() {
                break;
            }

            match self.poll_once().await {
                Ok(Some(notification)) => {
                    debug!(block = notification.number, hash = %notification.hash, "Head advanced");
                    if sender.send(notification).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Head poll failed, retrying next tick"),
            }
        }

        info!("Block poller stopped");
    }

    /// Run the poller on its own task
    pub fn spawn(self, sender: mpsc::Sender<BlockNotification>) -> JoinHandle<()> {
        tokio::spawn(self.run(sender))
    }
}

/// Abort `poller` once `signal` resolves successfully
///
/// Aborting the poller drops its sender, which closes the notification
/// channel. If the signal cannot be installed the poller keeps running.
pub fn stop_poller_on<S>(signal: S, poller: AbortHandle) -> JoinHandle<()>
where
    S: Future<Output = std::io::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        match signal.await {
            Ok(()) => {
                info!("Shutdown signal received");
                poller.abort();
            }
            Err(e) => error!(error = %e, "Cannot listen for shutdown signal"),
        }
    })
}
