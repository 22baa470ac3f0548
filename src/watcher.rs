//! Live Chain Watcher
//!
//! Drains block notifications one at a time. For each block it fetches the
//! transaction list, then fetches, maps, validates and publishes every
//! transaction individually. A failure on one transaction never stops the
//! rest of the block, and a failed block fetch only skips that block.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::bus::BusClient;
use crate::chain::{
    quantity_to_decimal, with_timeout, BlockNotification, ChainClient, FetchError, RawChainTransaction,
    RawReceipt, DEFAULT_RPC_TIMEOUT_MS,
};
use crate::publisher::Publisher;
use crate::record::{current_timestamp, validate_row, RawRow};

/// Status written when the receipt is not fetched or reports success
pub const STATUS_SUCCESS: &str = "success";

/// Status written when the receipt reports a reverted transaction
pub const STATUS_FAILURE: &str = "failure";

/// `gas_used` written when the receipt is not fetched
pub const GAS_USED_PLACEHOLDER: &str = "0";

/// Watcher lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Not yet reading notifications
    Idle,
    /// Waiting for the next block notification
    Watching,
    /// Draining one block's transactions
    ProcessingBlock,
}

/// Configuration for the watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Bound on each RPC call
    pub rpc_timeout: Duration,
    /// Fetch receipts to fill `gas_used` and `status` instead of placeholders
    pub fetch_receipts: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: Duration::from_millis(DEFAULT_RPC_TIMEOUT_MS),
            fetch_receipts: false,
        }
    }
}

/// What happened to one block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockReport {
    /// The block detail could not be fetched; nothing else was attempted
    pub block_fetch_failed: bool,
    /// Transactions listed in the block
    pub transactions: usize,
    pub published: usize,
    pub fetch_failures: usize,
    pub invalid: usize,
    pub publish_failures: usize,
}

/// Totals since the watcher started
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatcherStats {
    pub blocks: usize,
    pub failed_blocks: usize,
    pub transactions: usize,
    pub published: usize,
    pub fetch_failures: usize,
    pub invalid: usize,
    pub publish_failures: usize,
}

impl WatcherStats {
    fn absorb(&mut self, report: &BlockReport) {
        self.blocks += 1;
        if report.block_fetch_failed {
            self.failed_blocks += 1;
        }
        self.transactions += report.transactions;
        self.published += report.published;
        self.fetch_failures += report.fetch_failures;
        self.invalid += report.invalid;
        self.publish_failures += report.publish_failures;
    }
}

enum TxOutcome {
    Published,
    FetchFailed,
    Invalid,
    PublishFailed,
}

/// Live watcher over a chain client and a connected publisher
///
/// Taking a [`Publisher`] at construction means the bus connection already
/// exists before the watcher can start.
pub struct LiveWatcher<C, B> {
    chain: Arc<C>,
    publisher: Publisher<B>,
    config: WatcherConfig,
    state: watch::Sender<WatcherState>,
    stats: WatcherStats,
}

impl<C: ChainClient, B: BusClient> LiveWatcher<C, B> {
    pub fn new(chain: Arc<C>, publisher: Publisher<B>, config: WatcherConfig) -> Self {
        Self {
            chain,
            publisher,
            config,
            state: watch::channel(WatcherState::Idle).0,
            stats: WatcherStats::default(),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> WatcherState {
        *self.state.borrow()
    }

    /// Follow state transitions from another task
    pub fn subscribe_state(&self) -> watch::Receiver<WatcherState> {
        self.state.subscribe()
    }

    /// Totals so far
    pub fn stats(&self) -> &WatcherStats {
        &self.stats
    }

    /// Process notifications in arrival order until the source closes
    ///
    /// Data-plane errors never end the loop. It returns only when every
    /// sender of `notifications` has been dropped.
    pub async fn run(&mut self, mut notifications: mpsc::Receiver<BlockNotification>) -> WatcherStats {
        self.state.send_replace(WatcherState::Watching);
        info!(topic = %self.publisher.topic(), "Watching for new blocks");

        while let Some(notification) = notifications.recv().await {
            self.state.send_replace(WatcherState::ProcessingBlock);
            let report = self.process_block(&notification).await;
            self.stats.absorb(&report);
            self.state.send_replace(WatcherState::Watching);
        }

        info!(blocks = self.stats.blocks, published = self.stats.published, "Block notification source closed");
        self.state.send_replace(WatcherState::Idle);
        self.stats.clone()
    }

    /// Fetch one block and push each of its transactions through the pipeline
    pub async fn process_block(&self, notification: &BlockNotification) -> BlockReport {
        info!(block = notification.number, hash = %notification.hash, "New block");
        let mut report = BlockReport::default();

        let block = match with_timeout(self.config.rpc_timeout, self.chain.block_by_hash(&notification.hash)).await {
            Ok(block) => block,
            Err(e) => {
                error!(block = notification.number, hash = %notification.hash, error = %e, "Failed to fetch block, skipping it");
                report.block_fetch_failed = true;
                return report;
            }
        };

        report.transactions = block.transactions.len();
        if block.transactions.is_empty() {
            info!(block = notification.number, "No transactions in block");
            return report;
        }
        info!(block = notification.number, count = report.transactions, "Transactions in block");

        for hash in &block.transactions {
            match self.process_transaction(hash).await {
                TxOutcome::Published => report.published += 1,
                TxOutcome::FetchFailed => report.fetch_failures += 1,
                TxOutcome::Invalid => report.invalid += 1,
                TxOutcome::PublishFailed => report.publish_failures += 1,
            }
        }

        info!(
            block = notification.number,
            published = report.published,
            fetch_failures = report.fetch_failures,
            invalid = report.invalid,
            publish_failures = report.publish_failures,
            "Block processed"
        );
        report
    }

    async fn process_transaction(&self, hash: &str) -> TxOutcome {
        let tx = match with_timeout(self.config.rpc_timeout, self.chain.transaction(hash)).await {
            Ok(tx) => tx,
            Err(e) => {
                warn!(tx = %hash, error = %e, "Failed to fetch transaction");
                return TxOutcome::FetchFailed;
            }
        };

        let receipt = if self.config.fetch_receipts {
            match with_timeout(self.config.rpc_timeout, self.chain.receipt(hash)).await {
                Ok(receipt) => Some(receipt),
                Err(e) => {
                    warn!(tx = %hash, error = %e, "Receipt unavailable, keeping placeholder gas_used and status");
                    None
                }
            }
        } else {
            None
        };

        let record = match map_transaction(&tx, receipt.as_ref(), &current_timestamp())
            .map_err(|e| e.to_string())
            .and_then(|row| validate_row(&row).map_err(|e| e.to_string()))
        {
            Ok(record) => record,
            Err(reason) => {
                warn!(tx = %hash, error = %reason, "Dropping transaction that does not fit the record schema");
                return TxOutcome::Invalid;
            }
        };

        match self.publisher.publish_one(&record).await {
            Ok(()) => TxOutcome::Published,
            Err(e) => {
                error!(tx = %hash, error = %e, "Failed to publish transaction");
                TxOutcome::PublishFailed
            }
        }
    }
}

/// Project a node transaction onto the canonical field names
///
/// Hex quantities become decimal strings. Fields the node did not provide are
/// left out so validation rejects the row. Without a receipt `gas_used` is
/// `"0"` and `status` is `"success"`. `timestamp` is the local observation
/// time, not the block time.
pub fn map_transaction(
    tx: &RawChainTransaction,
    receipt: Option<&RawReceipt>,
    observed_at: &str,
) -> Result<RawRow, FetchError> {
    let mut row = RawRow::new();
    let mut put = |field: &str, value: String| {
        row.insert(field.to_string(), Value::String(value));
    };

    put("timestamp", observed_at.to_string());
    put("from", tx.from.clone());
    if let Some(to) = &tx.to {
        put("to", to.clone());
    }
    if let Some(block_number) = &tx.block_number {
        put("block_number", quantity_to_decimal(block_number)?);
    }
    if let Some(index) = &tx.transaction_index {
        put("tx_index", quantity_to_decimal(index)?);
    }
    put("value", quantity_to_decimal(&tx.value)?);
    put("gas_limit", quantity_to_decimal(&tx.gas)?);
    if let Some(price) = tx.gas_price.as_ref().or(tx.max_fee_per_gas.as_ref()) {
        put("gas_price", quantity_to_decimal(price)?);
    }

    match receipt {
        Some(receipt) => {
            put("gas_used", quantity_to_decimal(&receipt.gas_used)?);
            put("status", receipt_status(receipt).to_string());
        }
        None => {
            put("gas_used", GAS_USED_PLACEHOLDER.to_string());
            put("status", STATUS_SUCCESS.to_string());
        }
    }

    Ok(row)
}

fn receipt_status(receipt: &RawReceipt) -> &'static str {
    match receipt.status.as_deref() {
        Some("0x0") => STATUS_FAILURE,
        _ => STATUS_SUCCESS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_tx() -> RawChainTransaction {
        RawChainTransaction {
            hash: "0x9fc76417374aa880d4449a1f7f31ec597f00b1f6f3dd2d66f4c9c6c445836d8b".to_string(),
            block_hash: Some("0x01".to_string()),
            block_number: Some("0x280de80".to_string()),
            transaction_index: Some("0x3".to_string()),
            from: "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".to_string(),
            to: Some("0x7a250d5630b4cf539739df2c5dacb4c659f2488d".to_string()),
            value: "0xde0b6b3a7640000".to_string(),
            gas: "0x5208".to_string(),
            gas_price: Some("0x5d21dba00".to_string()),
            nonce: Some("0x7".to_string()),
            ..Default::default()
        }
    }

    const OBSERVED: &str = "2024-03-01T12:00:00.000Z";

    #[test]
    fn test_map_transaction_projects_canonical_fields() {
        let row = map_transaction(&raw_tx(), None, OBSERVED).unwrap();
        let record = validate_row(&row).unwrap();

        assert_eq!(record.timestamp, OBSERVED);
        assert_eq!(record.block_number, "42000000");
        assert_eq!(record.tx_index, "3");
        assert_eq!(record.value, "1000000000000000000");
        assert_eq!(record.gas_limit, "21000");
        assert_eq!(record.gas_price, "25000000000");
        assert_eq!(record.from, "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266");
        assert_eq!(record.to, "0x7a250d5630b4cf539739df2c5dacb4c659f2488d");
    }

    #[test]
    fn test_map_transaction_uses_placeholders_without_receipt() {
        let row = map_transaction(&raw_tx(), None, OBSERVED).unwrap();
        assert_eq!(row["gas_used"], Value::String("0".into()));
        assert_eq!(row["status"], Value::String("success".into()));
    }

    #[test]
    fn test_map_transaction_discards_unused_fields() {
        let row = map_transaction(&raw_tx(), None, OBSERVED).unwrap();
        assert_eq!(row.len(), 10);
        assert!(!row.contains_key("nonce"));
        assert!(!row.contains_key("hash"));
    }

    #[test]
    fn test_map_transaction_with_receipt() {
        let receipt = RawReceipt {
            transaction_hash: raw_tx().hash,
            gas_used: "0x4e20".to_string(),
            status: Some("0x0".to_string()),
        };
        let row = map_transaction(&raw_tx(), Some(&receipt), OBSERVED).unwrap();
        assert_eq!(row["gas_used"], Value::String("20000".into()));
        assert_eq!(row["status"], Value::String("failure".into()));
    }

    #[test]
    fn test_receipt_without_status_counts_as_success() {
        let receipt = RawReceipt {
            transaction_hash: "0x1".to_string(),
            gas_used: "0x5208".to_string(),
            status: None,
        };
        assert_eq!(receipt_status(&receipt), STATUS_SUCCESS);
    }

    #[test]
    fn test_dynamic_fee_transaction_falls_back_to_max_fee() {
        let tx = RawChainTransaction {
            gas_price: None,
            max_fee_per_gas: Some("0x6fc23ac00".to_string()),
            ..raw_tx()
        };
        let row = map_transaction(&tx, None, OBSERVED).unwrap();
        assert_eq!(row["gas_price"], Value::String("30000000000".into()));
    }

    #[test]
    fn test_contract_creation_fails_validation() {
        let tx = RawChainTransaction { to: None, ..raw_tx() };
        let row = map_transaction(&tx, None, OBSERVED).unwrap();
        let err = validate_row(&row).unwrap_err();
        assert_eq!(err.fields(), vec!["to"]);
    }

    #[test]
    fn test_pending_transaction_fails_validation() {
        let tx = RawChainTransaction {
            block_number: None,
            transaction_index: None,
            ..raw_tx()
        };
        let row = map_transaction(&tx, None, OBSERVED).unwrap();
        let err = validate_row(&row).unwrap_err();
        assert_eq!(err.fields(), vec!["block_number", "tx_index"]);
    }

    #[test]
    fn test_malformed_quantity_is_a_mapping_error() {
        let tx = RawChainTransaction {
            value: "lots".to_string(),
            ..raw_tx()
        };
        assert!(matches!(map_transaction(&tx, None, OBSERVED), Err(FetchError::Malformed(_))));
    }

    #[test]
    fn test_watcher_config_default() {
        let config = WatcherConfig::default();
        assert!(!config.fetch_receipts);
        assert_eq!(config.rpc_timeout, Duration::from_millis(DEFAULT_RPC_TIMEOUT_MS));
    }
}
