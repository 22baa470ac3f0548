//! Live Infrastructure Integration Tests
//!
//! These tests require Redis at localhost:6379 and, for the chain section, a
//! JSON-RPC node at http://127.0.0.1:8545 (e.g. Anvil).
//! They are marked with #[ignore] by default for CI environments.
//!
//! To run these tests:
//! 1. Start Redis: `docker run -d -p 6379:6379 redis:alpine`
//! 2. Start a node: `anvil`
//! 3. Run tests: `cargo test --test redis_integration -- --ignored`

use std::sync::Arc;
use std::time::Duration;

use chain_tx_pipeline::chain::with_timeout;
use chain_tx_pipeline::{
    validate_row, BusClient, BusConfig, ChainClient, ChainConfig, PublishPolicy, Publisher, RawRow, RedisBus,
    RpcChainClient, TransactionRecord,
};

const REDIS_URL: &str = "redis://127.0.0.1:6379";
const NODE_URL: &str = "http://127.0.0.1:8545";

async fn raw_connection() -> redis::aio::MultiplexedConnection {
    let client = redis::Client::open(REDIS_URL).unwrap();
    client.get_multiplexed_async_connection().await.unwrap()
}

/// Fresh stream key per test run
async fn fresh_topic(name: &str) -> String {
    let topic = format!("it-{}-{}", name, std::process::id());
    let mut conn = raw_connection().await;
    let _: usize = redis::cmd("DEL").arg(&topic).query_async(&mut conn).await.unwrap();
    topic
}

/// Payloads currently in the stream, oldest first
async fn stream_payloads(topic: &str) -> Vec<String> {
    let mut conn = raw_connection().await;
    let entries: Vec<(String, Vec<String>)> = redis::cmd("XRANGE")
        .arg(topic)
        .arg("-")
        .arg("+")
        .query_async(&mut conn)
        .await
        .unwrap();
    entries
        .into_iter()
        .map(|(_, fields)| {
            assert_eq!(fields[0], "value");
            fields[1].clone()
        })
        .collect()
}

fn record(index: usize) -> TransactionRecord {
    let row: RawRow = serde_json::from_value(serde_json::json!({
        "timestamp": "2024-03-01T12:00:00.000Z",
        "status": "success",
        "block_number": "42000000",
        "tx_index": index.to_string(),
        "from": "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266",
        "to": "0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D",
        "value": "1000000000000000000",
        "gas_limit": "21000",
        "gas_used": "21000",
        "gas_price": "25000000000"
    }))
    .unwrap();
    validate_row(&row).unwrap()
}

// ==================== Redis Bus Tests ====================

#[tokio::test]
#[ignore = "Requires running Redis at localhost:6379"]
async fn test_connect_to_redis() {
    let result = RedisBus::connect(&BusConfig::with_url(REDIS_URL)).await;
    assert!(result.is_ok(), "Failed to connect: {:?}", result.err());
}

#[tokio::test]
#[ignore = "Requires running Redis at localhost:6379"]
async fn test_send_appends_stream_entry() {
    let topic = fresh_topic("send").await;
    let bus = RedisBus::connect(&BusConfig::with_url(REDIS_URL)).await.unwrap();

    bus.send(&topic, "{\"hello\":1}".to_string()).await.unwrap();

    assert_eq!(stream_payloads(&topic).await, vec!["{\"hello\":1}".to_string()]);
}

#[tokio::test]
#[ignore = "Requires running Redis at localhost:6379"]
async fn test_publish_batch_keeps_order_across_chunks() {
    let topic = fresh_topic("batch").await;
    let bus = Arc::new(RedisBus::connect(&BusConfig::with_url(REDIS_URL)).await.unwrap());
    let policy = PublishPolicy {
        chunk_size: 3,
        chunk_delay: Duration::from_millis(10),
        write_timeout: Duration::from_secs(5),
    };
    let publisher = Publisher::new(bus, topic.clone(), policy);
    let records: Vec<TransactionRecord> = (0..7).map(record).collect();

    let report = publisher.publish_batch(&records).await.unwrap();
    assert_eq!(report.chunks, 3);

    let stored: Vec<TransactionRecord> = stream_payloads(&topic)
        .await
        .iter()
        .map(|p| TransactionRecord::from_json(p).unwrap())
        .collect();
    assert_eq!(stored, records);
}

#[tokio::test]
#[ignore = "Requires running Redis at localhost:6379"]
async fn test_connect_to_closed_port_fails() {
    let result = RedisBus::connect(&BusConfig::with_url("redis://127.0.0.1:1")).await;
    assert!(result.is_err());
}

// ==================== Chain Node Tests ====================

#[tokio::test]
#[ignore = "Requires a JSON-RPC node at 127.0.0.1:8545"]
async fn test_head_block_and_block_lookup() {
    let config = ChainConfig::with_url(NODE_URL);
    let client = RpcChainClient::connect(&config).await.unwrap();

    let head = with_timeout(config.rpc_timeout(), client.head_block_number()).await.unwrap();
    let by_number = client.block_by_number(head).await.unwrap();
    let by_hash = client.block_by_hash(&by_number.hash).await.unwrap();

    assert_eq!(by_number, by_hash);
}

#[tokio::test]
#[ignore = "Requires a JSON-RPC node at 127.0.0.1:8545"]
async fn test_unknown_transaction_is_not_found() {
    let client = RpcChainClient::connect(&ChainConfig::with_url(NODE_URL)).await.unwrap();
    let missing = format!("0x{}", "ab".repeat(32));

    let result = client.transaction(&missing).await;

    assert!(matches!(result, Err(chain_tx_pipeline::FetchError::NotFound(_))));
}
