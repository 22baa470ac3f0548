//! Message Bus Client
//!
//! Redis Streams serve as the topic-based bus: each topic is a stream key and
//! each record is one entry whose `value` field holds the JSON payload.
//! No message key is assigned, so consumers only get arrival order per topic.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::info;

/// Default bus URL, for local development only
pub const DEFAULT_BUS_URL: &str = "redis://localhost:6379";

/// Default topic carrying canonical transaction records
pub const DEFAULT_TOPIC: &str = "ch-crypto-transactions";

/// Stream entry field holding the JSON payload
pub const PAYLOAD_FIELD: &str = "value";

/// Connection timeout in milliseconds
pub const CONNECT_TIMEOUT_MS: u64 = 5000;

/// Errors that can occur talking to the bus
#[derive(Error, Debug)]
pub enum BusError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Bus call timed out after {0}ms")]
    Timeout(u64),

    /// The bus answered but did not accept every payload
    #[error("Bus rejected write: {0}")]
    Rejected(String),
}

/// Configuration for the bus connection
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Broker URL
    pub url: String,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_BUS_URL.to_string(),
            connect_timeout_ms: CONNECT_TIMEOUT_MS,
        }
    }
}

impl BusConfig {
    /// Create a config for the given broker URL
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// A client able to write payloads to a bus topic
///
/// Implementations are shared read-only between tasks; they hold no
/// per-record state.
#[async_trait]
pub trait BusClient: Send + Sync {
    /// Write one payload to `topic`
    async fn send(&self, topic: &str, payload: String) -> Result<(), BusError>;

    /// Write an ordered list of payloads to `topic` as a single call
    async fn send_batch(&self, topic: &str, payloads: Vec<String>) -> Result<(), BusError>;
}

/// Redis-backed bus client
#[derive(Clone)]
pub struct RedisBus {
    connection: MultiplexedConnection,
}

impl RedisBus {
    /// Wrap an established multiplexed connection
    pub fn new(connection: MultiplexedConnection) -> Self {
        Self { connection }
    }

    /// Open a connection and confirm it with a PING
    ///
    /// Fails if the broker is unreachable or does not answer within the
    /// configured timeout.
    pub async fn connect(config: &BusConfig) -> Result<Self, BusError> {
        info!(url = %config.url, "Connecting to bus");

        let client = redis::Client::open(config.url.as_str())?;
        let establish = async {
            let mut connection = client.get_multiplexed_async_connection().await?;
            let _: String = redis::cmd("PING").query_async(&mut connection).await?;
            Ok::<_, redis::RedisError>(connection)
        };

        let connection = timeout(Duration::from_millis(config.connect_timeout_ms), establish)
            .await
            .map_err(|_| BusError::Timeout(config.connect_timeout_ms))??;

        info!("Bus connection established");
        Ok(Self::new(connection))
    }
}

#[async_trait]
impl BusClient for RedisBus {
    async fn send(&self, topic: &str, payload: String) -> Result<(), BusError> {
        let mut connection = self.connection.clone();
        let _id: String = redis::cmd("XADD")
            .arg(topic)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(payload)
            .query_async(&mut connection)
            .await?;
        Ok(())
    }

    async fn send_batch(&self, topic: &str, payloads: Vec<String>) -> Result<(), BusError> {
        if payloads.is_empty() {
            return Ok(());
        }

        // MULTI/EXEC keeps the chunk all-or-nothing and in order.
        let mut pipe = redis::pipe();
        pipe.atomic();
        for payload in &payloads {
            pipe.cmd("XADD").arg(topic).arg("*").arg(PAYLOAD_FIELD).arg(payload);
        }

        let mut connection = self.connection.clone();
        let ids: Vec<String> = pipe.query_async(&mut connection).await?;
        check_entry_ids(payloads.len(), &ids)
    }
}

/// A chunk counts as written only if every XADD returned an entry id
fn check_entry_ids(expected: usize, ids: &[String]) -> Result<(), BusError> {
    if ids.len() != expected {
        return Err(BusError::Rejected(format!(
            "{} of {} entries appended",
            ids.len(),
            expected
        )));
    }
    Ok(())
}
