//! Record Publisher
//!
//! Publishes canonical transaction records to a bus topic, either as paced
//! fixed-size chunks (file path) or one record per write (live path).
//!
//! Pacing is a fixed delay between chunks. It does not look at bus latency or
//! queue depth.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info};

use crate::bus::{BusClient, BusError};
use crate::record::TransactionRecord;

/// Default number of records per bus write
pub const DEFAULT_CHUNK_SIZE: usize = 2000;

/// Default pause between two chunk writes
pub const DEFAULT_CHUNK_DELAY_MS: u64 = 100;

/// Default bound on a single bus write
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 10000;

/// A chunk write failed; the remaining chunks were not attempted
#[derive(Error, Debug)]
#[error("chunk {failed_chunk}/{total_chunks} failed after {chunks_sent} chunk(s) were published: {source}")]
pub struct BatchPublishError {
    /// 1-based index of the chunk that failed
    pub failed_chunk: usize,
    pub total_chunks: usize,
    /// Chunks published before the failure
    pub chunks_sent: usize,
    /// Records published before the failure
    pub records_sent: usize,
    pub source: BusError,
}

/// Chunking and pacing policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPolicy {
    /// Maximum records per bus write, at least 1
    pub chunk_size: usize,
    /// Pause after a chunk before the next one is issued
    pub chunk_delay: Duration,
    /// Bound on each bus write
    pub write_timeout: Duration,
}

impl Default for PublishPolicy {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay: Duration::from_millis(DEFAULT_CHUNK_DELAY_MS),
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
        }
    }
}

impl PublishPolicy {
    /// Effective chunk size (a zero size is treated as 1)
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }

    /// Number of bus writes needed for `records` records
    pub fn chunk_count(&self, records: usize) -> usize {
        records.div_ceil(self.effective_chunk_size())
    }
}

/// Outcome of a completed batch publish
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub chunks: usize,
    pub records: usize,
}

/// Publisher bound to one bus client and one topic
pub struct Publisher<B> {
    bus: Arc<B>,
    topic: String,
    policy: PublishPolicy,
}

impl<B: BusClient> Publisher<B> {
    /// Create a new publisher
    ///
    /// # Arguments
    /// * `bus` - A connected bus client, shared with other components
    /// * `topic` - The topic every record is written to
    /// * `policy` - Chunking and pacing policy
    pub fn new(bus: Arc<B>, topic: impl Into<String>, policy: PublishPolicy) -> Self {
        Self {
            bus,
            topic: topic.into(),
            policy,
        }
    }

    /// Get the topic name
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Get the policy
    pub fn policy(&self) -> &PublishPolicy {
        &self.policy
    }

    /// Publish records in order, one bus write per chunk
    ///
    /// Chunk N is issued only after chunk N-1 completed and the pacing delay
    /// elapsed. The first failing chunk stops the run; nothing is retried and
    /// nothing records which chunks already went out.
    pub async fn publish_batch(
        &self,
        records: &[TransactionRecord],
    ) -> Result<PublishReport, BatchPublishError> {
        let total_chunks = self.policy.chunk_count(records.len());
        info!(
            topic = %self.topic,
            records = records.len(),
            chunks = total_chunks,
            "Start sending records in chunks"
        );

        let mut report = PublishReport::default();
        for (index, chunk) in records.chunks(self.policy.effective_chunk_size()).enumerate() {
            let written = match encode_chunk(chunk) {
                Ok(payloads) => self.write_batch(payloads).await,
                Err(e) => Err(e),
            };

            if let Err(source) = written {
                error!(
                    chunk = index + 1,
                    total_chunks,
                    chunks_sent = report.chunks,
                    error = %source,
                    "Chunk write failed, aborting remaining chunks"
                );
                return Err(BatchPublishError {
                    failed_chunk: index + 1,
                    total_chunks,
                    chunks_sent: report.chunks,
                    records_sent: report.records,
                    source,
                });
            }

            report.chunks += 1;
            report.records += chunk.len();
            debug!(chunk = index + 1, total_chunks, size = chunk.len(), "Chunk published");

            if report.chunks < total_chunks {
                sleep(self.policy.chunk_delay).await;
            }
        }

        info!(topic = %self.topic, records = report.records, chunks = report.chunks, "All records have been sent");
        Ok(report)
    }

    /// Publish a single record as its own bus write
    pub async fn publish_one(&self, record: &TransactionRecord) -> Result<(), BusError> {
        let payload = record.to_json()?;
        let limit = self.policy.write_timeout;
        timeout(limit, self.bus.send(&self.topic, payload))
            .await
            .map_err(|_| BusError::Timeout(limit.as_millis() as u64))?
    }

    async fn write_batch(&self, payloads: Vec<String>) -> Result<(), BusError> {
        let limit = self.policy.write_timeout;
        timeout(limit, self.bus.send_batch(&self.topic, payloads))
            .await
            .map_err(|_| BusError::Timeout(limit.as_millis() as u64))?
    }
}

fn encode_chunk(chunk: &[TransactionRecord]) -> Result<Vec<String>, BusError> {
    chunk
        .iter()
        .map(|record| record.to_json().map_err(BusError::from))
        .collect()
}
