//! Chain Transaction Pipeline Library
//!
//! This crate provides components for ingesting blockchain transactions from a
//! CSV export or a live chain node, validating them into a canonical record,
//! publishing them to a topic on the bus, and serving address lookups over
//! the analytical store.

pub mod api;
pub mod bus;
pub mod chain;
pub mod config;
pub mod logging;
pub mod publisher;
pub mod query;
pub mod record;
pub mod source;
pub mod store;
pub mod watcher;

// Re-export commonly used types
pub use bus::{BusClient, BusConfig, BusError, RedisBus};
pub use chain::{BlockNotification, BlockPoller, ChainClient, ChainConfig, FetchError, RpcChainClient};
pub use publisher::{BatchPublishError, PublishPolicy, PublishReport, Publisher};
pub use record::{validate_row, RawRow, TransactionRecord, ValidationError};
pub use source::{run_file_ingest, IngestError, IngestReport};
pub use store::{ClickHouseStore, StoreConfig, StoreError, ViewStore};
pub use watcher::{map_transaction, LiveWatcher, WatcherConfig, WatcherState, WatcherStats};
