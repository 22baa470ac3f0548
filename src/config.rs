//! Command-line and environment configuration shared by the binaries
//!
//! Every flag can also be set from the environment (or a `.env` file loaded
//! by the binary before parsing).

use clap::builder::BoolishValueParser;
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

use crate::bus::{BusConfig, CONNECT_TIMEOUT_MS, DEFAULT_BUS_URL, DEFAULT_TOPIC};
use crate::chain::{ChainConfig, DEFAULT_POLL_INTERVAL_MS, DEFAULT_RPC_TIMEOUT_MS, DEFAULT_RPC_URL};
use crate::publisher::{PublishPolicy, DEFAULT_CHUNK_DELAY_MS, DEFAULT_CHUNK_SIZE, DEFAULT_WRITE_TIMEOUT_MS};
use crate::source::DEFAULT_INPUT_PATH;
use crate::store::{StoreConfig, DEFAULT_DATABASE, DEFAULT_QUERY_TIMEOUT_MS, DEFAULT_STORAGE_URL};
use crate::watcher::WatcherConfig;

/// Bus connection and publishing
#[derive(Args, Debug, Clone)]
pub struct BusArgs {
    /// Broker URL
    #[arg(long = "bus-url", env = "BUS_URL", default_value = DEFAULT_BUS_URL)]
    pub bus_url: String,

    /// Topic receiving transaction records
    #[arg(long = "topic", env = "BUS_TOPIC", default_value = DEFAULT_TOPIC)]
    pub topic: String,

    /// Records per chunk for batch publishing
    #[arg(long = "chunk-size", env = "PUBLISH_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Pause between consecutive chunks
    #[arg(long = "chunk-delay-ms", env = "PUBLISH_CHUNK_DELAY_MS", default_value_t = DEFAULT_CHUNK_DELAY_MS)]
    pub chunk_delay_ms: u64,

    /// Timeout for a single bus write
    #[arg(long = "publish-timeout-ms", env = "PUBLISH_TIMEOUT_MS", default_value_t = DEFAULT_WRITE_TIMEOUT_MS)]
    pub publish_timeout_ms: u64,
}

impl BusArgs {
    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            url: self.bus_url.clone(),
            connect_timeout_ms: CONNECT_TIMEOUT_MS,
        }
    }

    pub fn publish_policy(&self) -> PublishPolicy {
        PublishPolicy {
            chunk_size: self.chunk_size,
            chunk_delay: Duration::from_millis(self.chunk_delay_ms),
            write_timeout: Duration::from_millis(self.publish_timeout_ms),
        }
    }
}

/// CSV source location
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// CSV export with a header row
    #[arg(long = "input", env = "INPUT_PATH", default_value = DEFAULT_INPUT_PATH)]
    pub input: PathBuf,
}

/// Chain node access
#[derive(Args, Debug, Clone)]
pub struct ChainArgs {
    /// Node endpoint (http, ws or ipc)
    #[arg(long = "rpc-url", env = "CHAIN_RPC_URL", default_value = DEFAULT_RPC_URL)]
    pub rpc_url: String,

    /// How often the head block is polled
    #[arg(long = "poll-interval-ms", env = "BLOCK_POLL_INTERVAL_MS", default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,

    /// Timeout for a single RPC call
    #[arg(long = "rpc-timeout-ms", env = "RPC_TIMEOUT_MS", default_value_t = DEFAULT_RPC_TIMEOUT_MS)]
    pub rpc_timeout_ms: u64,

    /// Fetch receipts to fill in gas used and status (env accepts 1/0, yes/no, on/off, true/false)
    #[arg(long = "fetch-receipts", env = "FETCH_RECEIPTS", value_parser = BoolishValueParser::new())]
    pub fetch_receipts: bool,
}

impl ChainArgs {
    pub fn chain_config(&self) -> ChainConfig {
        ChainConfig {
            rpc_url: self.rpc_url.clone(),
            rpc_timeout_ms: self.rpc_timeout_ms,
            poll_interval_ms: self.poll_interval_ms,
        }
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            rpc_timeout: Duration::from_millis(self.rpc_timeout_ms),
            fetch_receipts: self.fetch_receipts,
        }
    }
}

/// Analytical store access
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// ClickHouse HTTP endpoint
    #[arg(long = "storage-url", env = "STORAGE_URL", default_value = DEFAULT_STORAGE_URL)]
    pub storage_url: String,

    #[arg(long = "storage-database", env = "STORAGE_DATABASE", default_value = DEFAULT_DATABASE)]
    pub storage_database: String,

    #[arg(long = "storage-user", env = "STORAGE_USER")]
    pub storage_user: Option<String>,

    #[arg(long = "storage-password", env = "STORAGE_PASSWORD", hide_env_values = true)]
    pub storage_password: Option<String>,

    /// Timeout for a single storage query
    #[arg(long = "storage-timeout-ms", env = "STORAGE_TIMEOUT_MS", default_value_t = DEFAULT_QUERY_TIMEOUT_MS)]
    pub storage_timeout_ms: u64,
}

impl StoreArgs {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            url: self.storage_url.clone(),
            database: self.storage_database.clone(),
            user: self.storage_user.clone(),
            password: self.storage_password.clone(),
            timeout_ms: self.storage_timeout_ms,
        }
    }
}
