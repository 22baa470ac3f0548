//! Live ingestion: watch new blocks and publish their transactions

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use chain_tx_pipeline::chain::{stop_poller_on, with_timeout, NOTIFICATION_BUFFER};
use chain_tx_pipeline::config::{BusArgs, ChainArgs};
use chain_tx_pipeline::logging::init_tracing;
use chain_tx_pipeline::{BlockPoller, ChainClient, LiveWatcher, Publisher, RedisBus, RpcChainClient};

#[derive(Parser, Debug)]
#[command(name = "ingest-live", version, about = "Publish transactions of new blocks to the bus")]
struct Cli {
    #[command(flatten)]
    chain: ChainArgs,

    #[command(flatten)]
    bus: BusArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    let bus = RedisBus::connect(&cli.bus.bus_config())
        .await
        .context("Failed to connect to the bus")?;
    let publisher = Publisher::new(Arc::new(bus), cli.bus.topic.clone(), cli.bus.publish_policy());

    let chain_config = cli.chain.chain_config();
    let chain = Arc::new(
        RpcChainClient::connect(&chain_config)
            .await
            .context("Failed to connect to the chain node")?,
    );
    let head = with_timeout(chain_config.rpc_timeout(), chain.head_block_number())
        .await
        .context("Chain node did not answer a head block query")?;
    info!(head, "Chain node reachable");

    let (sender, receiver) = mpsc::channel(NOTIFICATION_BUFFER);
    let poller = BlockPoller::new(chain.clone(), &chain_config).spawn(sender);

    stop_poller_on(tokio::signal::ctrl_c(), poller.abort_handle());

    // Aborting the poller drops the sender; the watcher drains what is queued and returns.
    let mut watcher = LiveWatcher::new(chain, publisher, cli.chain.watcher_config());
    let stats = watcher.run(receiver).await;

    info!(
        blocks = stats.blocks,
        failed_blocks = stats.failed_blocks,
        transactions = stats.transactions,
        published = stats.published,
        fetch_failures = stats.fetch_failures,
        invalid = stats.invalid,
        publish_failures = stats.publish_failures,
        "Watcher stopped"
    );
    Ok(())
}
