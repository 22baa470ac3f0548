//! One-shot CSV ingestion: read, validate, publish in paced chunks

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use chain_tx_pipeline::config::{BusArgs, SourceArgs};
use chain_tx_pipeline::logging::init_tracing;
use chain_tx_pipeline::{run_file_ingest, IngestError, Publisher, RedisBus};

#[derive(Parser, Debug)]
#[command(name = "ingest-file", version, about = "Publish a CSV export of transactions to the bus")]
struct Cli {
    #[command(flatten)]
    source: SourceArgs,

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

    match run_file_ingest(&cli.source.input, &publisher).await {
        Ok(report) => {
            info!(
                rows = report.rows,
                valid = report.valid,
                skipped = report.skipped,
                published = report.published,
                chunks = report.chunks,
                topic = %cli.bus.topic,
                "Ingestion complete"
            );
            Ok(())
        }
        Err(IngestError::Publish(e)) => {
            error!(
                chunk = e.failed_chunk,
                total_chunks = e.total_chunks,
                records_sent = e.records_sent,
                error = %e.source,
                "Batch publish failed"
            );
            Err(e.into())
        }
        Err(e) => Err(anyhow::Error::new(e).context("Failed to read the source")),
    }
}
