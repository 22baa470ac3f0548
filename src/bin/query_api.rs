//! Read API over the directional transaction views

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use chain_tx_pipeline::api::{router, DEFAULT_LISTEN_ADDR};
use chain_tx_pipeline::config::StoreArgs;
use chain_tx_pipeline::logging::init_tracing;
use chain_tx_pipeline::ClickHouseStore;

#[derive(Parser, Debug)]
#[command(name = "query-api", version, about = "Serve address lookups over stored transactions")]
struct Cli {
    /// Address to listen on
    #[arg(long = "listen", env = "API_LISTEN", default_value = DEFAULT_LISTEN_ADDR)]
    listen: String,

    #[command(flatten)]
    store: StoreArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    let store = ClickHouseStore::new(cli.store.store_config()).context("Failed to build the storage client")?;
    let app = router(Arc::new(store));

    let listener = TcpListener::bind(&cli.listen)
        .await
        .with_context(|| format!("Failed to bind {}", cli.listen))?;
    info!(addr = %cli.listen, storage = %cli.store.storage_url, "Query API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    Ok(())
}
