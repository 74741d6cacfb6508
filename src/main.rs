//! Rescue proxy service binary
//!
//! Warms the fee-recipient oracle from chain, serves the read API over HTTP,
//! and shuts down gracefully on Ctrl+C.

use anyhow::{Context, Result};
use clap::Parser;
use rescue_proxy::{Config, ElClient, Oracle};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber;

/// Rocket Pool validator fee-recipient oracle
#[derive(Parser)]
#[command(name = "rescue-proxy")]
#[command(about = "Serve acceptable fee recipients for Rocket Pool validators")]
struct Args {
    /// Execution client endpoint (websocket or IPC; must support subscriptions)
    #[arg(short, long, default_value = "ws://127.0.0.1:8546")]
    ec_url: String,

    /// Rocket storage contract address
    #[arg(short, long)]
    rocket_storage: String,

    /// Address to serve the HTTP API on
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    listen: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let args = Args::parse();

    let config = Config::new(&args.ec_url, &args.rocket_storage)?;

    info!("Starting rescue proxy");
    info!("Execution client: {}", config.ec_url);
    info!("Rocket storage: {}", config.rocket_storage);

    let chain = Arc::new(
        ElClient::connect(&config)
            .await
            .context("Failed to connect to the execution client")?,
    );

    // Builds the full cache before the API comes up; queries never see a
    // partially loaded oracle.
    let oracle = Oracle::init(chain)
        .await
        .context("Failed to initialize the fee-recipient oracle")?;

    let app = rescue_proxy::server::router(oracle.clone());
    let listener = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("Failed to bind API listener on {}", args.listen))?;
    info!("Serving API on {}", args.listen);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result.context("API server error")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    oracle.deinit().await;
    info!("Rescue proxy stopped");
    Ok(())
}
