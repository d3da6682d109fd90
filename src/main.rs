// src/main.rs

//! # DID Lifecycle Engine - Main Entry Point
//!
//! Starts the HTTP API in development mode, backed by the in-process
//! ledger.
//!
//! ## Configuration
//! Read from `did-lifecycle.toml` and `DID_`-prefixed environment variables
//! (a `.env` file is loaded first), e.g.:
//! - `DID_API__LISTEN`: listen address (default `127.0.0.1:3000`)
//! - `DID_CONFIRMATION_TIMEOUT_SECS`: finality budget per transaction
//! - `DID_LOCAL_LEDGER__BLOCK_TIME_MS`: block time of the local ledger
//! - `RUST_LOG`: log filter, `info` by default

use anyhow::Context;
use did_lifecycle::services::api_server::ApiServer;
use did_lifecycle::{DidFactory, LocalLedger, Settings};
use dotenv::dotenv;
use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::load().context("failed to load configuration")?;
    let addr: SocketAddr = settings
        .api
        .listen
        .parse()
        .with_context(|| format!("invalid listen address '{}'", settings.api.listen))?;

    let ledger = LocalLedger::from_settings(&settings.local_ledger, settings.status_channel_capacity);
    info!(
        "using local ledger (block time {} ms, confirmation timeout {} s)",
        settings.local_ledger.block_time_ms, settings.confirmation_timeout_secs
    );

    let factory = Arc::new(DidFactory::new(settings, Arc::new(ledger)));
    let api_server = ApiServer::new(factory.clone());

    info!("Available endpoints:");
    for route in [
        "POST   /create-did",
        "GET    /resolve-did/:did",
        "GET    /did-exists/:did",
        "POST   /register-did",
        "GET    /dids/:did",
        "PUT    /dids/:did",
        "POST   /dids/:did/verification-methods",
        "DELETE /dids/:did/verification-methods/:fragment",
        "POST   /dids/:did/services",
        "DELETE /dids/:did/services/:fragment",
        "POST   /key-agreement-keys",
    ] {
        info!("- {route}");
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for shutdown signal: {e}");
        }
        info!("shutdown requested");
    };
    api_server.run(addr, shutdown).await.context("API server failed")?;
    factory
        .disconnect()
        .await
        .context("failed to disconnect from the ledger")?;
    Ok(())
}
