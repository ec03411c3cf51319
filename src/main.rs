//! Transaction dispatcher - concurrent EVM submission for a fixed account pool
//!
//! Serves a small HTTP API that a load harness hits with many simultaneous
//! requests per account. Each request is signed by one of the configured
//! accounts, given a locally allocated nonce, and retried when the chain
//! reports a nonce conflict or an underpriced replacement.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

mod accounts;
mod api;
mod chain;
mod config;
mod error;
mod metrics;
mod tx;

use accounts::AccountRegistry;
use chain::{ChainClient, EthersChainClient};
use config::Settings;
use metrics::MetricsServer;
use tx::{Dispatcher, NonceAllocator};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting transaction dispatcher v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for chain {} with {} accounts",
        settings.chain.name,
        settings.accounts.len()
    );

    let accounts = Arc::new(AccountRegistry::from_config(
        &settings.accounts,
        settings.chain.chain_id,
    )?);

    let chain: Arc<dyn ChainClient> = Arc::new(EthersChainClient::new(
        settings.chain.clone(),
        accounts.wallets(),
    )?);
    info!("Chain client initialized");

    let allocator = Arc::new(NonceAllocator::new(Arc::clone(&chain)));
    let dispatcher = Arc::new(Dispatcher::new(
        chain,
        allocator,
        accounts,
        settings.dispatcher.clone(),
    ));

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let dispatcher = dispatcher.clone();
        async move {
            if let Err(e) = api::run_server(config, dispatcher).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Surface a misconfigured endpoint early; allocation still seeds lazily
    match dispatcher.nonce_status().await {
        Ok(status) => {
            for account in status {
                info!(
                    "Account {} ({:?}) pending nonce {}",
                    account.id, account.address, account.network_nonce
                );
            }
        }
        Err(e) => warn!("Initial nonce check failed: {}", e),
    }

    info!("Transaction dispatcher is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    api_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Transaction dispatcher stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tx_dispatcher=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
