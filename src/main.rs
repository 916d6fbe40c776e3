//! Launch Sniper - DEX pair launch detection with multi-endpoint broadcast
//!
//! Watches a factory for PairCreated events against the base asset and races a
//! signed buy transaction across every configured RPC endpoint.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

mod chain;
mod config;
mod error;
mod events;
mod metrics;
mod snipe;
mod tx;

use chain::{ChainProvider, ChainReader, ConfirmationWatcher, EndpointPool, PairListener};
use config::Settings;
use metrics::MetricsServer;
use snipe::{EngineConfig, SnipeEngine};
use tx::{BroadcastCoordinator, BuyTxBuilder, NonceManager};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Launch Sniper v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    let private_key = settings
        .private_key()
        .context("A signing key is required to snipe")?;
    info!(
        "Loaded configuration for chain {} ({})",
        settings.chain.name, settings.chain.chain_id
    );

    // Read side: nonce queries, gas price, receipts, PairCreated logs
    let provider = Arc::new(ChainProvider::new(settings.chain.clone()).await?);
    let reader: Arc<dyn ChainReader> = provider.clone();

    // Write side: one connection per broadcast endpoint
    let pool = Arc::new(EndpointPool::connect(settings.broadcast_urls())?);
    info!("Broadcast pool ready with {} endpoints", pool.len());

    let builder = Arc::new(BuyTxBuilder::new(&settings, &private_key, reader.clone())?);
    let nonces = Arc::new(NonceManager::init(builder.address(), reader.clone()).await?);
    let broadcaster = Arc::new(BroadcastCoordinator::new(pool));
    let watcher = Arc::new(ConfirmationWatcher::new(
        reader.clone(),
        settings.chain.confirmations,
        settings.chain.confirmation_timeout(),
        settings.chain.poll_interval(),
    ));

    let (event_tx, event_rx) = broadcast::channel(1024);
    let listener = Arc::new(PairListener::new(
        provider.clone(),
        settings.sniper.factory_address,
        event_tx,
        settings.chain.poll_interval(),
    ));
    let engine = Arc::new(SnipeEngine::new(
        EngineConfig::from(&settings),
        nonces.clone(),
        builder,
        broadcaster.clone(),
        watcher,
    ));

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

    // Start PairCreated listener
    let listener_handle = tokio::spawn({
        let listener = listener.clone();
        async move { listener.run().await }
    });

    // Start snipe engine
    let engine_handle = tokio::spawn(engine.clone().run(event_rx));

    // Periodic nonce refresh
    let nonce_handle = tokio::spawn({
        let nonces = nonces.clone();
        let period = settings.chain.nonce_resync_interval();
        async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = nonces.refresh().await {
                    warn!("Nonce refresh failed: {}", e);
                }
            }
        }
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let provider = provider.clone();
        let broadcaster = broadcaster.clone();
        let interval = settings.chain.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;

                let healthy = provider.health_check().await;
                if !healthy {
                    warn!("Chain {} health check failed", provider.chain_id());
                }
                metrics::record_chain_health(provider.chain_id(), healthy);
                metrics::record_health_check();

                let stats = broadcaster.stats().snapshot();
                info!(
                    successes = stats.successes,
                    failures = stats.failures,
                    accepted = stats.accepted,
                    rejected = stats.rejected,
                    timed_out = stats.timed_out,
                    settled = stats.settled,
                    "Broadcast totals"
                );
            }
        }
    });

    info!("Launch Sniper is running");
    info!("  Wallet: {:?}", nonces.address());
    info!("  Nonce:  {}", nonces.current());
    info!("  Factory: {:?}", settings.sniper.factory_address);
    info!("  Base asset: {:?}", settings.sniper.base_asset);
    info!("  Buy amount: {}", settings.sniper.buy_amount);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // In-flight broadcasts are not awaited
    engine.stop().await;
    listener.stop().await;

    // Abort background tasks
    listener_handle.abort();
    engine_handle.abort();
    nonce_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    provider.disconnect().await;

    info!("Launch Sniper stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,launch_sniper=debug,hyper=warn"));

    // LOG_FORMAT=json for log shippers
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
