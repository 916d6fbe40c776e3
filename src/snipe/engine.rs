//! Snipe engine: turns matching PairCreated events into broadcast buys

use super::filter::{PairFilter, SnipeTarget};
use crate::chain::ConfirmationWatcher;
use crate::config::Settings;
use crate::error::{SniperError, SniperResult};
use crate::events::PairCreated;
use crate::tx::{BroadcastCoordinator, BroadcastResult, NonceManager, TransactionBuilder};

use ethers::types::{Address, H256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};

/// Knobs the engine reads from configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub base_asset: Address,
    pub submit_timeout: Duration,
    /// Build/broadcast attempts per target when a nonce conflict forces a rebuild
    pub max_attempts: u32,
}

impl From<&Settings> for EngineConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            base_asset: settings.sniper.base_asset,
            submit_timeout: settings.chain.submit_timeout(),
            max_attempts: settings.sniper.max_attempts,
        }
    }
}

pub struct SnipeEngine {
    filter: PairFilter,
    nonces: Arc<NonceManager>,
    builder: Arc<dyn TransactionBuilder>,
    broadcaster: Arc<BroadcastCoordinator>,
    watcher: Arc<ConfirmationWatcher>,
    submit_timeout: Duration,
    max_attempts: u32,
    /// Shutdown flag
    shutdown: Arc<RwLock<bool>>,
}

impl SnipeEngine {
    pub fn new(
        config: EngineConfig,
        nonces: Arc<NonceManager>,
        builder: Arc<dyn TransactionBuilder>,
        broadcaster: Arc<BroadcastCoordinator>,
        watcher: Arc<ConfirmationWatcher>,
    ) -> Self {
        Self {
            filter: PairFilter::new(config.base_asset),
            nonces,
            builder,
            broadcaster,
            watcher,
            submit_timeout: config.submit_timeout,
            max_attempts: config.max_attempts.max(1),
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Consume notifications until stopped or the feed closes
    pub async fn run(self: Arc<Self>, mut event_rx: broadcast::Receiver<PairCreated>) {
        let mut shutdown_check = interval(Duration::from_secs(1));

        info!(
            base_asset = ?self.filter.base_asset(),
            endpoints = self.broadcaster.endpoint_count(),
            "Snipe engine started"
        );

        loop {
            if *self.shutdown.read().await {
                break;
            }

            tokio::select! {
                received = event_rx.recv() => match received {
                    Ok(event) => {
                        self.handle_event(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Snipe engine lagged, {} PairCreated events dropped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("PairCreated feed closed");
                        break;
                    }
                },

                _ = shutdown_check.tick() => {}
            }
        }

        info!("Snipe engine stopped");
    }

    /// Spawn a snipe flow if the pair is quoted against the base asset.
    ///
    /// Never waits on the flow; non-matching events return `None` and touch nothing.
    pub fn handle_event(self: &Arc<Self>, event: PairCreated) -> Option<JoinHandle<SniperResult<H256>>> {
        let target = self.filter.matches(&event)?;
        crate::metrics::record_pair_matched();

        info!("========================================");
        info!("TARGET DETECTED");
        info!("  Pair:  {:?}", target.pair);
        info!("  Token: {:?}", target.token);
        info!(
            "  Block: {}",
            target
                .block_number
                .map(|b| b.to_string())
                .unwrap_or_else(|| "pending".to_string())
        );
        if let Some(source_tx) = target.source_tx {
            info!("  Tx:    {:?}", source_tx);
        }
        info!("  Time:  {}", chrono::Utc::now().format("%H:%M:%S%.3f"));
        info!("========================================");

        let engine = Arc::clone(self);
        Some(tokio::spawn(async move {
            let token = target.token;
            let result = engine.execute_snipe(target).await;
            if let Err(e) = &result {
                error!(?token, "Snipe failed: {}", e);
            }
            result
        }))
    }

    /// lease -> build/sign -> broadcast -> settle nonce -> watch confirmation
    async fn execute_snipe(&self, target: SnipeTarget) -> SniperResult<H256> {
        let mut lease = self.nonces.lease().await?;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let nonce = lease.nonce();

            let sign_started = Instant::now();
            let signed = self.builder.build_buy(target.token, nonce).await?;
            let sign_ms = sign_started.elapsed().as_millis() as u64;

            let result = self.broadcaster.broadcast(&signed, self.submit_timeout).await?;

            match result {
                BroadcastResult::Success {
                    tx_hash,
                    endpoint,
                    elapsed,
                } => {
                    let next = lease.advance();
                    info!(
                        ?tx_hash,
                        token = ?target.token,
                        nonce,
                        next_nonce = next,
                        endpoint,
                        sign_ms,
                        submit_ms = elapsed.as_millis() as u64,
                        total_ms = target.detected_at.elapsed().as_millis() as u64,
                        "Snipe submitted"
                    );
                    self.watcher.watch(tx_hash);
                    return Ok(tx_hash);
                }
                failure => {
                    debug!(nonce, attempt, sign_ms, "Broadcast rejected everywhere");

                    // An endpoint that never answered may hold the transaction; a
                    // rebuild could land a second buy for the same target
                    if failure.is_ambiguous() {
                        lease.mark_stale();
                        return Err(SniperError::BroadcastFailed(format!(
                            "no endpoint accepted nonce {} and some never answered",
                            nonce
                        )));
                    }

                    if failure.has_nonce_conflict() {
                        let observed = lease.resync_from_network().await?;
                        if attempt < self.max_attempts {
                            warn!(
                                nonce,
                                resynced = observed,
                                attempt,
                                "Nonce conflict, rebuilding with resynced nonce"
                            );
                            continue;
                        }
                        return Err(SniperError::BroadcastFailed(format!(
                            "nonce conflict persisted after {} attempts",
                            attempt
                        )));
                    }

                    // Every endpoint refused outright, so the nonce was never spent
                    return Err(SniperError::BroadcastFailed(format!(
                        "all endpoints rejected nonce {}",
                        nonce
                    )));
                }
            }
        }
    }

    /// Stop consuming events; in-flight flows are left to finish
    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
    }
}
