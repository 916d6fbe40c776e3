//! PairCreated listener with WebSocket streaming and HTTP polling fallback

use crate::error::{SniperError, SniperResult};
use crate::events::{EventParser, PairCreated};

use super::{ChainProvider, ChainReader};

use ethers::prelude::*;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Upper bound on blocks per log query
const MAX_SCAN_BLOCKS: u64 = 1000;

/// Listens for PairCreated logs from the factory and fans them out
pub struct PairListener {
    /// Chain provider
    provider: Arc<ChainProvider>,
    /// Event broadcast channel
    event_tx: broadcast::Sender<PairCreated>,
    /// Event parser
    event_parser: EventParser,
    /// Last processed block (polling mode)
    last_processed_block: RwLock<u64>,
    poll_interval: Duration,
    /// Shutdown signal
    shutdown: RwLock<bool>,
}

impl PairListener {
    pub fn new(
        provider: Arc<ChainProvider>,
        factory: Address,
        event_tx: broadcast::Sender<PairCreated>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            provider,
            event_tx,
            event_parser: EventParser::new(factory),
            last_processed_block: RwLock::new(0),
            poll_interval,
            shutdown: RwLock::new(false),
        }
    }

    /// Listen until stopped, reconnecting after failures
    pub async fn run(&self) {
        loop {
            if *self.shutdown.read().await {
                break;
            }

            if let Err(e) = self.listen().await {
                error!("Listener error for chain {}: {}", self.provider.chain_id(), e);
                tokio::time::sleep(Duration::from_secs(5)).await;

                if let Err(e) = self.provider.reconnect_ws().await {
                    warn!("{}", e);
                }
            }
        }
    }

    /// Main listening loop
    pub async fn listen(&self) -> SniperResult<()> {
        // Try WebSocket first, fall back to polling
        if let Some(ws) = self.provider.ws().await {
            info!("Using WebSocket for chain {}", self.provider.chain_id());
            self.listen_ws(ws).await
        } else {
            info!("Using HTTP polling for chain {}", self.provider.chain_id());
            self.listen_polling().await
        }
    }

    /// WebSocket subscription to factory logs
    async fn listen_ws(&self, ws: Provider<Ws>) -> SniperResult<()> {
        let filter = self.event_parser.filter();
        let mut stream = ws
            .subscribe_logs(&filter)
            .await
            .map_err(|e| SniperError::ChainConnection(format!("Log subscription failed: {}", e)))?;

        info!("Subscribed to PairCreated on chain {}", self.provider.chain_id());

        while let Some(log) = stream.next().await {
            if *self.shutdown.read().await {
                return Ok(());
            }
            self.process_log(log);
        }

        Err(SniperError::ChainConnection(
            "Log subscription closed".to_string(),
        ))
    }

    /// HTTP polling-based event listening
    async fn listen_polling(&self) -> SniperResult<()> {
        // Only new pairs matter; never replay history on first start
        if *self.last_processed_block.read().await == 0 {
            let head = self.provider.block_number().await?;
            *self.last_processed_block.write().await = head;
        }

        loop {
            if *self.shutdown.read().await {
                return Ok(());
            }

            let current_block = match self.provider.block_number().await {
                Ok(b) => b,
                Err(e) => {
                    warn!("Failed to get block number: {}", e);
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
            };

            let last_block = *self.last_processed_block.read().await;

            if current_block <= last_block {
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }

            let (from_block, to_block) = scan_range(last_block, current_block);

            debug!(
                "Chain {}: scanning blocks {} to {}",
                self.provider.chain_id(),
                from_block,
                to_block
            );

            let filter = self
                .event_parser
                .filter()
                .from_block(from_block)
                .to_block(to_block);

            match self.provider.get_logs(&filter).await {
                Ok(logs) => {
                    for log in logs {
                        self.process_log(log);
                    }
                    *self.last_processed_block.write().await = to_block;
                    crate::metrics::record_blocks_processed(self.provider.chain_id(), to_block);
                }
                Err(e) => {
                    warn!("Failed to get logs: {}", e);
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Decode and publish a single log; never blocks on consumers
    fn process_log(&self, log: Log) {
        let event = match self.event_parser.parse_log(&log) {
            Ok(event) => event,
            Err(e) => {
                warn!("Failed to parse factory log: {}", e);
                return;
            }
        };

        crate::metrics::record_pair_seen();

        if self.event_tx.send(event).is_err() {
            debug!("PairCreated dropped - no subscribers");
        }
    }

    /// Stop listening
    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
        info!("Pair listener stopped");
    }
}

/// Inclusive block range for the next `eth_getLogs`, at most `MAX_SCAN_BLOCKS` long
fn scan_range(last_processed: u64, head: u64) -> (u64, u64) {
    let from_block = last_processed + 1;
    (from_block, head.min(from_block + MAX_SCAN_BLOCKS - 1))
}
