//! Best-effort confirmation watching
//!
//! Waits for an accepted transaction to be mined with the configured number of
//! confirmations. Results are logged and counted, never fed back into nonce or
//! broadcast state.

use super::ChainReader;
use crate::error::{SniperError, SniperResult};

use ethers::types::H256;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// Terminal state of a watched transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationStatus {
    Confirmed { block_number: u64, confirmations: u64 },
    /// Mined, but the receipt status is 0
    Reverted { block_number: u64 },
}

pub struct ConfirmationWatcher {
    reader: Arc<dyn ChainReader>,
    /// Required confirmations (1 = included in a block)
    confirmations: u64,
    timeout: Duration,
    poll_interval: Duration,
}

impl ConfirmationWatcher {
    pub fn new(
        reader: Arc<dyn ChainReader>,
        confirmations: u64,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            reader,
            confirmations: confirmations.max(1),
            timeout,
            poll_interval,
        }
    }

    /// Watch a transaction in the background. The handle never needs to be awaited.
    pub fn watch(self: &Arc<Self>, tx_hash: H256) -> JoinHandle<()> {
        let watcher = Arc::clone(self);
        let started = Instant::now();

        tokio::spawn(async move {
            match watcher.wait_for(tx_hash).await {
                Ok(ConfirmationStatus::Confirmed {
                    block_number,
                    confirmations,
                }) => {
                    info!(
                        ?tx_hash,
                        block_number,
                        confirmations,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Confirmed in block {}",
                        block_number
                    );
                    crate::metrics::record_confirmation("confirmed");
                }
                Ok(ConfirmationStatus::Reverted { block_number }) => {
                    warn!(?tx_hash, block_number, "Transaction reverted");
                    crate::metrics::record_confirmation("reverted");
                }
                Err(e) => {
                    warn!(?tx_hash, "Confirmation wait ended without result: {}", e);
                    crate::metrics::record_confirmation("timeout");
                }
            }
        })
    }

    /// Wait until the transaction is mined with enough confirmations, bounded by the timeout
    pub async fn wait_for(&self, tx_hash: H256) -> SniperResult<ConfirmationStatus> {
        timeout(self.timeout, self.poll(tx_hash))
            .await
            .map_err(|_| SniperError::Timeout {
                operation: format!("confirmation of {:?}", tx_hash),
            })
    }

    async fn poll(&self, tx_hash: H256) -> ConfirmationStatus {
        loop {
            match self.check(tx_hash).await {
                Ok(Some(status)) => return status,
                Ok(None) => {}
                Err(e) => debug!(?tx_hash, "Confirmation check failed: {}", e),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn check(&self, tx_hash: H256) -> SniperResult<Option<ConfirmationStatus>> {
        let receipt = match self.reader.transaction_receipt(tx_hash).await? {
            Some(receipt) => receipt,
            None => return Ok(None),
        };
        let block_number = match receipt.block_number {
            Some(block) => block.as_u64(),
            None => return Ok(None),
        };

        if receipt.status == Some(0u64.into()) {
            return Ok(Some(ConfirmationStatus::Reverted { block_number }));
        }

        let current_block = self.reader.block_number().await?;
        let confirmations = current_block.saturating_sub(block_number) + 1;

        if confirmations >= self.confirmations {
            Ok(Some(ConfirmationStatus::Confirmed {
                block_number,
                confirmations,
            }))
        } else {
            debug!(
                ?tx_hash,
                "{} / {} confirmations", confirmations, self.confirmations
            );
            Ok(None)
        }
    }
}
