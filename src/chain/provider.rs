//! Read-side chain access
//!
//! Every read goes to the active HTTP provider and rotates to the next one on
//! error, trying each configured URL once per call. Broadcasts never use this
//! path; they go through the endpoint pool.

use super::ChainReader;
use crate::config::ChainConfig;
use crate::error::{SniperError, SniperResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider, ProviderError, Ws};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub struct ChainProvider {
    chain_id: u64,
    ws_url: Option<String>,
    /// Read providers in configured order
    readers: Vec<Provider<Http>>,
    /// Index of the reader currently in use
    active: AtomicUsize,
    /// Log subscription transport; `None` means the listener polls
    ws: RwLock<Option<Provider<Ws>>>,
}

impl ChainProvider {
    pub async fn new(config: ChainConfig) -> SniperResult<Self> {
        let readers: Vec<Provider<Http>> = config
            .rpc_urls
            .iter()
            .filter_map(|url| match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    debug!("Read provider {}: {}", config.chain_id, url);
                    Some(provider.interval(Duration::from_millis(100)))
                }
                Err(e) => {
                    warn!("Ignoring RPC URL {}: {}", url, e);
                    None
                }
            })
            .collect();

        if readers.is_empty() {
            return Err(SniperError::ChainConnection(format!(
                "No usable RPC URL for chain {}",
                config.chain_id
            )));
        }

        let provider = Self {
            chain_id: config.chain_id,
            ws_url: config.ws_url,
            readers,
            active: AtomicUsize::new(0),
            ws: RwLock::new(None),
        };

        // A failed WebSocket is not fatal; the listener falls back to polling
        if let Err(e) = provider.reconnect_ws().await {
            warn!("{}", e);
        }

        Ok(provider)
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// WebSocket provider, if connected
    pub async fn ws(&self) -> Option<Provider<Ws>> {
        self.ws.read().await.clone()
    }

    fn reader(&self) -> Provider<Http> {
        let idx = self.active.load(Ordering::Relaxed) % self.readers.len();
        self.readers[idx].clone()
    }

    fn rotate(&self) {
        let next = (self.active.load(Ordering::Relaxed) + 1) % self.readers.len();
        self.active.store(next, Ordering::Relaxed);
        warn!("Chain {} switched to read provider {}", self.chain_id, next);
    }

    /// Run `call` against each reader in turn until one succeeds
    async fn with_failover<T, F, Fut>(&self, what: &str, call: F) -> Result<T, ProviderError>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last_error = None;

        for _ in 0..self.readers.len() {
            match call(self.reader()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("{} failed on chain {}: {}", what, self.chain_id, e);
                    last_error = Some(e);
                    self.rotate();
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ProviderError::CustomError(format!("no reader for {}", what))))
    }

    pub async fn get_logs(&self, filter: &Filter) -> SniperResult<Vec<Log>> {
        self.with_failover("eth_getLogs", |p| async move { p.get_logs(filter).await })
            .await
            .map_err(|e| SniperError::ChainConnection(format!("All readers failed: {}", e)))
    }

    pub async fn health_check(&self) -> bool {
        self.block_number().await.is_ok()
    }

    /// (Re)open the WebSocket, when one is configured
    pub async fn reconnect_ws(&self) -> SniperResult<()> {
        let Some(url) = self.ws_url.as_deref() else {
            return Ok(());
        };

        let provider = Provider::<Ws>::connect(url).await.map_err(|e| {
            SniperError::ChainConnection(format!(
                "WebSocket connect failed for chain {}: {}",
                self.chain_id, e
            ))
        })?;
        *self.ws.write().await = Some(provider);
        info!("WebSocket connected for chain {}", self.chain_id);
        Ok(())
    }

    pub async fn disconnect(&self) {
        if self.ws.write().await.take().is_some() {
            info!("WebSocket closed for chain {}", self.chain_id);
        }
    }
}

#[async_trait]
impl ChainReader for ChainProvider {
    async fn pending_nonce(&self, address: Address) -> SniperResult<u64> {
        let pending = Some(BlockId::Number(BlockNumber::Pending));

        self.with_failover("eth_getTransactionCount", |p| async move {
            p.get_transaction_count(address, pending).await
        })
        .await
        .map(|nonce| nonce.as_u64())
        .map_err(|e| SniperError::Nonce(format!("pending nonce for {:?}: {}", address, e)))
    }

    async fn block_number(&self) -> SniperResult<u64> {
        self.with_failover("eth_blockNumber", |p| async move { p.get_block_number().await })
            .await
            .map(|block| block.as_u64())
            .map_err(|e| SniperError::ChainConnection(e.to_string()))
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> SniperResult<Option<TransactionReceipt>> {
        self.with_failover("eth_getTransactionReceipt", |p| async move {
            p.get_transaction_receipt(tx_hash).await
        })
        .await
        .map_err(|e| SniperError::ChainConnection(e.to_string()))
    }

    async fn gas_price(&self) -> SniperResult<U256> {
        self.with_failover("eth_gasPrice", |p| async move { p.get_gas_price().await })
            .await
            .map_err(|e| SniperError::GasEstimation(e.to_string()))
    }
}
