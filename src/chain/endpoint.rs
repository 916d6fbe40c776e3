//! Broadcast endpoints
//!
//! Each endpoint is an independent connection to an RPC node that accepts raw
//! signed transactions. The pool never retries; racing and aggregation live in
//! the broadcast coordinator.

use crate::error::{SniperError, SniperResult, SubmitError};

use async_trait::async_trait;
use ethers::providers::{Http, Provider};
use ethers::types::H256;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A single node that accepts raw transactions
#[async_trait]
pub trait TxEndpoint: Send + Sync {
    fn url(&self) -> &str;

    /// Submit a `0x`-prefixed signed payload, returning the hash the node acknowledged
    async fn send_raw(&self, raw_hex: String) -> Result<H256, SubmitError>;
}

/// JSON-RPC over HTTP endpoint (`eth_sendRawTransaction`)
pub struct HttpEndpoint {
    url: String,
    provider: Provider<Http>,
}

impl HttpEndpoint {
    pub fn new(url: &str) -> SniperResult<Self> {
        let provider = Provider::<Http>::try_from(url)
            .map_err(|e| SniperError::Config(format!("Invalid endpoint URL {}: {}", url, e)))?;

        Ok(Self {
            url: url.to_string(),
            provider,
        })
    }
}

#[async_trait]
impl TxEndpoint for HttpEndpoint {
    fn url(&self) -> &str {
        &self.url
    }

    async fn send_raw(&self, raw_hex: String) -> Result<H256, SubmitError> {
        let hash = self
            .provider
            .request::<_, H256>("eth_sendRawTransaction", [raw_hex])
            .await?;
        Ok(hash)
    }
}

/// Fixed, ordered set of broadcast endpoints
pub struct EndpointPool {
    endpoints: Vec<Arc<dyn TxEndpoint>>,
}

impl EndpointPool {
    /// Build a pool from already constructed endpoints
    pub fn new(endpoints: Vec<Arc<dyn TxEndpoint>>) -> SniperResult<Self> {
        if endpoints.is_empty() {
            return Err(SniperError::Config(
                "Endpoint pool needs at least one endpoint".to_string(),
            ));
        }
        Ok(Self { endpoints })
    }

    /// Connect HTTP endpoints, skipping URLs that cannot be parsed
    pub fn connect(urls: &[String]) -> SniperResult<Self> {
        let mut endpoints: Vec<Arc<dyn TxEndpoint>> = Vec::with_capacity(urls.len());

        for url in urls {
            match HttpEndpoint::new(url) {
                Ok(endpoint) => {
                    debug!("Added broadcast endpoint {}: {}", endpoints.len(), url);
                    endpoints.push(Arc::new(endpoint));
                }
                Err(e) => warn!("Skipping broadcast endpoint: {}", e),
            }
        }

        let pool = Self::new(endpoints)?;
        info!("Configured {} broadcast endpoints", pool.len());
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Endpoints with their pool index
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Arc<dyn TxEndpoint>)> {
        self.endpoints.iter().enumerate()
    }
}
