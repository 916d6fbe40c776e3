//! Chain module - network access for the sniper
//!
//! This module provides:
//! - Read provider with failover across RPC URLs
//! - The broadcast endpoint pool
//! - PairCreated streaming over WebSocket with HTTP polling fallback
//! - Best-effort confirmation watching

pub mod confirmation;
pub mod endpoint;
pub mod listener;
pub mod provider;

pub use confirmation::ConfirmationWatcher;
pub use endpoint::EndpointPool;
pub use listener::PairListener;
pub use provider::ChainProvider;

use crate::error::SniperResult;

use async_trait::async_trait;
use ethers::types::{Address, TransactionReceipt, H256, U256};

/// Read-side chain queries used by the nonce manager, gas estimator and
/// confirmation watcher
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Next nonce for `address` from the pending view
    async fn pending_nonce(&self, address: Address) -> SniperResult<u64>;

    async fn block_number(&self) -> SniperResult<u64>;

    async fn transaction_receipt(&self, tx_hash: H256) -> SniperResult<Option<TransactionReceipt>>;

    async fn gas_price(&self) -> SniperResult<U256>;
}
