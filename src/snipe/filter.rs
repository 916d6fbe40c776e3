//! Base-asset pair filter

use crate::events::PairCreated;

use ethers::types::{Address, H256};
use tokio::time::Instant;

/// A pair worth buying into
#[derive(Debug, Clone)]
pub struct SnipeTarget {
    /// The newly listed token (the side that is not the base asset)
    pub token: Address,
    pub pair: Address,
    pub block_number: Option<u64>,
    pub source_tx: Option<H256>,
    pub detected_at: Instant,
}

/// Keeps only pairs quoted against the base asset
#[derive(Debug, Clone, Copy)]
pub struct PairFilter {
    base_asset: Address,
}

impl PairFilter {
    pub fn new(base_asset: Address) -> Self {
        Self { base_asset }
    }

    pub fn base_asset(&self) -> Address {
        self.base_asset
    }

    pub fn matches(&self, event: &PairCreated) -> Option<SnipeTarget> {
        let token = if event.token0 == self.base_asset {
            event.token1
        } else if event.token1 == self.base_asset {
            event.token0
        } else {
            return None;
        };

        // base/base has nothing new to buy
        if token == self.base_asset {
            return None;
        }

        Some(SnipeTarget {
            token,
            pair: event.pair,
            block_number: event.block_number,
            source_tx: event.tx_hash,
            detected_at: Instant::now(),
        })
    }
}
