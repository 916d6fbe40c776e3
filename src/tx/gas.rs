//! Gas price selection

use crate::chain::ChainReader;

use ethers::types::U256;
use tracing::{debug, warn};

const GWEI: u64 = 1_000_000_000;

/// Picks the gas price for a snipe
pub struct GasEstimator {
    /// Price used when not competing, or when the network query fails
    fixed_gas_price: U256,
    /// Outbid the network price instead of using the fixed one
    competitive: bool,
    /// Multiplier over the network price in competitive mode (150 = +50%)
    premium_percent: u64,
}

impl GasEstimator {
    pub fn new(fixed_gas_price_gwei: u64, competitive: bool) -> Self {
        Self {
            fixed_gas_price: U256::from(fixed_gas_price_gwei) * U256::from(GWEI),
            competitive,
            premium_percent: 150,
        }
    }

    /// Gas price for the next transaction
    pub async fn gas_price(&self, reader: &dyn ChainReader) -> U256 {
        if !self.competitive {
            return self.fixed_gas_price;
        }

        match reader.gas_price().await {
            Ok(network) => {
                let price = network * self.premium_percent / 100;
                debug!(
                    "Competitive gas: network {} wei -> {} wei",
                    network, price
                );
                price
            }
            Err(e) => {
                warn!("Gas price query failed, using fixed price: {}", e);
                self.fixed_gas_price
            }
        }
    }
}
