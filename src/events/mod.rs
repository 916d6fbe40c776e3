//! Factory event types and parsing
//!
//! Only `PairCreated` from a UniswapV2-style factory is of interest.

use crate::error::{SniperError, SniperResult};

use ethers::abi::RawLog;
use ethers::contract::EthEvent;
use ethers::types::{Address, Filter, Log, H256, U256};

/// `PairCreated(address indexed token0, address indexed token1, address pair, uint)`
#[derive(Debug, Clone, PartialEq, Eq, EthEvent)]
#[ethevent(name = "PairCreated", abi = "PairCreated(address,address,address,uint256)")]
pub struct PairCreatedFilter {
    #[ethevent(indexed)]
    pub token0: Address,
    #[ethevent(indexed)]
    pub token1: Address,
    pub pair: Address,
    pub index: U256,
}

/// A pair-creation notification as seen by the snipe engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairCreated {
    pub token0: Address,
    pub token1: Address,
    pub pair: Address,
    pub block_number: Option<u64>,
    pub tx_hash: Option<H256>,
}

/// Decodes factory logs into [`PairCreated`]
pub struct EventParser {
    factory: Address,
}

impl EventParser {
    pub fn new(factory: Address) -> Self {
        Self { factory }
    }

    /// Log filter selecting PairCreated from the factory
    pub fn filter(&self) -> Filter {
        Filter::new()
            .address(self.factory)
            .topic0(PairCreatedFilter::signature())
    }

    /// Parse a log entry into a PairCreated notification
    pub fn parse_log(&self, log: &Log) -> SniperResult<PairCreated> {
        if log.address != self.factory {
            return Err(SniperError::EventParsing(format!(
                "Log from {:?} is not from the factory",
                log.address
            )));
        }

        let raw = RawLog {
            topics: log.topics.clone(),
            data: log.data.to_vec(),
        };
        let decoded = <PairCreatedFilter as EthEvent>::decode_log(&raw)
            .map_err(|e| SniperError::EventParsing(e.to_string()))?;

        Ok(PairCreated {
            token0: decoded.token0,
            token1: decoded.token1,
            pair: decoded.pair,
            block_number: log.block_number.map(|b| b.as_u64()),
            tx_hash: log.transaction_hash,
        })
    }
}
