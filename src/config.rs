//! Configuration management for the launch sniper
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use ethers::types::Address;
use serde::{Deserialize, Deserializer};
use std::env;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub sniper: SniperConfig,
    pub chain: ChainConfig,
    pub wallet: WalletConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SniperConfig {
    /// Asset every target pair must contain (e.g. WBNB)
    pub base_asset: Address,
    /// DEX factory emitting PairCreated
    pub factory_address: Address,
    /// Contract exposing `buy(address,uint256,uint256)`
    #[serde(default, deserialize_with = "empty_as_none")]
    pub sniper_contract: Option<Address>,
    /// Amount in base asset units, as a decimal string ("0.0001")
    pub buy_amount: String,
    #[serde(default = "default_deadline_minutes")]
    pub deadline_minutes: u64,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    #[serde(default = "default_gas_price_gwei")]
    pub gas_price_gwei: u64,
    /// Outbid the network gas price instead of using the fixed one
    #[serde(default)]
    pub competitive_gas: bool,
    /// Attempts per target when a nonce conflict forces a rebuild
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    /// Read endpoints (nonce, receipts, logs), with failover
    pub rpc_urls: Vec<String>,
    /// Broadcast endpoints; falls back to `rpc_urls` when empty
    #[serde(default)]
    pub broadcast_urls: Vec<String>,
    /// WebSocket endpoint for the PairCreated subscription
    #[serde(default, deserialize_with = "empty_as_none")]
    pub ws_url: Option<String>,
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    #[serde(default = "default_nonce_resync_interval_secs")]
    pub nonce_resync_interval_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

fn default_deadline_minutes() -> u64 {
    3
}

fn default_gas_limit() -> u64 {
    300_000
}

fn default_gas_price_gwei() -> u64 {
    3
}

fn default_max_attempts() -> u32 {
    2
}

fn default_submit_timeout_ms() -> u64 {
    5_000
}

fn default_confirmations() -> u64 {
    1
}

fn default_confirmation_timeout_secs() -> u64 {
    45
}

fn default_nonce_resync_interval_secs() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_health_check_interval_secs() -> u64 {
    60
}

fn default_private_key_env() -> String {
    "PRIVATE_KEY".to_string()
}

impl Settings {
    /// Load settings from the file named by `SNIPER_CONFIG`, or `config/default.toml`
    pub fn load() -> Result<Self> {
        let config_path = env::var("SNIPER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.chain.rpc_urls.is_empty() {
            anyhow::bail!("Chain {} has no RPC URLs configured", self.chain.name);
        }
        if self.sniper.sniper_contract.is_none() {
            anyhow::bail!("sniper.sniper_contract not set - deploy the contract first");
        }
        if self.sniper.base_asset.is_zero() {
            anyhow::bail!("sniper.base_asset must not be the zero address");
        }
        if self.chain.submit_timeout_ms == 0 {
            anyhow::bail!("chain.submit_timeout_ms must be greater than zero");
        }
        if self.sniper.max_attempts == 0 {
            anyhow::bail!("sniper.max_attempts must be at least 1");
        }
        for (name, value) in [
            ("chain.nonce_resync_interval_secs", self.chain.nonce_resync_interval_secs),
            ("chain.poll_interval_ms", self.chain.poll_interval_ms),
            ("chain.health_check_interval_secs", self.chain.health_check_interval_secs),
        ] {
            if value == 0 {
                anyhow::bail!("{} must be greater than zero", name);
            }
        }
        if self.chain.ws_url.is_none() {
            tracing::warn!(
                "Chain {} has no WebSocket URL - will poll for PairCreated logs",
                self.chain.name
            );
        }

        Ok(())
    }

    /// Endpoints used for raw transaction broadcast
    pub fn broadcast_urls(&self) -> &[String] {
        if self.chain.broadcast_urls.is_empty() {
            &self.chain.rpc_urls
        } else {
            &self.chain.broadcast_urls
        }
    }

    /// Read the signing key from the configured environment variable
    pub fn private_key(&self) -> Result<String> {
        env::var(&self.wallet.private_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .with_context(|| format!("{} not set", self.wallet.private_key_env))
    }
}

impl ChainConfig {
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn nonce_resync_interval(&self) -> Duration {
        Duration::from_secs(self.nonce_resync_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// An unset `${VAR}` substitutes to an empty string; treat that as absent
fn empty_as_none<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static regex");

    re.replace_all(input, |cap: &regex::Captures<'_>| {
        env::var(&cap[1]).unwrap_or_default()
    })
    .into_owned()
}
