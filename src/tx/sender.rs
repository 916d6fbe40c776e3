//! Buy transaction construction and signing

use super::gas::GasEstimator;
use super::SignedTransaction;
use crate::chain::ChainReader;
use crate::config::Settings;
use crate::error::{SniperError, SniperResult};

use async_trait::async_trait;
use ethers::abi::AbiEncode;
use ethers::contract::EthCall;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, TransactionRequest, U256};
use ethers::utils::parse_ether;
use std::sync::Arc;
use tracing::{debug, info};

/// `buy(address token, uint256 amountIn, uint256 deadlineOffset)` on the sniper contract
#[derive(Debug, Clone, PartialEq, Eq, EthCall)]
#[ethcall(name = "buy", abi = "buy(address,uint256,uint256)")]
pub struct BuyCall {
    pub token: Address,
    pub amount_in: U256,
    pub deadline_offset: U256,
}

/// Builds and signs the purchase transaction for a target token
#[async_trait]
pub trait TransactionBuilder: Send + Sync {
    async fn build_buy(&self, token: Address, nonce: u64) -> SniperResult<SignedTransaction>;
}

/// Legacy-priced call into the sniper contract, signed with a local key
pub struct BuyTxBuilder {
    wallet: LocalWallet,
    contract: Address,
    amount_in: U256,
    deadline_offset: U256,
    gas_limit: U256,
    gas: GasEstimator,
    reader: Arc<dyn ChainReader>,
}

impl BuyTxBuilder {
    pub fn new(
        settings: &Settings,
        private_key: &str,
        reader: Arc<dyn ChainReader>,
    ) -> SniperResult<Self> {
        let wallet = load_wallet(private_key, settings.chain.chain_id)?;
        let contract = settings
            .sniper
            .sniper_contract
            .ok_or_else(|| SniperError::Config("sniper_contract not set".to_string()))?;
        let amount_in = parse_ether(&settings.sniper.buy_amount).map_err(|e| {
            SniperError::Config(format!("Invalid buy_amount {}: {}", settings.sniper.buy_amount, e))
        })?;

        info!("Wallet address: {:?}", wallet.address());
        info!("Sniper contract: {:?}", contract);

        Ok(Self {
            wallet,
            contract,
            amount_in,
            deadline_offset: U256::from(settings.sniper.deadline_minutes * 60),
            gas_limit: U256::from(settings.sniper.gas_limit),
            gas: GasEstimator::new(settings.sniper.gas_price_gwei, settings.sniper.competitive_gas),
            reader,
        })
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    fn call_data(&self, token: Address) -> Vec<u8> {
        BuyCall {
            token,
            amount_in: self.amount_in,
            deadline_offset: self.deadline_offset,
        }
        .encode()
    }
}

#[async_trait]
impl TransactionBuilder for BuyTxBuilder {
    async fn build_buy(&self, token: Address, nonce: u64) -> SniperResult<SignedTransaction> {
        let gas_price = self.gas.gas_price(self.reader.as_ref()).await;

        // The contract pays from its own balance, so no value is attached
        let tx: TypedTransaction = TransactionRequest::new()
            .from(self.wallet.address())
            .to(self.contract)
            .data(self.call_data(token))
            .nonce(nonce)
            .gas(self.gas_limit)
            .gas_price(gas_price)
            .chain_id(self.wallet.chain_id())
            .into();

        let signature = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| SniperError::Wallet(e.to_string()))?;

        let signed = SignedTransaction::new(tx.rlp_signed(&signature))?;
        debug!(
            nonce,
            ?token,
            tx_hash = ?signed.local_hash(),
            bytes = signed.raw().len(),
            "Signed buy transaction"
        );
        Ok(signed)
    }
}

/// Parse a hex private key into a chain-bound wallet
fn load_wallet(private_key: &str, chain_id: u64) -> SniperResult<LocalWallet> {
    private_key
        .trim()
        .trim_start_matches("0x")
        .parse::<LocalWallet>()
        .map(|wallet| wallet.with_chain_id(chain_id))
        .map_err(|e| SniperError::Wallet(format!("Invalid private key: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainReader;
    use crate::tx::signed::tests::TEST_KEY;
    use ethers::utils::rlp::Rlp;

    fn builder() -> BuyTxBuilder {
        BuyTxBuilder {
            wallet: load_wallet(TEST_KEY, 56).unwrap(),
            contract: Address::repeat_byte(0x5e),
            amount_in: parse_ether("0.0001").unwrap(),
            deadline_offset: U256::from(180),
            gas_limit: U256::from(300_000),
            gas: GasEstimator::new(3, false),
            reader: Arc::new(MockChainReader::new()),
        }
    }

    #[test]
    fn test_buy_selector() {
        let expected = &ethers::utils::keccak256("buy(address,uint256,uint256)")[..4];
        assert_eq!(BuyCall::selector(), expected);
    }

    #[test]
    fn test_load_wallet_accepts_prefixed_key() {
        let plain = load_wallet(TEST_KEY, 56).unwrap();
        let prefixed = load_wallet(&format!("0x{}", TEST_KEY), 56).unwrap();
        assert_eq!(plain.address(), prefixed.address());
        assert_eq!(prefixed.chain_id(), 56);
        assert!(matches!(
            load_wallet("not-a-key", 56),
            Err(SniperError::Wallet(_))
        ));
    }

    #[tokio::test]
    async fn test_build_buy_signs_expected_call() {
        let builder = builder();
        let token = Address::repeat_byte(0x77);

        let signed = builder.build_buy(token, 12).await.unwrap();
        let (decoded, signature) =
            TypedTransaction::decode_signed(&Rlp::new(signed.raw())).unwrap();

        assert_eq!(decoded.nonce(), Some(&U256::from(12)));
        assert_eq!(decoded.gas(), Some(&U256::from(300_000)));
        assert_eq!(decoded.gas_price(), Some(U256::from(3_000_000_000u64)));
        assert_eq!(
            decoded.data().map(|d| d.to_vec()),
            Some(builder.call_data(token))
        );
        assert_eq!(signature.recover(decoded.sighash()).unwrap(), builder.address());
    }
}
