//! Immutable signed transaction payload

use crate::error::{SniperError, SniperResult};

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Bytes, H256};
use ethers::utils::{keccak256, rlp::Rlp};

/// A fully signed, RLP-encoded transaction ready for broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    raw: Bytes,
    /// keccak256 of the payload, used to cross-check endpoint acknowledgements
    local_hash: H256,
}

impl SignedTransaction {
    /// Wrap raw signed bytes, rejecting anything that does not decode as a signed transaction
    pub fn new(raw: Bytes) -> SniperResult<Self> {
        if raw.is_empty() {
            return Err(SniperError::InvalidTransaction("empty payload".to_string()));
        }

        TypedTransaction::decode_signed(&Rlp::new(&raw))
            .map_err(|e| SniperError::InvalidTransaction(e.to_string()))?;

        let local_hash = H256::from(keccak256(&raw));
        Ok(Self { raw, local_hash })
    }

    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn local_hash(&self) -> H256 {
        self.local_hash
    }

    /// `0x`-prefixed hex form, as sent over JSON-RPC
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ethers::signers::{LocalWallet, Signer};
    use ethers::types::{Address, TransactionRequest};

    pub(crate) const TEST_KEY: &str =
        "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    /// Sign a throwaway legacy transaction
    pub(crate) async fn signed_fixture(nonce: u64) -> SignedTransaction {
        let wallet = TEST_KEY.parse::<LocalWallet>().unwrap().with_chain_id(56u64);
        let tx: TypedTransaction = TransactionRequest::new()
            .to(Address::repeat_byte(0x11))
            .nonce(nonce)
            .gas(21_000u64)
            .gas_price(3_000_000_000u64)
            .chain_id(56u64)
            .into();
        let signature = wallet.sign_transaction(&tx).await.unwrap();
        SignedTransaction::new(tx.rlp_signed(&signature)).unwrap()
    }

    #[tokio::test]
    async fn test_hex_form_is_prefixed() {
        let tx = signed_fixture(5).await;
        let hex_form = tx.to_hex();

        assert!(hex_form.starts_with("0x"));
        assert_eq!(hex::decode(&hex_form[2..]).unwrap(), tx.raw().to_vec());
        assert_eq!(tx.local_hash(), H256::from(keccak256(tx.raw())));
    }

    #[test]
    fn test_rejects_malformed_payloads() {
        assert!(matches!(
            SignedTransaction::new(Bytes::new()),
            Err(SniperError::InvalidTransaction(_))
        ));
        assert!(matches!(
            SignedTransaction::new(Bytes::from(vec![0xde, 0xad, 0xbe, 0xef])),
            Err(SniperError::InvalidTransaction(_))
        ));
    }
}
