//! Transaction submission: signing, nonce management and multi-endpoint broadcast

mod broadcast;
mod gas;
mod nonce;
mod sender;
mod signed;

pub use broadcast::{BroadcastCoordinator, BroadcastResult};
pub use nonce::NonceManager;
pub use sender::{BuyTxBuilder, TransactionBuilder};
pub use signed::SignedTransaction;

#[cfg(test)]
pub(crate) mod testing {
    pub(crate) use super::broadcast::tests::{pool_of, FakeEndpoint};
    pub(crate) use super::nonce::Freshness;
    pub(crate) use super::signed::tests::signed_fixture;
}
