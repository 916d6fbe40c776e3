//! Nonce management for the sending account
//!
//! Handles:
//! - Local nonce caching so the hot path never waits on the network
//! - Exclusive leases so concurrent snipes never sign with the same nonce
//! - Resync from the pending view on conflict, at startup and on a timer
//!
//! `current()` is a plain read: two calls without an intervening write return the
//! same value. Every write (`advance`, `resync`) goes through a [`NonceLease`];
//! while one is held every other `lease()` waits, so the second flow sees the
//! counter only after the first advanced it or gave it back.

use crate::chain::ChainReader;
use crate::error::SniperResult;

use ethers::types::Address;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Whether the cached counter can be trusted without asking the network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Set by a resync or by an advance after an accepted broadcast
    Fresh,
    /// A previous attempt may or may not have reached the network
    Stale,
}

/// Owns the next nonce of one account
pub struct NonceManager {
    /// Wallet address
    address: Address,
    reader: Arc<dyn ChainReader>,
    /// Next nonce to use; only written while `state` is locked
    next: Arc<AtomicU64>,
    state: Arc<Mutex<Freshness>>,
}

impl NonceManager {
    /// Create a manager seeded with a known nonce
    pub fn new(address: Address, reader: Arc<dyn ChainReader>, next: u64) -> Self {
        Self {
            address,
            reader,
            next: Arc::new(AtomicU64::new(next)),
            state: Arc::new(Mutex::new(Freshness::Fresh)),
        }
    }

    /// Create a manager seeded from the pending view
    pub async fn init(address: Address, reader: Arc<dyn ChainReader>) -> SniperResult<Self> {
        let on_chain = reader.pending_nonce(address).await?;
        info!("Initialized nonce for {:?}: {}", address, on_chain);
        crate::metrics::record_nonce_resync("startup");
        Ok(Self::new(address, reader, on_chain))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Next nonce to use, without mutating anything
    pub fn current(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub async fn freshness(&self) -> Freshness {
        *self.state.lock().await
    }

    /// Periodic safety net. Fetches outside the lock, then only moves the
    /// counter forward unless the cache is stale. Returns true if it changed.
    pub async fn refresh(&self) -> SniperResult<bool> {
        let observed = self.reader.pending_nonce(self.address).await?;

        let mut state = self.state.lock().await;
        let cached = self.next.load(Ordering::SeqCst);

        let apply = match *state {
            Freshness::Stale => true,
            Freshness::Fresh => observed > cached,
        };
        if !apply {
            debug!("Nonce refresh: network {} cached {}, keeping cache", observed, cached);
            return Ok(false);
        }

        info!("Nonce updated: {} -> {}", cached, observed);
        apply_resync(&self.next, &mut state, observed);
        crate::metrics::record_nonce_resync("periodic");
        Ok(observed != cached)
    }

    /// Take exclusive use of the current nonce. A stale cache is resynced first.
    pub async fn lease(&self) -> SniperResult<NonceLease> {
        let guard = self.state.clone().lock_owned().await;
        let mut lease = NonceLease {
            guard,
            next: self.next.clone(),
            reader: self.reader.clone(),
            address: self.address,
        };

        if *lease.guard == Freshness::Stale {
            lease.resync_from_network().await?;
        }

        Ok(lease)
    }
}

fn apply_resync(next: &AtomicU64, state: &mut Freshness, observed: u64) {
    let previous = next.swap(observed, Ordering::SeqCst);
    *state = Freshness::Fresh;
    if previous != observed {
        info!("Nonce resynced: {} -> {}", previous, observed);
    }
}

/// Exclusive hold on the account nonce for one snipe flow.
///
/// Dropping the lease without calling [`NonceLease::advance`] leaves the counter
/// untouched, so the same nonce goes to the next flow.
pub struct NonceLease {
    guard: OwnedMutexGuard<Freshness>,
    next: Arc<AtomicU64>,
    reader: Arc<dyn ChainReader>,
    address: Address,
}

impl NonceLease {
    pub fn nonce(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }

    /// The broadcast was accepted; the nonce is spent
    pub fn advance(mut self) -> u64 {
        *self.guard = Freshness::Fresh;
        let next = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Nonce advanced to {}", next);
        next
    }

    /// Nobody accepted the transaction but some endpoint might have seen it
    pub fn mark_stale(mut self) {
        warn!(
            "Nonce {} marked stale - next lease resyncs from network",
            self.nonce()
        );
        *self.guard = Freshness::Stale;
    }

    /// Overwrite the counter with a network-observed value, even if lower
    pub fn resync(&mut self, observed: u64) {
        apply_resync(&self.next, &mut self.guard, observed);
    }

    /// Resync while keeping the lease, so the caller can rebuild and retry.
    /// If the query fails the state stays `Stale` for the next lease.
    pub async fn resync_from_network(&mut self) -> SniperResult<u64> {
        *self.guard = Freshness::Stale;
        let observed = self.reader.pending_nonce(self.address).await?;
        self.resync(observed);
        crate::metrics::record_nonce_resync("conflict");
        Ok(observed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainReader;
    use crate::error::SniperError;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn reader_returning(nonce: u64) -> Arc<dyn ChainReader> {
        let mut reader = MockChainReader::new();
        reader.expect_pending_nonce().returning(move |_| Ok(nonce));
        Arc::new(reader)
    }

    fn manager(next: u64, network: u64) -> NonceManager {
        NonceManager::new(Address::repeat_byte(0x42), reader_returning(network), next)
    }

    #[tokio::test]
    async fn test_init_reads_pending_view() {
        let nonces = NonceManager::init(Address::zero(), reader_returning(17))
            .await
            .unwrap();
        assert_eq!(nonces.current(), 17);
        assert_eq!(nonces.freshness().await, Freshness::Fresh);
    }

    #[tokio::test]
    async fn test_current_is_idempotent() {
        let nonces = manager(5, 5);
        assert_eq!(nonces.current(), 5);
        assert_eq!(nonces.current(), 5);
    }

    #[tokio::test]
    async fn test_advance_increments_by_one() {
        let nonces = manager(5, 5);
        assert_eq!(nonces.lease().await.unwrap().advance(), 6);
        assert_eq!(nonces.current(), 6);
    }

    #[tokio::test]
    async fn test_resync_overwrites_even_when_lower() {
        let nonces = manager(9, 0);
        nonces.lease().await.unwrap().resync(4);
        assert_eq!(nonces.current(), 4);
        nonces.lease().await.unwrap().resync(12);
        assert_eq!(nonces.current(), 12);
    }

    #[tokio::test]
    async fn test_refresh_only_moves_forward_when_fresh() {
        // Network has not seen our last advance yet
        let behind = manager(6, 5);
        assert!(!behind.refresh().await.unwrap());
        assert_eq!(behind.current(), 6);

        let ahead = manager(6, 8);
        assert!(ahead.refresh().await.unwrap());
        assert_eq!(ahead.current(), 8);
    }

    #[tokio::test]
    async fn test_refresh_overwrites_stale_cache() {
        let nonces = manager(6, 5);
        nonces.lease().await.unwrap().mark_stale();
        assert_eq!(nonces.freshness().await, Freshness::Stale);

        assert!(nonces.refresh().await.unwrap());
        assert_eq!(nonces.current(), 5);
        assert_eq!(nonces.freshness().await, Freshness::Fresh);
    }

    #[tokio::test]
    async fn test_dropped_lease_keeps_nonce() {
        let nonces = manager(5, 5);
        {
            let lease = nonces.lease().await.unwrap();
            assert_eq!(lease.nonce(), 5);
        }
        assert_eq!(nonces.lease().await.unwrap().nonce(), 5);
    }

    #[tokio::test]
    async fn test_stale_lease_resyncs_before_handing_out() {
        let nonces = manager(5, 6);
        nonces.lease().await.unwrap().mark_stale();

        let lease = nonces.lease().await.unwrap();
        assert_eq!(lease.nonce(), 6);
    }

    #[tokio::test]
    async fn test_lease_resync_keeps_exclusivity() {
        let nonces = manager(3, 9);
        let mut lease = nonces.lease().await.unwrap();
        assert_eq!(lease.resync_from_network().await.unwrap(), 9);
        assert_eq!(lease.nonce(), 9);
        assert_eq!(lease.advance(), 10);
        assert_eq!(nonces.current(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_flows_never_share_a_nonce() {
        let nonces = Arc::new(manager(5, 5));

        let first = nonces.lease().await.unwrap();
        assert_eq!(first.nonce(), 5);

        let second = tokio::spawn({
            let nonces = nonces.clone();
            async move { nonces.lease().await.unwrap().nonce() }
        });

        // Plain reads still see 5 while the first flow is in flight
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(nonces.current(), 5);
        assert_eq!(nonces.current(), 5);
        assert!(!second.is_finished());

        first.advance();
        assert_eq!(second.await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_failed_resync_leaves_state_stale() {
        // First query fails, later ones see the network value
        let queries = AtomicUsize::new(0);
        let mut reader = MockChainReader::new();
        reader.expect_pending_nonce().returning(move |_| {
            match queries.fetch_add(1, Ordering::SeqCst) {
                0 => Err(SniperError::Nonce("rpc down".to_string())),
                _ => Ok(8),
            }
        });
        let nonces = NonceManager::new(Address::zero(), Arc::new(reader), 5);

        {
            let mut lease = nonces.lease().await.unwrap();
            assert!(lease.resync_from_network().await.is_err());
        }
        assert_eq!(nonces.freshness().await, Freshness::Stale);
        assert_eq!(nonces.current(), 5);

        // The rejected nonce is not handed out again without asking the network
        assert_eq!(nonces.lease().await.unwrap().nonce(), 8);
    }
}
