//! Multi-endpoint broadcast
//!
//! A signed transaction is submitted to every endpoint in the pool at once. Each
//! attempt runs as its own task under its own timeout and reports exactly one
//! [`SubmissionOutcome`]. The first `Accepted` wins and is returned immediately;
//! the remaining attempts are left to finish in the background where their
//! outcomes only reach logs and statistics. `Failure` is returned only once every
//! attempt has resolved.

use super::SignedTransaction;
use crate::chain::EndpointPool;
use crate::error::{SniperError, SniperResult, SubmitError, SubmitErrorKind};

use ethers::types::H256;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// What one endpoint did with one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Accepted(H256),
    Rejected(SubmitError),
    TimedOut,
}

impl SubmissionOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmissionOutcome::Accepted(_))
    }

    fn label(&self) -> &'static str {
        match self {
            SubmissionOutcome::Accepted(_) => "accepted",
            SubmissionOutcome::Rejected(_) => "rejected",
            SubmissionOutcome::TimedOut => "timed_out",
        }
    }
}

/// Outcome tagged with the endpoint that produced it
#[derive(Debug, Clone)]
pub struct EndpointOutcome {
    pub endpoint: usize,
    pub url: String,
    pub outcome: SubmissionOutcome,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub enum BroadcastResult {
    Success {
        tx_hash: H256,
        /// Pool index of the first endpoint to accept
        endpoint: usize,
        elapsed: Duration,
    },
    /// No endpoint accepted; one outcome per endpoint, ordered by index
    Failure { outcomes: Vec<EndpointOutcome> },
}

impl BroadcastResult {
    /// Any endpoint reported a nonce conflict
    pub fn has_nonce_conflict(&self) -> bool {
        self.rejections().any(|e| e.kind.is_nonce_conflict())
    }

    /// Some endpoint may have admitted the transaction without telling us
    pub fn is_ambiguous(&self) -> bool {
        match self {
            BroadcastResult::Success { .. } => false,
            BroadcastResult::Failure { outcomes } => outcomes.iter().any(|o| match &o.outcome {
                SubmissionOutcome::TimedOut => true,
                SubmissionOutcome::Rejected(e) => e.kind.is_transient(),
                SubmissionOutcome::Accepted(_) => false,
            }),
        }
    }

    fn rejections(&self) -> impl Iterator<Item = &SubmitError> {
        let outcomes: &[EndpointOutcome] = match self {
            BroadcastResult::Success { .. } => &[],
            BroadcastResult::Failure { outcomes } => outcomes.as_slice(),
        };
        outcomes.iter().filter_map(|o| match &o.outcome {
            SubmissionOutcome::Rejected(e) => Some(e),
            _ => None,
        })
    }
}

/// Running totals across all broadcasts
#[derive(Debug, Default)]
pub struct BroadcastStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    timed_out: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    /// Broadcasts whose every attempt has resolved
    settled: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub rejected: u64,
    pub timed_out: u64,
    pub successes: u64,
    pub failures: u64,
    pub settled: u64,
}

impl BroadcastStats {
    fn record_outcome(&self, outcome: &SubmissionOutcome) {
        let counter = match outcome {
            SubmissionOutcome::Accepted(_) => &self.accepted,
            SubmissionOutcome::Rejected(_) => &self.rejected,
            SubmissionOutcome::TimedOut => &self.timed_out,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            settled: self.settled.load(Ordering::Relaxed),
        }
    }
}

/// Races signed transactions across the endpoint pool
pub struct BroadcastCoordinator {
    pool: Arc<EndpointPool>,
    stats: Arc<BroadcastStats>,
}

impl BroadcastCoordinator {
    pub fn new(pool: Arc<EndpointPool>) -> Self {
        Self {
            pool,
            stats: Arc::new(BroadcastStats::default()),
        }
    }

    pub fn stats(&self) -> &BroadcastStats {
        &self.stats
    }

    pub fn endpoint_count(&self) -> usize {
        self.pool.len()
    }

    /// Submit `tx` to every endpoint and return the first acceptance
    pub async fn broadcast(
        &self,
        tx: &SignedTransaction,
        per_endpoint_timeout: Duration,
    ) -> SniperResult<BroadcastResult> {
        if per_endpoint_timeout.is_zero() {
            return Err(SniperError::Config(
                "per-endpoint timeout must be greater than zero".to_string(),
            ));
        }

        let total = self.pool.len();
        let payload = tx.to_hex();
        let local_hash = tx.local_hash();
        let started = Instant::now();
        let (report_tx, mut report_rx) = mpsc::unbounded_channel::<EndpointOutcome>();

        info!(
            tx_hash = ?local_hash,
            "Broadcasting to {} endpoints",
            total
        );

        for (index, endpoint) in self.pool.iter() {
            let endpoint = Arc::clone(endpoint);
            let payload = payload.clone();
            let report_tx = report_tx.clone();
            let stats = Arc::clone(&self.stats);

            tokio::spawn(async move {
                let attempt_started = Instant::now();
                let outcome = match timeout(per_endpoint_timeout, endpoint.send_raw(payload)).await {
                    Ok(Ok(hash)) => SubmissionOutcome::Accepted(hash),
                    // The node already holds this exact payload
                    Ok(Err(e)) if e.kind == SubmitErrorKind::AlreadyKnown => {
                        debug!(endpoint = index, "Endpoint already knows tx: {}", e.message);
                        SubmissionOutcome::Accepted(local_hash)
                    }
                    Ok(Err(e)) => SubmissionOutcome::Rejected(e),
                    Err(_) => SubmissionOutcome::TimedOut,
                };
                let report = EndpointOutcome {
                    endpoint: index,
                    url: endpoint.url().to_string(),
                    outcome,
                    elapsed: attempt_started.elapsed(),
                };

                log_outcome(&report);
                stats.record_outcome(&report.outcome);
                crate::metrics::record_endpoint_outcome(index, report.outcome.label());

                // The receiver is gone only once the broadcast has fully settled
                let _ = report_tx.send(report);
            });
        }
        drop(report_tx);

        let mut failed: Vec<EndpointOutcome> = Vec::with_capacity(total);

        while let Some(report) = report_rx.recv().await {
            if let SubmissionOutcome::Accepted(tx_hash) = report.outcome {
                let elapsed = started.elapsed();
                if tx_hash != local_hash {
                    warn!(
                        acknowledged = ?tx_hash,
                        local = ?local_hash,
                        "Endpoint acknowledged a different hash than the signed payload"
                    );
                }
                info!(
                    ?tx_hash,
                    endpoint = report.endpoint,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Transaction broadcast successful"
                );

                self.stats.successes.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_broadcast("success", elapsed.as_secs_f64());

                self.drain_in_background(report_rx, tx_hash, failed.len() + 1, total);

                return Ok(BroadcastResult::Success {
                    tx_hash,
                    endpoint: report.endpoint,
                    elapsed,
                });
            }
            failed.push(report);
        }

        // Every sender is gone; an attempt that never reported died with its task
        for (index, endpoint) in self.pool.iter() {
            if !failed.iter().any(|o| o.endpoint == index) {
                failed.push(EndpointOutcome {
                    endpoint: index,
                    url: endpoint.url().to_string(),
                    outcome: SubmissionOutcome::Rejected(SubmitError::new(
                        SubmitErrorKind::Connection,
                        "submission task ended without reporting",
                    )),
                    elapsed: started.elapsed(),
                });
            }
        }
        failed.sort_by_key(|o| o.endpoint);

        let elapsed = started.elapsed();
        warn!(
            tx_hash = ?local_hash,
            elapsed_ms = elapsed.as_millis() as u64,
            "All {} endpoints failed to broadcast transaction",
            total
        );
        self.stats.failures.fetch_add(1, Ordering::Relaxed);
        self.stats.settled.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_broadcast("failure", elapsed.as_secs_f64());

        Ok(BroadcastResult::Failure { outcomes: failed })
    }

    /// Let stragglers finish and log the final tally
    fn drain_in_background(
        &self,
        mut report_rx: mpsc::UnboundedReceiver<EndpointOutcome>,
        tx_hash: H256,
        settled: usize,
        total: usize,
    ) {
        let stats = Arc::clone(&self.stats);

        tokio::spawn(async move {
            let mut accepted = 1;
            let mut settled = settled;

            while let Some(report) = report_rx.recv().await {
                settled += 1;
                if report.outcome.is_accepted() {
                    accepted += 1;
                }
            }

            // Attempts that died without reporting count as settled failures
            if settled < total {
                debug!(?tx_hash, "{} attempts ended without reporting", total - settled);
            }

            stats.settled.fetch_add(1, Ordering::Relaxed);
            info!(
                ?tx_hash,
                accepted,
                total,
                "Final: {}/{} endpoints accepted tx",
                accepted,
                total
            );
        });
    }
}

fn log_outcome(report: &EndpointOutcome) {
    let elapsed_ms = report.elapsed.as_millis() as u64;
    match &report.outcome {
        SubmissionOutcome::Accepted(hash) => info!(
            endpoint = report.endpoint,
            url = %report.url,
            elapsed_ms,
            ?hash,
            "Endpoint accepted tx"
        ),
        SubmissionOutcome::Rejected(e) => warn!(
            endpoint = report.endpoint,
            url = %report.url,
            elapsed_ms,
            kind = %e.kind,
            "Endpoint rejected tx: {}",
            e.message
        ),
        SubmissionOutcome::TimedOut => warn!(
            endpoint = report.endpoint,
            url = %report.url,
            elapsed_ms,
            "Endpoint timed out"
        ),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chain::endpoint::TxEndpoint;
    use crate::tx::signed::tests::signed_fixture;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Scripted endpoint: waits, then answers (or crashes)
    pub(crate) struct FakeEndpoint {
        url: String,
        delay: Duration,
        response: Result<H256, SubmitError>,
        panics: bool,
        pub(crate) calls: AtomicUsize,
        pub(crate) completed: AtomicUsize,
    }

    impl FakeEndpoint {
        pub(crate) fn accepting(delay_ms: u64, hash: H256) -> Arc<Self> {
            Self::build(delay_ms, Ok(hash))
        }

        pub(crate) fn rejecting(delay_ms: u64, message: &str) -> Arc<Self> {
            Self::build(delay_ms, Err(SubmitError::from_message(message)))
        }

        pub(crate) fn failing(delay_ms: u64, error: SubmitError) -> Arc<Self> {
            Self::build(delay_ms, Err(error))
        }

        pub(crate) fn panicking(delay_ms: u64) -> Arc<Self> {
            let mut endpoint = Self::new(delay_ms, Err(SubmitError::from_message("unused")));
            endpoint.panics = true;
            Arc::new(endpoint)
        }

        fn build(delay_ms: u64, response: Result<H256, SubmitError>) -> Arc<Self> {
            Arc::new(Self::new(delay_ms, response))
        }

        fn new(delay_ms: u64, response: Result<H256, SubmitError>) -> Self {
            Self {
                url: format!("http://fake-{}", delay_ms),
                delay: Duration::from_millis(delay_ms),
                response,
                panics: false,
                calls: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TxEndpoint for FakeEndpoint {
        fn url(&self) -> &str {
            &self.url
        }

        async fn send_raw(&self, raw_hex: String) -> Result<H256, SubmitError> {
            assert!(raw_hex.starts_with("0x"));
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.panics {
                panic!("endpoint client crashed");
            }
            self.completed.fetch_add(1, Ordering::SeqCst);
            self.response.clone()
        }
    }

    pub(crate) fn pool_of(endpoints: &[Arc<FakeEndpoint>]) -> Arc<EndpointPool> {
        let endpoints = endpoints
            .iter()
            .map(|e| e.clone() as Arc<dyn TxEndpoint>)
            .collect();
        Arc::new(EndpointPool::new(endpoints).unwrap())
    }

    const TIMEOUT: Duration = Duration::from_millis(5_000);

    #[tokio::test(start_paused = true)]
    async fn test_first_acceptance_wins_without_waiting() {
        let winner = H256::from_low_u64_be(0xabc);
        let slow = FakeEndpoint::accepting(10_000, H256::from_low_u64_be(0x1));
        let fast = FakeEndpoint::accepting(50, winner);
        let rejecting = FakeEndpoint::rejecting(100, "insufficient funds for gas * price + value");
        let coordinator = BroadcastCoordinator::new(pool_of(&[slow.clone(), fast, rejecting]));
        let tx = signed_fixture(0).await;

        let started = Instant::now();
        let result = coordinator.broadcast(&tx, TIMEOUT).await.unwrap();

        match result {
            BroadcastResult::Success {
                tx_hash, endpoint, ..
            } => {
                assert_eq!(tx_hash, winner);
                assert_eq!(endpoint, 1);
            }
            other => panic!("expected success, got {:?}", other),
        }
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(50) && elapsed < Duration::from_millis(100));

        // Stragglers keep running in the background and settle under their timeout
        tokio::time::sleep(Duration::from_secs(6)).await;
        let stats = coordinator.stats().snapshot();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.timed_out, 1);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.settled, 1);
        assert_eq!(slow.completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_nonce_rejections_fail_with_every_outcome() {
        let endpoints = [
            FakeEndpoint::rejecting(30, "nonce too low"),
            FakeEndpoint::rejecting(10, "nonce too low"),
            FakeEndpoint::rejecting(20, "nonce too low"),
        ];
        let coordinator = BroadcastCoordinator::new(pool_of(&endpoints));
        let tx = signed_fixture(3).await;

        let result = coordinator.broadcast(&tx, TIMEOUT).await.unwrap();

        let BroadcastResult::Failure { ref outcomes } = result else {
            panic!("expected failure, got {:?}", result);
        };
        assert_eq!(outcomes.len(), 3);
        let order: Vec<usize> = outcomes.iter().map(|o| o.endpoint).collect();
        assert_eq!(order, vec![0, 1, 2]);
        for o in outcomes {
            match &o.outcome {
                SubmissionOutcome::Rejected(e) => {
                    assert_eq!(e.kind, SubmitErrorKind::NonceTooLow)
                }
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        assert!(result.has_nonce_conflict());
        assert!(!result.is_ambiguous());
        assert_eq!(coordinator.stats().snapshot().failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_waits_for_every_endpoint() {
        let endpoints = [
            FakeEndpoint::rejecting(10, "transaction underpriced"),
            FakeEndpoint::accepting(60_000, H256::zero()),
        ];
        let coordinator = BroadcastCoordinator::new(pool_of(&endpoints));
        let tx = signed_fixture(0).await;

        let started = Instant::now();
        let result = coordinator.broadcast(&tx, TIMEOUT).await.unwrap();

        // Not reported before the slow endpoint's own timeout expired
        let elapsed = started.elapsed();
        assert!(elapsed >= TIMEOUT && elapsed < TIMEOUT + Duration::from_millis(100));
        let BroadcastResult::Failure { ref outcomes } = result else {
            panic!("expected failure");
        };
        assert_eq!(outcomes[1].outcome, SubmissionOutcome::TimedOut);
        assert!(result.is_ambiguous());
        assert!(!result.has_nonce_conflict());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_acceptance_does_not_change_result() {
        let first = H256::from_low_u64_be(1);
        let endpoints = [
            FakeEndpoint::accepting(20, first),
            FakeEndpoint::accepting(40, H256::from_low_u64_be(2)),
        ];
        let coordinator = BroadcastCoordinator::new(pool_of(&endpoints));
        let tx = signed_fixture(0).await;

        let result = coordinator.broadcast(&tx, TIMEOUT).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(matches!(result, BroadcastResult::Success { tx_hash, .. } if tx_hash == first));
        let stats = coordinator.stats().snapshot();
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.settled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_are_ambiguous() {
        let endpoints = [FakeEndpoint::failing(
            5,
            SubmitError::new(SubmitErrorKind::Connection, "connection reset by peer"),
        )];
        let coordinator = BroadcastCoordinator::new(pool_of(&endpoints));
        let tx = signed_fixture(0).await;

        let result = coordinator.broadcast(&tx, TIMEOUT).await.unwrap();
        assert!(matches!(result, BroadcastResult::Failure { .. }));
        assert!(result.is_ambiguous());
    }

    #[tokio::test]
    async fn test_zero_timeout_is_a_precondition_fault() {
        let endpoints = [FakeEndpoint::accepting(0, H256::zero())];
        let coordinator = BroadcastCoordinator::new(pool_of(&endpoints));
        let tx = signed_fixture(0).await;

        let err = coordinator.broadcast(&tx, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, SniperError::Config(_)));
        assert_eq!(endpoints[0].calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_known_counts_as_acceptance() {
        let endpoints = [
            FakeEndpoint::rejecting(10, "already known"),
            FakeEndpoint::accepting(60_000, H256::zero()),
        ];
        let coordinator = BroadcastCoordinator::new(pool_of(&endpoints));
        let tx = signed_fixture(5).await;

        let started = Instant::now();
        let result = coordinator.broadcast(&tx, TIMEOUT).await.unwrap();

        match result {
            BroadcastResult::Success {
                tx_hash, endpoint, ..
            } => {
                assert_eq!(tx_hash, tx.local_hash());
                assert_eq!(endpoint, 0);
            }
            other => panic!("expected success, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashed_attempt_does_not_block_winner() {
        let winner = H256::from_low_u64_be(7);
        let endpoints = [FakeEndpoint::panicking(5), FakeEndpoint::accepting(20, winner)];
        let coordinator = BroadcastCoordinator::new(pool_of(&endpoints));
        let tx = signed_fixture(0).await;

        let result = coordinator.broadcast(&tx, TIMEOUT).await.unwrap();
        assert!(matches!(result, BroadcastResult::Success { tx_hash, endpoint: 1, .. } if tx_hash == winner));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = coordinator.stats().snapshot();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.settled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashed_attempt_is_reported_as_connection_failure() {
        let endpoints = [
            FakeEndpoint::panicking(5),
            FakeEndpoint::rejecting(10, "transaction underpriced"),
        ];
        let coordinator = BroadcastCoordinator::new(pool_of(&endpoints));
        let tx = signed_fixture(0).await;

        let result = coordinator.broadcast(&tx, TIMEOUT).await.unwrap();

        let BroadcastResult::Failure { ref outcomes } = result else {
            panic!("expected failure, got {:?}", result);
        };
        assert_eq!(outcomes.len(), 2);
        match &outcomes[0].outcome {
            SubmissionOutcome::Rejected(e) => assert_eq!(e.kind, SubmitErrorKind::Connection),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(outcomes[0].endpoint, 0);
        assert_eq!(outcomes[1].endpoint, 1);
        // Nobody can say whether the crashed client sent the payload
        assert!(result.is_ambiguous());
    }
}
