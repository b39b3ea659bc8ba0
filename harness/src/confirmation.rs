// File: harness/src/confirmation.rs
//
// Confirmation Tracking
//
// Polls the ledger's inclusion query for a set of hashes until each reaches a
// terminal state, the timeout elapses, or the run is cancelled. Each hash is
// tracked independently:
//
//   Pending -> Included   (success)
//   Pending -> Rejected   (permanent ledger refusal)
//   Pending -> TimedOut   (bound exhausted)
//
// A cancelled run leaves unresolved hashes in Pending and flags the report.

use crate::crypto::Hash;
use crate::error::{HarnessError, HarnessResult};
use crate::ledger::{InclusionStatus, LedgerClient};
use crate::orchestrator::{CancelToken, Clock};
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Status queries issued concurrently per poll round
const QUERY_CONCURRENCY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashState {
    Pending,
    Included,
    Rejected(String),
    TimedOut,
}

impl HashState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Outcome for one submitted hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationResult {
    pub hash: Hash,
    pub state: HashState,
}

impl ConfirmationResult {
    pub fn included(&self) -> bool {
        self.state == HashState::Included
    }

    /// Terminal failure of this hash, if any
    pub fn error(&self) -> Option<HarnessError> {
        match &self.state {
            HashState::Rejected(reason) => Some(HarnessError::Rejection {
                hash: self.hash,
                reason: reason.clone(),
            }),
            HashState::TimedOut => Some(HarnessError::Timeout { hash: self.hash }),
            HashState::Pending | HashState::Included => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfirmationReport {
    /// One entry per distinct hash, in the order the hashes were given
    pub results: Vec<ConfirmationResult>,
    /// The run was cancelled before every hash was resolved
    pub cancelled: bool,
    /// Polling stopped at the first permanent failure
    pub stopped_early: bool,
    pub polls: u64,
    pub elapsed: Duration,
}

impl ConfirmationReport {
    /// Success iff every hash was included
    pub fn all_included(&self) -> bool {
        self.results.iter().all(|r| r.included())
    }

    pub fn included_count(&self) -> usize {
        self.results.iter().filter(|r| r.included()).count()
    }

    pub fn pending(&self) -> impl Iterator<Item = &ConfirmationResult> {
        self.results.iter().filter(|r| r.state == HashState::Pending)
    }

    pub fn failures(&self) -> impl Iterator<Item = HarnessError> + '_ {
        self.results.iter().filter_map(|r| r.error())
    }

    pub fn into_result(self) -> HarnessResult<()> {
        if let Some(err) = self.failures().next() {
            return Err(err);
        }
        if self.cancelled {
            return Err(HarnessError::Cancelled);
        }
        Ok(())
    }
}

pub struct ConfirmationTracker {
    client: Arc<dyn LedgerClient>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    timeout: Duration,
    cancel: CancelToken,
}

impl ConfirmationTracker {
    pub fn new(client: Arc<dyn LedgerClient>, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            clock,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            cancel: CancelToken::never(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Resolve every hash and report all of them
    pub async fn track(&self, hashes: &[Hash]) -> ConfirmationReport {
        self.poll(hashes, false).await
    }

    /// Like `track`, but stop polling at the first rejected hash
    pub async fn track_fail_fast(&self, hashes: &[Hash]) -> ConfirmationReport {
        self.poll(hashes, true).await
    }

    /// Wait until every hash is included, failing on the first hash that is
    /// rejected or still unresolved at the timeout
    pub async fn wait_all(&self, hashes: &[Hash]) -> HarnessResult<()> {
        self.track_fail_fast(hashes).await.into_result()
    }

    async fn poll(&self, hashes: &[Hash], fail_fast: bool) -> ConfirmationReport {
        let start = self.clock.now();
        let deadline = start + self.timeout;

        let mut seen = HashSet::with_capacity(hashes.len());
        let mut results: Vec<ConfirmationResult> = hashes
            .iter()
            .filter(|hash| seen.insert(**hash))
            .map(|hash| ConfirmationResult {
                hash: *hash,
                state: HashState::Pending,
            })
            .collect();

        let mut report = ConfirmationReport::default();
        if log::log_enabled!(log::Level::Debug) {
            debug!(
                "[CONFIRM] Tracking {} hashes (interval {:?}, timeout {:?})",
                results.len(),
                self.poll_interval,
                self.timeout
            );
        }

        loop {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let pending: Vec<usize> = results
                .iter()
                .enumerate()
                .filter(|(_, r)| r.state == HashState::Pending)
                .map(|(i, _)| i)
                .collect();
            if pending.is_empty() {
                break;
            }

            report.polls += 1;
            let statuses: Vec<(usize, HarnessResult<InclusionStatus>)> = stream::iter(pending)
                .map(|i| {
                    let client = &self.client;
                    let hash = results[i].hash;
                    async move { (i, client.inclusion_status(&hash).await) }
                })
                .buffer_unordered(QUERY_CONCURRENCY)
                .collect()
                .await;

            let mut rejected = false;
            for (i, status) in statuses {
                match status {
                    Ok(InclusionStatus::Included) => results[i].state = HashState::Included,
                    Ok(InclusionStatus::Rejected(reason)) => {
                        warn!("[CONFIRM] {} rejected: {}", results[i].hash, reason);
                        results[i].state = HashState::Rejected(reason);
                        rejected = true;
                    }
                    Ok(InclusionStatus::Pending) | Ok(InclusionStatus::Unknown) => {}
                    Err(e) => {
                        // transient: retried on the next poll
                        debug!("[CONFIRM] Status query for {} failed: {}", results[i].hash, e);
                    }
                }
            }

            if fail_fast && rejected {
                report.stopped_early = true;
                break;
            }
            if results.iter().all(|r| r.state.is_terminal()) {
                break;
            }

            let now = self.clock.now();
            if now >= deadline {
                for result in results.iter_mut().filter(|r| r.state == HashState::Pending) {
                    result.state = HashState::TimedOut;
                }
                break;
            }

            let wait = self.poll_interval.min(deadline - now);
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                _ = self.clock.sleep(wait) => {}
            }
        }

        report.results = results;
        report.elapsed = self.clock.now() - start;

        info!(
            "[CONFIRM] {}/{} included after {} polls in {:?}{}",
            report.included_count(),
            report.results.len(),
            report.polls,
            report.elapsed,
            if report.cancelled { " (cancelled)" } else { "" }
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Address;
    use crate::orchestrator::{CancelSignal, PausedClock};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use primitive_types::U256;
    use std::collections::HashMap;

    /// Ledger whose inclusion answers are scripted per hash: the n-th query of
    /// a hash returns the n-th scripted status, the last one repeating.
    #[derive(Default)]
    struct ScriptedLedger {
        scripts: Mutex<HashMap<Hash, Vec<InclusionStatus>>>,
        queries: Mutex<HashMap<Hash, usize>>,
    }

    impl ScriptedLedger {
        fn script(&self, hash: Hash, statuses: Vec<InclusionStatus>) {
            self.scripts.lock().insert(hash, statuses);
        }
    }

    #[async_trait]
    impl LedgerClient for ScriptedLedger {
        async fn submit(&self, _encoded: &[u8]) -> HarnessResult<()> {
            Ok(())
        }

        async fn get_nonce(&self, _address: &Address) -> HarnessResult<u64> {
            Ok(0)
        }

        async fn get_balance(&self, _address: &Address) -> HarnessResult<U256> {
            Ok(U256::zero())
        }

        async fn inclusion_status(&self, hash: &Hash) -> HarnessResult<InclusionStatus> {
            let mut queries = self.queries.lock();
            let n = queries.entry(*hash).or_default();
            let scripts = self.scripts.lock();
            let Some(script) = scripts.get(hash) else {
                return Ok(InclusionStatus::Unknown);
            };
            let status = script
                .get(*n)
                .or_else(|| script.last())
                .cloned()
                .unwrap_or(InclusionStatus::Unknown);
            *n += 1;
            Ok(status)
        }
    }

    fn h(byte: u8) -> Hash {
        Hash::new([byte; 32])
    }

    fn tracker(ledger: Arc<ScriptedLedger>) -> ConfirmationTracker {
        ConfirmationTracker::new(ledger, Arc::new(PausedClock::new()))
            .with_poll_interval(Duration::from_millis(100))
            .with_timeout(Duration::from_secs(2))
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_included_after_some_polls() {
        let ledger = Arc::new(ScriptedLedger::default());
        ledger.script(h(1), vec![InclusionStatus::Included]);
        ledger.script(
            h(2),
            vec![
                InclusionStatus::Unknown,
                InclusionStatus::Pending,
                InclusionStatus::Included,
            ],
        );

        let report = tracker(ledger).track(&[h(1), h(2)]).await;
        assert!(report.all_included());
        assert_eq!(report.polls, 3);
        assert!(!report.cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aggregate_reports_every_hash() {
        let ledger = Arc::new(ScriptedLedger::default());
        ledger.script(h(1), vec![InclusionStatus::Included]);
        ledger.script(h(2), vec![InclusionStatus::Rejected("nonce conflict".into())]);
        ledger.script(h(3), vec![InclusionStatus::Pending]);

        let report = tracker(ledger).track(&[h(1), h(2), h(3)]).await;

        assert_eq!(report.results.len(), 3);
        assert_eq!(report.results[0].state, HashState::Included);
        assert_eq!(report.results[1].state, HashState::Rejected("nonce conflict".into()));
        assert_eq!(report.results[2].state, HashState::TimedOut);
        assert!(report.results.iter().all(|r| r.state.is_terminal()));
        assert_eq!(report.failures().count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_on_rejection() {
        let ledger = Arc::new(ScriptedLedger::default());
        ledger.script(h(1), vec![InclusionStatus::Pending]);
        ledger.script(
            h(2),
            vec![InclusionStatus::Pending, InclusionStatus::Rejected("bad".into())],
        );

        let err = tracker(ledger).wait_all(&[h(1), h(2)]).await.unwrap_err();
        assert_eq!(
            err,
            HarnessError::Rejection {
                hash: h(2),
                reason: "bad".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_on_timeout() {
        let ledger = Arc::new(ScriptedLedger::default());
        ledger.script(h(1), vec![InclusionStatus::Included]);

        let clock = Arc::new(PausedClock::new());
        let start = clock.now();
        let err = ConfirmationTracker::new(ledger, clock.clone())
            .with_timeout(Duration::from_secs(5))
            .wait_all(&[h(1), h(9)])
            .await
            .unwrap_err();

        assert_eq!(err, HarnessError::Timeout { hash: h(9) });
        assert!(clock.now() - start >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_reports_partial_results() {
        let ledger = Arc::new(ScriptedLedger::default());
        ledger.script(h(1), vec![InclusionStatus::Included]);
        ledger.script(h(2), vec![InclusionStatus::Pending]);

        let signal = CancelSignal::new();
        let tracker = tracker(ledger)
            .with_timeout(Duration::from_secs(3600))
            .with_cancel(signal.token());

        let task = tokio::spawn(async move { tracker.track(&[h(1), h(2)]).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        signal.cancel();
        let report = task.await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.results[0].state, HashState::Included);
        assert_eq!(report.pending().count(), 1);
        assert!(!report.all_included());
        assert_eq!(report.into_result(), Err(HarnessError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_given_hashes_are_reported() {
        let ledger = Arc::new(ScriptedLedger::default());
        ledger.script(h(1), vec![InclusionStatus::Included]);
        ledger.script(h(5), vec![InclusionStatus::Included]);

        let report = tracker(ledger).track(&[h(1), h(1)]).await;
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].hash, h(1));
    }
}
