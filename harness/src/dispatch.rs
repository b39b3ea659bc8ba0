// File: harness/src/dispatch.rs
//
// Dispatch Pool
//
// Spreads a batch of encoded transactions over k submission channels by
// round-robin and submits them concurrently, one task per channel. The call
// returns only after every channel has finished (barrier), with one outcome
// per item. Failures are recorded per item and never escalated.

use crate::error::{HarnessError, HarnessResult};
use crate::ledger::{connect_all, ClientFactory, LedgerClient};
use crate::orchestrator::CancelToken;
use crate::transaction::Batch;
use futures::FutureExt;
use log::{debug, info};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

/// One item of a dispatch round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchTicket {
    /// Position of the item in the dispatched batch
    pub index: usize,
    pub encoded: Vec<u8>,
    pub channel: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Accepted,
    Failed(HarnessError),
    /// Never issued because the run was cancelled first
    NotAttempted,
}

impl SubmissionOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// Indexed like the dispatched items
    pub outcomes: Vec<SubmissionOutcome>,
    /// Items assigned to each channel
    pub per_channel: Vec<usize>,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl DispatchReport {
    pub fn accepted(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_accepted()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, SubmissionOutcome::Failed(_)))
            .count()
    }

    pub fn not_attempted(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, SubmissionOutcome::NotAttempted))
            .count()
    }

    /// Indices and errors of failed items
    pub fn failures(&self) -> impl Iterator<Item = (usize, &HarnessError)> {
        self.outcomes.iter().enumerate().filter_map(|(i, o)| match o {
            SubmissionOutcome::Failed(e) => Some((i, e)),
            _ => None,
        })
    }
}

/// Assign `items` to `k` channels round-robin: item i goes to channel i mod k,
/// so no channel receives more than ceil(m / k) items.
pub fn assign(items: Vec<Vec<u8>>, k: usize) -> Vec<DispatchTicket> {
    let k = k.max(1);
    items
        .into_iter()
        .enumerate()
        .map(|(index, encoded)| DispatchTicket {
            index,
            encoded,
            channel: index % k,
        })
        .collect()
}

pub struct DispatchPool {
    channels: Vec<Arc<dyn LedgerClient>>,
    cancel: CancelToken,
}

impl DispatchPool {
    pub fn new(channels: Vec<Arc<dyn LedgerClient>>) -> HarnessResult<Self> {
        if channels.is_empty() {
            return Err(HarnessError::Ledger(
                "dispatch pool needs at least one channel".to_string(),
            ));
        }
        Ok(Self {
            channels,
            cancel: CancelToken::never(),
        })
    }

    /// Open `k` channels through `factory`
    pub fn connect(factory: &dyn ClientFactory, k: usize) -> HarnessResult<Self> {
        Self::new(connect_all(factory, k)?)
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Number of channels k
    pub fn concurrency(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, index: usize) -> &Arc<dyn LedgerClient> {
        &self.channels[index % self.channels.len()]
    }

    /// Submit one batch and wait for every submission attempt to finish
    pub async fn dispatch_batch(&self, batch: &Batch) -> DispatchReport {
        if log::log_enabled!(log::Level::Debug) {
            debug!(
                "[DISPATCH] Batch {} with {} transactions",
                batch.sequence(),
                batch.len()
            );
        }
        self.dispatch(batch.encode_all()).await
    }

    pub async fn dispatch(&self, items: Vec<Vec<u8>>) -> DispatchReport {
        let started = Instant::now();
        let k = self.channels.len();
        let m = items.len();

        let mut lanes: Vec<Vec<DispatchTicket>> = vec![Vec::new(); k];
        for ticket in assign(items, k) {
            lanes[ticket.channel].push(ticket);
        }

        let mut report = DispatchReport {
            outcomes: vec![SubmissionOutcome::NotAttempted; m],
            per_channel: lanes.iter().map(|lane| lane.len()).collect(),
            ..Default::default()
        };

        let mut join_set = JoinSet::new();
        for (channel, lane) in lanes.into_iter().enumerate() {
            if lane.is_empty() {
                continue;
            }
            let client = Arc::clone(&self.channels[channel]);
            let cancel = self.cancel.clone();
            join_set.spawn(run_lane(channel, client, lane, cancel));
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(results) => {
                    for (index, outcome) in results {
                        report.outcomes[index] = outcome;
                    }
                }
                Err(e) => {
                    log::error!("[DISPATCH] Channel task join ERROR: {:?}", e);
                }
            }
        }

        report.cancelled = self.cancel.is_cancelled();
        if !report.cancelled {
            // a lost lane must not look like a cancelled one
            for outcome in report.outcomes.iter_mut() {
                if *outcome == SubmissionOutcome::NotAttempted {
                    *outcome = SubmissionOutcome::Failed(HarnessError::Submission(
                        "channel task terminated".to_string(),
                    ));
                }
            }
        }
        report.elapsed = started.elapsed();

        info!(
            "[DISPATCH] {} items over {} channels: {} accepted, {} failed, {} not attempted in {:?}",
            m,
            k,
            report.accepted(),
            report.failed(),
            report.not_attempted(),
            report.elapsed
        );
        report
    }
}

async fn run_lane(
    channel: usize,
    client: Arc<dyn LedgerClient>,
    lane: Vec<DispatchTicket>,
    cancel: CancelToken,
) -> Vec<(usize, SubmissionOutcome)> {
    let mut results = Vec::with_capacity(lane.len());
    for ticket in lane {
        if cancel.is_cancelled() {
            results.push((ticket.index, SubmissionOutcome::NotAttempted));
            continue;
        }

        let outcome = match AssertUnwindSafe(client.submit(&ticket.encoded))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => SubmissionOutcome::Accepted,
            Ok(Err(e)) => {
                if log::log_enabled!(log::Level::Debug) {
                    debug!(
                        "[DISPATCH] Channel {} item {} failed: {}",
                        channel, ticket.index, e
                    );
                }
                SubmissionOutcome::Failed(e)
            }
            Err(payload) => {
                let message = if let Some(&message) = payload.downcast_ref::<&str>() {
                    message.to_string()
                } else if let Some(message) = payload.downcast_ref::<String>() {
                    message.clone()
                } else {
                    "Unknown panic payload".to_string()
                };
                log::error!(
                    "[DISPATCH] Channel {} panicked on item {}: {}",
                    channel,
                    ticket.index,
                    message
                );
                SubmissionOutcome::Failed(HarnessError::Submission(format!(
                    "submission panicked: {}",
                    message
                )))
            }
        };
        results.push((ticket.index, outcome));
    }
    results
}
