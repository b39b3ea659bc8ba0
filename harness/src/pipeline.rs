// File: harness/src/pipeline.rs
//
// Asynchronous Generation Pipeline
//
// Signs batches off the dispatch path. A producer task builds each batch on
// the blocking pool and publishes it on a bounded channel; when the consumer
// falls behind, the producer waits on the channel instead of buffering. The
// channel closes after the planned number of batches, on cancellation, or
// when the consumer goes away.

use crate::accounts::Account;
use crate::crypto::Address;
use crate::error::{HarnessError, HarnessResult};
use crate::orchestrator::{CancelToken, NonceTracker};
use crate::transaction::{Batch, SignedTransaction, TransactionFactory};
use log::{debug, info};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Who pays whom inside a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum TransferPattern {
    /// Even index pays the next odd index: 0->1, 2->3, ...
    Pairwise,
    /// Every account pays its successor, the last pays the first
    Ring,
}

impl TransferPattern {
    /// All `(sender, recipient)` index pairs for `n` accounts
    pub fn pairs(&self, n: usize) -> Vec<(usize, usize)> {
        match self {
            Self::Pairwise => (0..n / 2).map(|i| (2 * i, 2 * i + 1)).collect(),
            Self::Ring if n < 2 => Vec::new(),
            Self::Ring => (0..n).map(|i| (i, (i + 1) % n)).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationPlan {
    pub batch_count: usize,
    pub batch_size: usize,
    pub amount: U256,
    pub pattern: TransferPattern,
}

impl GenerationPlan {
    pub fn total(&self) -> usize {
        self.batch_count * self.batch_size
    }

    /// Pairs used by batch `sequence`. Consecutive batches walk round the
    /// pattern so senders are spread evenly; no sender repeats in a batch.
    fn batch_pairs(&self, pairs: &[(usize, usize)], sequence: usize) -> Vec<(usize, usize)> {
        let start = (sequence * self.batch_size) % pairs.len();
        pairs
            .iter()
            .cycle()
            .skip(start)
            .take(self.batch_size)
            .copied()
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationSummary {
    pub batches: usize,
    pub transactions: usize,
    pub cancelled: bool,
}

/// Consumer side of a running pipeline
pub struct GenerationHandle {
    batches: mpsc::Receiver<Batch>,
    task: Option<JoinHandle<HarnessResult<GenerationSummary>>>,
}

impl GenerationHandle {
    /// Next batch, or None once the producer has closed the channel
    pub async fn next_batch(&mut self) -> Option<Batch> {
        self.batches.recv().await
    }

    /// Close the channel, discard unread batches and wait for the producer
    pub async fn shutdown(&mut self) -> HarnessResult<GenerationSummary> {
        self.batches.close();
        while self.batches.recv().await.is_some() {}

        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| HarnessError::Encoding(format!("generation task failed: {}", e)))?,
            None => Ok(GenerationSummary::default()),
        }
    }

    /// Wait for the producer and return its summary
    pub async fn finish(mut self) -> HarnessResult<GenerationSummary> {
        self.shutdown().await
    }
}

pub struct GenerationPipeline {
    factory: TransactionFactory,
    accounts: Arc<Vec<Account>>,
    nonces: NonceTracker,
    capacity: usize,
    cancel: CancelToken,
}

impl GenerationPipeline {
    /// `nonces` must hold fresh ledger nonces for every sender of the plan
    pub fn new(
        factory: TransactionFactory,
        accounts: Arc<Vec<Account>>,
        nonces: NonceTracker,
        capacity: usize,
    ) -> Self {
        Self {
            factory,
            accounts,
            nonces,
            capacity: capacity.max(1),
            cancel: CancelToken::never(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Start producing `plan` in the background
    pub fn spawn(self, plan: GenerationPlan) -> HarnessResult<GenerationHandle> {
        let pairs = plan.pattern.pairs(self.accounts.len());
        if plan.batch_size > pairs.len() {
            return Err(HarnessError::InsufficientAccounts {
                required: plan.batch_size,
                available: pairs.len(),
            });
        }

        let (sender, receiver) = mpsc::channel(self.capacity);
        let task = tokio::spawn(self.produce(plan, pairs, sender));
        Ok(GenerationHandle {
            batches: receiver,
            task: Some(task),
        })
    }

    async fn produce(
        mut self,
        plan: GenerationPlan,
        pairs: Vec<(usize, usize)>,
        sender: mpsc::Sender<Batch>,
    ) -> HarnessResult<GenerationSummary> {
        let mut summary = GenerationSummary::default();
        info!(
            "[PIPELINE] Producing {} batches of {} ({:?})",
            plan.batch_count, plan.batch_size, plan.pattern
        );

        for sequence in 0..plan.batch_count {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            if plan.batch_size == 0 {
                break;
            }

            let mut specs = Vec::with_capacity(plan.batch_size);
            for (from, to) in plan.batch_pairs(&pairs, sequence) {
                let account = self.accounts[from].clone();
                let nonce = self.nonces.reserve(&account.address)?;
                specs.push((account, nonce, self.accounts[to].address));
            }

            let factory = self.factory.clone();
            let amount = plan.amount;
            let batch = tokio::task::spawn_blocking(move || {
                sign_batch(&factory, sequence as u64, specs, amount)
            })
            .await
            .map_err(|e| HarnessError::Encoding(format!("signing task failed: {}", e)))??;

            let size = batch.len();
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    summary.cancelled = true;
                    break;
                }
                sent = sender.send(batch) => {
                    if sent.is_err() {
                        debug!("[PIPELINE] Consumer dropped, stopping after {} batches", summary.batches);
                        break;
                    }
                }
            }

            summary.batches += 1;
            summary.transactions += size;
            if log::log_enabled!(log::Level::Debug) {
                debug!("[PIPELINE] Batch {} published ({} txs)", sequence, size);
            }
        }

        info!(
            "[PIPELINE] Produced {} batches, {} transactions{}",
            summary.batches,
            summary.transactions,
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        Ok(summary)
    }
}

fn sign_batch(
    factory: &TransactionFactory,
    sequence: u64,
    specs: Vec<(Account, u64, Address)>,
    amount: U256,
) -> HarnessResult<Batch> {
    let transactions: Vec<SignedTransaction> = specs
        .iter()
        .map(|(account, nonce, recipient)| factory.transfer(account, *nonce, *recipient, amount))
        .collect::<HarnessResult<_>>()?;
    Batch::from_transactions(sequence, transactions)
}
