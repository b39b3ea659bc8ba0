// File: harness/src/funding.rs
//
// Logarithmic Fund Fan-out
//
// Funding N accounts one by one from a single seed serializes N transfers on
// the seed's nonce. Instead every funded account passes half of its balance
// on to one unfunded account per round, doubling the funded set:
//
//   seeding:  seed       -> acc[0]                       (half of seed)
//   round 1:  acc[0]     -> acc[1]
//   round 2:  acc[0..2]  -> acc[2..4]
//   round r:  acc[i]     -> acc[funded + i], i < min(funded, N - funded)
//
// Each round is dispatched concurrently and confirmed before the next one
// starts, since its nonces and balances come from the previous round.

use crate::accounts::Account;
use crate::confirmation::ConfirmationTracker;
use crate::dispatch::DispatchPool;
use crate::error::{HarnessError, HarnessResult};
use crate::ledger::LedgerClient;
use crate::transaction::{Batch, TransactionFactory};
use crate::verify::TransferRecord;
use log::{debug, info};
use primitive_types::U256;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct FundingReport {
    /// Target accounts with balances read after the last round
    pub funded: Vec<Account>,
    /// Seed account with its final balance
    pub seed: Option<Account>,
    /// Fan-out rounds after the seeding transfer, ceil(log2 N)
    pub rounds: usize,
    pub transfers: Vec<TransferRecord>,
    pub elapsed: Duration,
}

impl FundingReport {
    pub fn print(&self) {
        println!("\n=== Funding Report ===");
        println!("Accounts funded: {}", self.funded.len());
        println!("Fan-out rounds: {}", self.rounds);
        println!("Transfers: {}", self.transfers.len());
        println!("Duration: {:?}", self.elapsed);
    }
}

/// Number of fan-out rounds needed for `n` accounts
pub fn fan_out_rounds(n: usize) -> usize {
    if n <= 1 {
        0
    } else {
        (usize::BITS - (n - 1).leading_zeros()) as usize
    }
}

/// Destinations funded in one round: `(funder, destination)` index pairs
pub fn round_plan(funded: usize, total: usize) -> Vec<(usize, usize)> {
    let count = funded.min(total.saturating_sub(funded));
    (0..count).map(|i| (i, funded + i)).collect()
}

pub struct FundDistributor {
    client: Arc<dyn LedgerClient>,
    factory: TransactionFactory,
    pool: DispatchPool,
    tracker: ConfirmationTracker,
}

impl FundDistributor {
    pub fn new(
        client: Arc<dyn LedgerClient>,
        factory: TransactionFactory,
        pool: DispatchPool,
        tracker: ConfirmationTracker,
    ) -> Self {
        Self {
            client,
            factory,
            pool,
            tracker,
        }
    }

    /// Fund every account of `targets` from `seed`.
    ///
    /// Aborts with `Funding { round }` on the first transfer that fails to
    /// submit or confirm; nothing is retried.
    pub async fn distribute(
        &self,
        seed: &Account,
        targets: &[Account],
    ) -> HarnessResult<FundingReport> {
        let started = Instant::now();
        let mut report = FundingReport::default();

        if targets.is_empty() {
            return Ok(report);
        }

        info!(
            "[FUNDING] Distributing from {} to {} accounts in {} rounds",
            seed.address,
            targets.len(),
            fan_out_rounds(targets.len())
        );

        self.run_round(0, &[(seed, &targets[0])], &mut report).await?;

        let mut funded = 1;
        let mut round = 0;
        while funded < targets.len() {
            round += 1;
            let plan = round_plan(funded, targets.len());
            let pairs: Vec<(&Account, &Account)> = plan
                .iter()
                .map(|(from, to)| (&targets[*from], &targets[*to]))
                .collect();
            self.run_round(round, &pairs, &mut report).await?;
            funded += plan.len();
        }
        report.rounds = round;

        let mut accounts = Vec::with_capacity(targets.len());
        for account in targets {
            let balance = self
                .client
                .get_balance(&account.address)
                .await
                .map_err(|e| funding_error(round, e))?;
            accounts.push(account.with_balance(balance));
        }
        let seed_balance = self
            .client
            .get_balance(&seed.address)
            .await
            .map_err(|e| funding_error(round, e))?;

        report.funded = accounts;
        report.seed = Some(seed.with_balance(seed_balance));
        report.elapsed = started.elapsed();
        info!(
            "[FUNDING] Funded {} accounts in {} rounds ({:?})",
            report.funded.len(),
            report.rounds,
            report.elapsed
        );
        Ok(report)
    }

    async fn run_round(
        &self,
        round: usize,
        pairs: &[(&Account, &Account)],
        report: &mut FundingReport,
    ) -> HarnessResult<()> {
        let mut batch = Batch::new(round as u64);
        let mut transfers = Vec::with_capacity(pairs.len());

        for (from, to) in pairs {
            // fresh ledger state: the previous round changed both
            let balance = self
                .client
                .get_balance(&from.address)
                .await
                .map_err(|e| funding_error(round, e))?;
            let nonce = self
                .client
                .get_nonce(&from.address)
                .await
                .map_err(|e| funding_error(round, e))?;
            let amount = balance / U256::from(2u64);

            let tx = self
                .factory
                .transfer(from, nonce, to.address, amount)
                .map_err(|e| funding_error(round, e))?;
            if log::log_enabled!(log::Level::Debug) {
                debug!(
                    "[FUNDING] Round {}: #{} {} -> #{} {} amount {} nonce {}",
                    round, from.index, from.address, to.index, to.address, amount, nonce
                );
            }
            transfers.push(TransferRecord::new(from.address, to.address, amount));
            batch.push(tx).map_err(|e| funding_error(round, e))?;
        }

        let dispatched = self.pool.dispatch_batch(&batch).await;
        if let Some((index, err)) = dispatched.failures().next() {
            return Err(HarnessError::Funding {
                round,
                reason: format!("transfer {} not submitted: {}", index, err),
            });
        }
        if dispatched.cancelled {
            return Err(funding_error(round, HarnessError::Cancelled));
        }

        self.tracker
            .wait_all(&batch.hashes())
            .await
            .map_err(|e| funding_error(round, e))?;

        report.transfers.extend(transfers);
        Ok(())
    }
}

fn funding_error(round: usize, err: HarnessError) -> HarnessError {
    HarnessError::Funding {
        round,
        reason: err.to_string(),
    }
}
