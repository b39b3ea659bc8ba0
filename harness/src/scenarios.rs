// File: harness/src/scenarios.rs
//
// Scenario Driver
//
// Harness wires the stages together for one run context:
//
//   AccountProvisioner -> FundDistributor -> GenerationPipeline
//     -> DispatchPool -> ConfirmationTracker -> ConsistencyVerifier
//
// Each scenario consumes the previous stage's output and fails on its own
// without touching later stages' inputs.

use crate::accounts::{Account, AccountProvisioner, Keystore};
use crate::confirmation::{ConfirmationReport, ConfirmationTracker};
use crate::config::HarnessConfig;
use crate::crypto::{Address, Hash};
use crate::dispatch::{DispatchPool, SubmissionOutcome};
use crate::error::{HarnessError, HarnessResult};
use crate::funding::{FundDistributor, FundingReport};
use crate::invariants;
use crate::ledger::{ClientFactory, LedgerClient};
use crate::orchestrator::{CancelToken, Clock, NonceTracker, SystemClock};
use crate::pipeline::{GenerationHandle, GenerationPipeline, GenerationPlan, TransferPattern};
use crate::store::RecordStore;
use crate::transaction::{Batch, SignedTransaction, TransactionFactory};
use crate::verify::{snapshot_balances, ConsistencyVerifier, TransferRecord, VerificationReport};
use async_trait::async_trait;
use log::{info, warn};
use primitive_types::U256;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Size of each fake payload sent by the rejection scenario
pub const REJECTION_PAYLOAD_SIZE: usize = 4 * 1024;

#[derive(Debug, Clone, Default)]
pub struct ThroughputReport {
    /// Transactions confirmed as included
    pub count: usize,
    /// Transactions accepted at submission
    pub submitted: usize,
    pub not_attempted: usize,
    /// Accepted transactions with no terminal outcome (fail-fast stop or
    /// cancellation)
    pub pending: usize,
    /// Confirmation stopped at the first permanent failure
    pub stopped_early: bool,
    /// From first dispatch to last confirmation
    pub elapsed: Duration,
    /// Submission and confirmation failures
    pub failures: Vec<HarnessError>,
    pub cancelled: bool,
}

impl ThroughputReport {
    pub fn tps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.count as f64 / secs
    }

    pub fn print(&self) {
        println!("\n=== Throughput Report ===");
        println!("Included: {}/{}", self.count, self.submitted);
        println!("Failures: {}", self.failures.len());
        if self.not_attempted > 0 {
            println!("Not attempted: {}", self.not_attempted);
        }
        if self.pending > 0 {
            println!("Unresolved: {}", self.pending);
        }
        if self.stopped_early {
            println!("Confirmation stopped at the first failure");
        }
        println!("Duration: {:?}", self.elapsed);
        println!("Throughput: {:.2} tx/s", self.tps());
        if self.cancelled {
            println!("Run was cancelled");
        }
        for failure in self.failures.iter().take(10) {
            println!("  ✗ {}", failure);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    pub throughput: ThroughputReport,
    /// Included incoming transfers per recipient
    pub hits: BTreeMap<Address, usize>,
}

impl ReplayReport {
    pub fn print(&self) {
        self.throughput.print();
        println!("Recipients hit: {}", self.hits.len());
    }
}

#[derive(Debug, Clone, Default)]
pub struct RejectionReport {
    pub count: usize,
    pub rejected: usize,
    /// Fake payloads the ledger wrongly accepted
    pub accepted: usize,
    pub elapsed: Duration,
}

impl RejectionReport {
    pub fn all_rejected(&self) -> bool {
        self.rejected == self.count
    }

    pub fn print(&self) {
        println!("\n=== Rejection Report ===");
        println!("Rejected: {}/{}", self.rejected, self.count);
        println!("Duration: {:?}", self.elapsed);
    }
}

/// Something that hands out batches in dispatch order
#[async_trait]
pub trait BatchSource: Send {
    async fn next_batch(&mut self) -> Option<Batch>;

    /// Stop the source and surface any error it hit while producing
    async fn close(&mut self) -> HarnessResult<()> {
        Ok(())
    }
}

#[async_trait]
impl BatchSource for GenerationHandle {
    async fn next_batch(&mut self) -> Option<Batch> {
        GenerationHandle::next_batch(self).await
    }

    async fn close(&mut self) -> HarnessResult<()> {
        self.shutdown().await.map(|_| ())
    }
}

#[async_trait]
impl BatchSource for std::vec::IntoIter<Batch> {
    async fn next_batch(&mut self) -> Option<Batch> {
        self.next()
    }
}

/// What a dispatch-and-confirm run produced
struct RunOutcome {
    /// Accepted transactions in dispatch order
    accepted: Vec<SignedTransaction>,
    submission_failures: Vec<HarnessError>,
    not_attempted: usize,
    confirmation: ConfirmationReport,
    elapsed: Duration,
}

impl RunOutcome {
    fn into_report(self) -> ThroughputReport {
        let mut failures = self.submission_failures;
        failures.extend(self.confirmation.failures());
        ThroughputReport {
            count: self.confirmation.included_count(),
            submitted: self.accepted.len(),
            not_attempted: self.not_attempted,
            pending: self.confirmation.pending().count(),
            stopped_early: self.confirmation.stopped_early,
            elapsed: self.elapsed,
            failures,
            cancelled: self.confirmation.cancelled,
        }
    }
}

/// Group transactions into batches so the j-th transaction of every sender
/// lands in batch j. Each batch then holds one transaction per sender and
/// sender order is kept across batches.
pub fn batches_by_sender_order(
    transactions: impl IntoIterator<Item = SignedTransaction>,
) -> HarnessResult<Vec<Batch>> {
    let mut seen: HashMap<Address, usize> = HashMap::new();
    let mut batches: Vec<Batch> = Vec::new();
    for tx in transactions {
        let slot = seen.entry(*tx.sender()).or_default();
        if *slot == batches.len() {
            batches.push(Batch::new(*slot as u64));
        }
        batches[*slot].push(tx)?;
        *slot += 1;
    }
    Ok(batches)
}

pub struct Harness {
    config: HarnessConfig,
    keystore: Arc<dyn Keystore>,
    clients: Arc<dyn ClientFactory>,
    clock: Arc<dyn Clock>,
    cancel: CancelToken,
    store: RecordStore,
    accounts: Vec<Account>,
}

impl Harness {
    pub fn new(
        config: HarnessConfig,
        keystore: Arc<dyn Keystore>,
        clients: Arc<dyn ClientFactory>,
    ) -> Self {
        let store = RecordStore::new(&config.home);
        Self {
            config,
            keystore,
            clients,
            clock: Arc::new(SystemClock),
            cancel: CancelToken::never(),
            store,
            accounts: Vec::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Funded account pool used by transfer scenarios
    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn set_accounts(&mut self, accounts: Vec<Account>) {
        self.accounts = accounts;
    }

    pub fn factory(&self) -> TransactionFactory {
        TransactionFactory::new(Arc::clone(&self.keystore), self.config.gas_limit)
    }

    /// Client used for nonce, balance and inclusion queries
    pub fn query_client(&self) -> HarnessResult<Arc<dyn LedgerClient>> {
        self.clients.connect(0)
    }

    fn tracker(&self) -> HarnessResult<ConfirmationTracker> {
        Ok(
            ConfirmationTracker::new(self.query_client()?, Arc::clone(&self.clock))
                .with_poll_interval(self.config.poll_interval())
                .with_timeout(self.config.confirmation_timeout())
                .with_cancel(self.cancel.clone()),
        )
    }

    fn pool(&self, k: usize) -> HarnessResult<DispatchPool> {
        Ok(DispatchPool::connect(self.clients.as_ref(), k)?.with_cancel(self.cancel.clone()))
    }

    fn account_by_address(&self, address: &Address) -> HarnessResult<&Account> {
        self.accounts
            .iter()
            .find(|a| &a.address == address)
            .ok_or_else(|| HarnessError::keystore(None, format!("no credential for {}", address)))
    }

    /// Provision `target_count` accounts and fund them from `seed`
    pub async fn run_funding_scenario(
        &mut self,
        seed: &Account,
        target_count: usize,
    ) -> HarnessResult<FundingReport> {
        let provisioner = AccountProvisioner::new(Arc::clone(&self.keystore));
        let provisioned = provisioner.provision(target_count, 0);
        if !provisioned.is_complete() {
            warn!(
                "[FUNDING] Only {}/{} accounts provisioned",
                provisioned.accounts.len(),
                target_count
            );
        }
        let targets = provisioned.into_result()?;

        let client = self.query_client()?;
        let distributor = FundDistributor::new(
            client,
            self.factory(),
            self.pool(self.config.concurrency)?,
            self.tracker()?,
        );
        let report = distributor.distribute(seed, &targets).await?;

        provisioner
            .persist(&report.funded, &self.store, &self.config.accounts_file)
            .await?;
        self.accounts = report.funded.clone();
        Ok(report)
    }

    /// Load the account snapshot if it holds at least `n` accounts, otherwise
    /// provision, fund and persist a new pool
    pub async fn prepare_accounts(
        &mut self,
        n: usize,
        seed: &Account,
    ) -> HarnessResult<&[Account]> {
        let provisioner = AccountProvisioner::new(Arc::clone(&self.keystore));
        match provisioner.load(&self.store, &self.config.accounts_file).await {
            Ok(mut loaded) if loaded.len() >= n => {
                loaded.truncate(n);
                let client = self.query_client()?;
                let balances =
                    snapshot_balances(client.as_ref(), loaded.iter().map(|a| &a.address)).await?;
                self.accounts = loaded
                    .iter()
                    .map(|a| a.with_balance(balances.get(&a.address).copied().unwrap_or_default()))
                    .collect();
                info!("Reusing {} persisted accounts", self.accounts.len());
            }
            Ok(loaded) => {
                info!(
                    "Snapshot holds {} accounts, {} required: funding a new pool",
                    loaded.len(),
                    n
                );
                self.run_funding_scenario(seed, n).await?;
            }
            Err(HarnessError::NotFound { .. }) => {
                self.run_funding_scenario(seed, n).await?;
            }
            Err(e) => return Err(e),
        }
        Ok(&self.accounts)
    }

    /// Generate `batch_count` pairwise batches of `batch_size`, dispatch them
    /// over `k` channels and confirm them
    pub async fn run_throughput_scenario(
        &self,
        batch_size: usize,
        k: usize,
    ) -> HarnessResult<ThroughputReport> {
        let plan = GenerationPlan {
            batch_count: self.config.batch_count,
            batch_size,
            amount: U256::from(self.config.transfer_amount),
            pattern: TransferPattern::Pairwise,
        };
        let handle = self.spawn_pipeline(plan).await?;
        let outcome = self
            .dispatch_and_confirm(handle, k, self.config.fail_fast)
            .await?;

        let report = outcome.into_report();
        info!(
            "Throughput: {} of {} included in {:?} ({:.2} tx/s)",
            report.count,
            report.submitted,
            report.elapsed,
            report.tps()
        );
        Ok(report)
    }

    /// Apply `graph` and verify the resulting balances.
    ///
    /// Every sender must belong to the harness's account pool.
    pub async fn run_consistency_scenario(
        &self,
        graph: &[TransferRecord],
    ) -> HarnessResult<VerificationReport> {
        let client = self.query_client()?;
        let touched: Vec<Address> = {
            let mut addresses: Vec<Address> = graph
                .iter()
                .flat_map(|t| [t.sender, t.recipient])
                .collect();
            addresses.sort();
            addresses.dedup();
            addresses
        };
        let initial = snapshot_balances(client.as_ref(), &touched).await?;

        let mut nonces =
            NonceTracker::from_ledger(client.as_ref(), graph.iter().map(|t| &t.sender)).await?;
        let factory = self.factory();
        let mut transactions = Vec::with_capacity(graph.len());
        for transfer in graph {
            let sender = self.account_by_address(&transfer.sender)?;
            let nonce = nonces.reserve(&sender.address)?;
            transactions.push(factory.transfer(
                sender,
                nonce,
                transfer.recipient,
                transfer.amount,
            )?);
        }
        let batches = batches_by_sender_order(transactions)?;

        // balances are compared only once every hash has a terminal state,
        // so fail-fast is never used here
        let outcome = self
            .dispatch_and_confirm(batches.into_iter(), self.config.concurrency, false)
            .await?;
        if outcome.confirmation.cancelled || outcome.confirmation.pending().next().is_some() {
            return Err(HarnessError::Cancelled);
        }
        let failures: Vec<HarnessError> = outcome
            .submission_failures
            .iter()
            .cloned()
            .chain(outcome.confirmation.failures())
            .collect();
        for failure in &failures {
            warn!("[VERIFY] Transfer did not complete: {}", failure);
        }

        // every confirmation result is known at this point
        let mut verifier = ConsistencyVerifier::new(initial);
        verifier.extend(graph.iter().cloned());
        verifier.verify_against(client.as_ref()).await
    }

    /// Sign `tx_scale` pairwise transfers and store them as a snapshot
    pub async fn generate_transactions_file(&self) -> HarnessResult<PathBuf> {
        let pairs = TransferPattern::Pairwise.pairs(self.accounts.len()).len();
        if pairs == 0 {
            return Err(HarnessError::InsufficientAccounts {
                required: 2,
                available: self.accounts.len(),
            });
        }

        let scale = self.config.tx_scale;
        let plan = GenerationPlan {
            batch_count: (scale + pairs - 1) / pairs,
            batch_size: pairs,
            amount: U256::from(self.config.transfer_amount),
            pattern: TransferPattern::Pairwise,
        };
        let mut handle = self.spawn_pipeline(plan).await?;

        let mut transactions = Vec::with_capacity(scale);
        while let Some(batch) = handle.next_batch().await {
            transactions.extend(batch.into_transactions());
        }
        handle.finish().await?;
        transactions.truncate(scale);

        let path = self
            .store
            .write_snapshot(&self.config.transactions_file, &transactions)
            .await?;
        info!("Saved {} transactions to {}", transactions.len(), path.display());
        Ok(path)
    }

    /// Load the transaction snapshot, dispatch it over `k` channels and count
    /// included transfers per recipient
    pub async fn replay_transactions_file(&self, k: usize) -> HarnessResult<ReplayReport> {
        let name = &self.config.transactions_file;
        let transactions: Vec<SignedTransaction> = self.store.read_snapshot(name).await?;
        for tx in &transactions {
            tx.verify_integrity().map_err(|e| HarnessError::Corrupt {
                path: self.store.path(name),
                reason: e.to_string(),
            })?;
        }
        info!("Replaying {} transactions from {}", transactions.len(), name);

        let batches = batches_by_sender_order(transactions)?;
        let outcome = self
            .dispatch_and_confirm(batches.into_iter(), k, self.config.fail_fast)
            .await?;

        let mut hits = BTreeMap::new();
        let included: HashMap<Hash, bool> = outcome
            .confirmation
            .results
            .iter()
            .map(|r| (r.hash, r.included()))
            .collect();
        for tx in &outcome.accepted {
            if included.get(tx.hash()).copied().unwrap_or(false) {
                if let Some(recipient) = tx.recipient() {
                    *hits.entry(*recipient).or_insert(0) += 1;
                }
            }
        }

        Ok(ReplayReport {
            throughput: outcome.into_report(),
            hits,
        })
    }

    /// Send `count` undecodable payloads over `k` channels; each must be
    /// refused at submission
    pub async fn run_rejection_scenario(
        &self,
        count: usize,
        k: usize,
    ) -> HarnessResult<RejectionReport> {
        let items: Vec<Vec<u8>> = {
            let mut rng = rand::thread_rng();
            (0..count)
                .map(|_| {
                    let mut payload = vec![0u8; REJECTION_PAYLOAD_SIZE];
                    rng.fill(&mut payload[..]);
                    // no valid encoding starts with a zero version byte
                    payload[0] = 0;
                    payload
                })
                .collect()
        };

        let started = self.clock.now();
        let dispatched = self.pool(k)?.dispatch(items).await;
        let report = RejectionReport {
            count,
            rejected: dispatched.failed(),
            accepted: dispatched.accepted(),
            elapsed: self.clock.now() - started,
        };
        if report.accepted > 0 {
            warn!("Ledger accepted {} fake payloads", report.accepted);
        }
        Ok(report)
    }

    async fn spawn_pipeline(&self, plan: GenerationPlan) -> HarnessResult<GenerationHandle> {
        let pairs = plan.pattern.pairs(self.accounts.len());
        if pairs.is_empty() || plan.batch_size > pairs.len() {
            return Err(HarnessError::InsufficientAccounts {
                required: plan.batch_size.max(1) * 2,
                available: self.accounts.len(),
            });
        }

        let client = self.query_client()?;
        let senders: Vec<&Address> = pairs
            .iter()
            .map(|(from, _)| &self.accounts[*from].address)
            .collect();
        let nonces = NonceTracker::from_ledger(client.as_ref(), senders).await?;

        GenerationPipeline::new(
            self.factory(),
            Arc::new(self.accounts.clone()),
            nonces,
            self.config.channel_capacity,
        )
        .with_cancel(self.cancel.clone())
        .spawn(plan)
    }

    /// Dispatch batches in order, each behind the dispatch barrier, then
    /// confirm every accepted hash
    async fn dispatch_and_confirm<S: BatchSource>(
        &self,
        mut source: S,
        k: usize,
        fail_fast: bool,
    ) -> HarnessResult<RunOutcome> {
        let pool = self.pool(k)?;
        let tracker = self.tracker()?;
        let started = self.clock.now();

        let mut accepted = Vec::new();
        let mut submission_failures = Vec::new();
        let mut not_attempted = 0;

        while let Some(batch) = source.next_batch().await {
            let report = pool.dispatch_batch(&batch).await;
            for (tx, outcome) in batch.into_transactions().into_iter().zip(report.outcomes) {
                match outcome {
                    SubmissionOutcome::Accepted => accepted.push(tx),
                    SubmissionOutcome::Failed(e) => submission_failures.push(e),
                    SubmissionOutcome::NotAttempted => not_attempted += 1,
                }
            }
            if report.cancelled {
                break;
            }
        }
        source.close().await?;

        let hashes: Vec<Hash> = accepted.iter().map(|tx| *tx.hash()).collect();
        let confirmation = if fail_fast {
            tracker.track_fail_fast(&hashes).await
        } else {
            tracker.track(&hashes).await
        };
        if !confirmation.cancelled && !confirmation.stopped_early {
            if let Err(e) = invariants::check_terminal_outcomes(&hashes, &confirmation) {
                warn!("[CONFIRM] {}", e);
            }
        }

        Ok(RunOutcome {
            accepted,
            submission_failures,
            not_attempted,
            confirmation,
            elapsed: self.clock.now() - started,
        })
    }
}
