// File: harness/src/ledger/memory.rs
//
// In-Process Ledger
//
// A minimal ledger used as the collaborator in tests and by the CLI. It
// authenticates submissions, queues them per sender by nonce and commits
// executable transactions when a block is produced. There is no consensus,
// gas accounting or bytecode execution: value sent to a contract address is
// simply credited to it.

use super::{ClientFactory, InclusionStatus, LedgerClient};
use crate::crypto::{Address, Hash};
use crate::error::{HarnessError, HarnessResult};
use crate::orchestrator::CancelToken;
use crate::transaction::{contract_address, SignedTransaction};
use async_trait::async_trait;
use log::{debug, trace};
use parking_lot::Mutex;
use primitive_types::U256;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Default, Clone)]
struct AccountState {
    balance: U256,
    /// Next nonce the ledger will execute
    nonce: u64,
}

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<Address, AccountState>,
    queued: HashMap<Address, BTreeMap<u64, SignedTransaction>>,
    statuses: HashMap<Hash, InclusionStatus>,
    height: u64,
}

/// Result of producing one block
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BlockSummary {
    pub height: u64,
    pub included: usize,
    pub rejected: usize,
}

#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
    auto_commit: bool,
    submit_latency: Option<Duration>,
    failing_channels: Mutex<HashSet<usize>>,
    submissions_per_channel: Mutex<HashMap<usize, usize>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl InMemoryLedger {
    /// Ledger that commits only on `produce_block`
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger that produces a block after every accepted submission
    pub fn auto_commit() -> Self {
        Self {
            auto_commit: true,
            ..Self::default()
        }
    }

    /// Simulated network latency for every submission
    pub fn with_submit_latency(mut self, latency: Duration) -> Self {
        self.submit_latency = Some(latency);
        self
    }

    /// Credit `amount` to `address` outside of any transaction (genesis)
    pub fn credit(&self, address: Address, amount: U256) {
        let mut state = self.state.lock();
        let account = state.accounts.entry(address).or_default();
        account.balance = account.balance.saturating_add(amount);
    }

    /// Make every submission through channel `index` fail at the transport
    pub fn fail_channel(&self, index: usize) {
        self.failing_channels.lock().insert(index);
    }

    pub fn height(&self) -> u64 {
        self.state.lock().height
    }

    pub fn balance_of(&self, address: &Address) -> U256 {
        self.state
            .lock()
            .accounts
            .get(address)
            .map(|a| a.balance)
            .unwrap_or_default()
    }

    /// Sum of every committed balance
    pub fn total_supply(&self) -> U256 {
        self.state
            .lock()
            .accounts
            .values()
            .fold(U256::zero(), |acc, a| acc.saturating_add(a.balance))
    }

    /// Number of queued, not yet committed transactions
    pub fn pending_count(&self) -> usize {
        self.state.lock().queued.values().map(|q| q.len()).sum()
    }

    /// Accepted submissions per channel index
    pub fn submissions_per_channel(&self) -> HashMap<usize, usize> {
        self.submissions_per_channel.lock().clone()
    }

    /// Highest number of concurrently running submissions observed
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Commit every executable queued transaction.
    ///
    /// Each sender's queue is drained in nonce order starting from its
    /// current nonce; anything behind a gap stays queued. A transfer the
    /// sender cannot afford is rejected and still consumes its nonce.
    pub fn produce_block(&self) -> BlockSummary {
        let mut state = self.state.lock();
        let LedgerState {
            accounts,
            queued,
            statuses,
            height,
        } = &mut *state;

        *height += 1;
        let mut summary = BlockSummary {
            height: *height,
            ..Default::default()
        };

        let mut senders: Vec<Address> = queued.keys().copied().collect();
        senders.sort();
        for sender in senders {
            let Some(queue) = queued.get_mut(&sender) else {
                continue;
            };
            loop {
                let expected = accounts.get(&sender).map(|a| a.nonce).unwrap_or(0);
                let Some(tx) = queue.remove(&expected) else {
                    break;
                };

                let sender_state = accounts.entry(sender).or_default();
                sender_state.nonce += 1;

                if sender_state.balance < tx.amount() {
                    let reason = format!(
                        "insufficient balance: has {}, needs {}",
                        sender_state.balance,
                        tx.amount()
                    );
                    trace!("Rejecting {} at commit: {}", tx.hash(), reason);
                    statuses.insert(*tx.hash(), InclusionStatus::Rejected(reason));
                    summary.rejected += 1;
                    continue;
                }
                sender_state.balance -= tx.amount();

                let destination = match tx.recipient() {
                    Some(recipient) => *recipient,
                    None => contract_address(&sender, tx.nonce()),
                };
                let dest_state = accounts.entry(destination).or_default();
                dest_state.balance = dest_state.balance.saturating_add(tx.amount());

                statuses.insert(*tx.hash(), InclusionStatus::Included);
                summary.included += 1;
            }
        }
        queued.retain(|_, queue| !queue.is_empty());

        if log::log_enabled!(log::Level::Debug) && (summary.included > 0 || summary.rejected > 0) {
            debug!(
                "Block {}: {} included, {} rejected",
                summary.height, summary.included, summary.rejected
            );
        }
        summary
    }

    /// Produce a block every `interval` until `cancel` fires
    pub fn spawn_block_producer(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancelToken,
    ) -> BlockProducerHandle {
        let ledger = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        ledger.produce_block();
                    }
                }
            }
        });
        BlockProducerHandle { handle }
    }

    fn accept(&self, encoded: &[u8]) -> HarnessResult<Hash> {
        let tx = SignedTransaction::decode(encoded)
            .map_err(|e| HarnessError::Submission(format!("undecodable transaction: {}", e)))?;
        let hash = *tx.hash();

        let mut state = self.state.lock();
        if state.statuses.contains_key(&hash) {
            return Err(HarnessError::Submission(format!(
                "duplicate transaction {}",
                hash
            )));
        }

        let sender = *tx.sender();
        let current = state.accounts.get(&sender).map(|a| a.nonce).unwrap_or(0);
        if tx.nonce() < current {
            return Err(HarnessError::Submission(format!(
                "nonce {} too low for {} (expected >= {})",
                tx.nonce(),
                sender,
                current
            )));
        }

        let queue = state.queued.entry(sender).or_default();
        if queue.contains_key(&tx.nonce()) {
            return Err(HarnessError::Submission(format!(
                "nonce {} already queued for {}",
                tx.nonce(),
                sender
            )));
        }
        queue.insert(tx.nonce(), tx);
        state.statuses.insert(hash, InclusionStatus::Pending);
        Ok(hash)
    }

    async fn submit_on_channel(&self, channel: usize, encoded: &[u8]) -> HarnessResult<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(latency) = self.submit_latency {
            tokio::time::sleep(latency).await;
        }

        let result = if self.failing_channels.lock().contains(&channel) {
            Err(HarnessError::Ledger(format!(
                "channel {} endpoint unreachable",
                channel
            )))
        } else {
            self.accept(encoded).map(|_| {
                *self
                    .submissions_per_channel
                    .lock()
                    .entry(channel)
                    .or_default() += 1;
            })
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if result.is_ok() && self.auto_commit {
            self.produce_block();
        }
        result
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn submit(&self, encoded: &[u8]) -> HarnessResult<()> {
        self.submit_on_channel(0, encoded).await
    }

    async fn get_nonce(&self, address: &Address) -> HarnessResult<u64> {
        Ok(self
            .state
            .lock()
            .accounts
            .get(address)
            .map(|a| a.nonce)
            .unwrap_or(0))
    }

    async fn get_balance(&self, address: &Address) -> HarnessResult<U256> {
        Ok(self.balance_of(address))
    }

    async fn inclusion_status(&self, hash: &Hash) -> HarnessResult<InclusionStatus> {
        Ok(self
            .state
            .lock()
            .statuses
            .get(hash)
            .cloned()
            .unwrap_or(InclusionStatus::Unknown))
    }
}

/// One submission channel into a shared in-memory ledger
pub struct LedgerClientHandle {
    ledger: Arc<InMemoryLedger>,
    channel: usize,
}

impl LedgerClientHandle {
    pub fn channel(&self) -> usize {
        self.channel
    }
}

#[async_trait]
impl LedgerClient for LedgerClientHandle {
    async fn submit(&self, encoded: &[u8]) -> HarnessResult<()> {
        self.ledger.submit_on_channel(self.channel, encoded).await
    }

    async fn get_nonce(&self, address: &Address) -> HarnessResult<u64> {
        self.ledger.get_nonce(address).await
    }

    async fn get_balance(&self, address: &Address) -> HarnessResult<U256> {
        self.ledger.get_balance(address).await
    }

    async fn inclusion_status(&self, hash: &Hash) -> HarnessResult<InclusionStatus> {
        self.ledger.inclusion_status(hash).await
    }
}

impl ClientFactory for Arc<InMemoryLedger> {
    fn connect(&self, index: usize) -> HarnessResult<Arc<dyn LedgerClient>> {
        Ok(Arc::new(LedgerClientHandle {
            ledger: Arc::clone(self),
            channel: index,
        }))
    }
}

/// Running periodic block producer
pub struct BlockProducerHandle {
    handle: JoinHandle<()>,
}

impl BlockProducerHandle {
    /// Wait for the producer to exit after its cancel token fired
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            log::warn!("Block producer task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{Account, AccountProvisioner, MemoryKeystore};
    use crate::orchestrator::CancelSignal;
    use crate::transaction::TransactionFactory;

    fn setup(n: usize) -> (TransactionFactory, Vec<Account>) {
        let keystore = Arc::new(MemoryKeystore::with_seed(21));
        let accounts = AccountProvisioner::new(keystore.clone())
            .provision(n, 0)
            .accounts;
        (TransactionFactory::new(keystore, 21_000), accounts)
    }

    #[tokio::test]
    async fn test_commit_in_nonce_order() {
        let (factory, accounts) = setup(2);
        let ledger = InMemoryLedger::new();
        ledger.credit(accounts[0].address, U256::from(100u64));

        let to = accounts[1].address;
        let tx1 = factory.transfer(&accounts[0], 1, to, U256::from(10u64)).unwrap();
        let tx0 = factory.transfer(&accounts[0], 0, to, U256::from(20u64)).unwrap();

        // future nonce first: queued behind the gap
        ledger.submit(&tx1.encode()).await.unwrap();
        ledger.produce_block();
        assert_eq!(
            ledger.inclusion_status(tx1.hash()).await.unwrap(),
            InclusionStatus::Pending
        );

        ledger.submit(&tx0.encode()).await.unwrap();
        let block = ledger.produce_block();
        assert_eq!(block.included, 2);
        assert_eq!(ledger.get_nonce(&accounts[0].address).await.unwrap(), 2);
        assert_eq!(ledger.balance_of(&to), U256::from(30u64));
        assert_eq!(ledger.total_supply(), U256::from(100u64));
    }

    #[tokio::test]
    async fn test_submission_errors() {
        let (factory, accounts) = setup(2);
        let ledger = InMemoryLedger::auto_commit();
        ledger.credit(accounts[0].address, U256::from(5u64));

        let tx = factory
            .transfer(&accounts[0], 0, accounts[1].address, U256::one())
            .unwrap();
        ledger.submit(&tx.encode()).await.unwrap();

        // duplicate and stale nonce
        assert!(matches!(
            ledger.submit(&tx.encode()).await,
            Err(HarnessError::Submission(_))
        ));
        let stale = factory
            .transfer(&accounts[0], 0, accounts[1].address, U256::from(2u64))
            .unwrap();
        assert!(matches!(
            ledger.submit(&stale.encode()).await,
            Err(HarnessError::Submission(_))
        ));

        // garbage bytes
        assert!(matches!(
            ledger.submit(&[0xde, 0xad]).await,
            Err(HarnessError::Submission(_))
        ));
    }

    #[tokio::test]
    async fn test_insufficient_balance_is_rejected() {
        let (factory, accounts) = setup(2);
        let ledger = InMemoryLedger::auto_commit();

        let tx = factory
            .transfer(&accounts[0], 0, accounts[1].address, U256::from(9u64))
            .unwrap();
        ledger.submit(&tx.encode()).await.unwrap();

        assert!(matches!(
            ledger.inclusion_status(tx.hash()).await.unwrap(),
            InclusionStatus::Rejected(_)
        ));
        assert_eq!(ledger.get_nonce(&accounts[0].address).await.unwrap(), 1);
        assert_eq!(
            ledger.inclusion_status(&Hash::zero()).await.unwrap(),
            InclusionStatus::Unknown
        );
    }

    #[tokio::test]
    async fn test_contract_value_is_credited() {
        let (factory, accounts) = setup(2);
        let ledger = InMemoryLedger::auto_commit();
        ledger.credit(accounts[0].address, U256::from(50u64));

        let deploy = factory
            .deploy_contract(&accounts[0], 0, vec![0x60, 0x80])
            .unwrap();
        ledger.submit(&deploy.encode()).await.unwrap();

        let contract = contract_address(&accounts[0].address, 0);
        let call = factory
            .call_contract(
                &accounts[0],
                1,
                contract,
                [0xd0, 0xe3, 0x0d, 0xb0],
                U256::from(7u64),
                &[],
            )
            .unwrap();
        ledger.submit(&call.encode()).await.unwrap();

        assert_eq!(ledger.balance_of(&contract), U256::from(7u64));
        assert_eq!(ledger.balance_of(&accounts[0].address), U256::from(43u64));
    }

    #[tokio::test]
    async fn test_channels_and_failures() {
        let (factory, accounts) = setup(2);
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.fail_channel(1);

        let ok = ledger.connect(0).unwrap();
        let broken = ledger.connect(1).unwrap();
        let tx = factory
            .transfer(&accounts[0], 0, accounts[1].address, U256::zero())
            .unwrap();

        assert!(matches!(
            broken.submit(&tx.encode()).await,
            Err(HarnessError::Ledger(_))
        ));
        ok.submit(&tx.encode()).await.unwrap();
        assert_eq!(ledger.submissions_per_channel().get(&0), Some(&1));
        assert_eq!(ledger.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_block_producer() {
        let (factory, accounts) = setup(2);
        let ledger = Arc::new(InMemoryLedger::new());
        let signal = CancelSignal::new();
        let producer = ledger.spawn_block_producer(Duration::from_millis(50), signal.token());

        let tx = factory
            .transfer(&accounts[0], 0, accounts[1].address, U256::zero())
            .unwrap();
        ledger.submit(&tx.encode()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            ledger.inclusion_status(tx.hash()).await.unwrap(),
            InclusionStatus::Included
        );

        signal.cancel();
        producer.join().await;
        assert!(ledger.height() >= 1);
    }
}
