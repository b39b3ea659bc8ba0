use async_trait::async_trait;
use parking_lot::Mutex;
use primitive_types::U256;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tos_throughput_harness::{
    accounts::{Account, MemoryKeystore},
    config::HarnessConfig,
    crypto::{Address, Hash, KeyPair},
    error::{HarnessError, HarnessResult},
    invariants,
    ledger::{ClientFactory, InMemoryLedger, InclusionStatus, LedgerClient},
    orchestrator::CancelSignal,
    transaction::SignedTransaction,
    verify::TransferRecord,
    Harness,
};

const SEED_BALANCE: u64 = 1_000_000;

struct Fixture {
    harness: Harness,
    ledger: Arc<InMemoryLedger>,
    seed: Account,
    _home: TempDir,
}

fn config(home: &TempDir) -> HarnessConfig {
    HarnessConfig {
        home: home.path().to_path_buf(),
        concurrency: 2,
        poll_interval_ms: 5,
        confirmation_timeout_secs: 5,
        ..HarnessConfig::default()
    }
}

fn fixture(configure: impl FnOnce(&mut HarnessConfig)) -> Fixture {
    let home = TempDir::new().unwrap();
    let mut config = config(&home);
    configure(&mut config);

    let ledger = Arc::new(InMemoryLedger::auto_commit());
    let keystore = Arc::new(MemoryKeystore::with_seed(7));
    let seed_key = keystore.import(KeyPair::from_secret_bytes(&[9u8; 32]), "seed");
    ledger.credit(seed_key.address, U256::from(SEED_BALANCE));
    let seed = Account {
        address: seed_key.address,
        balance: U256::from(SEED_BALANCE),
        passphrase: "seed".to_string(),
        key_ref: seed_key.url,
        index: 0,
    };

    let harness = Harness::new(config, keystore, Arc::new(Arc::clone(&ledger)));
    Fixture {
        harness,
        ledger,
        seed,
        _home: home,
    }
}

#[tokio::test]
async fn test_funding_reaches_every_account() {
    let mut f = fixture(|_| {});
    let report = f.harness.run_funding_scenario(&f.seed, 8).await.unwrap();

    assert_eq!(report.funded.len(), 8);
    assert_eq!(report.rounds, 3);
    assert_eq!(report.transfers.len(), 8);
    assert!(report.funded.iter().all(|a| !a.balance.is_zero()));

    let funded: U256 = report
        .funded
        .iter()
        .fold(U256::zero(), |sum, a| sum + a.balance);
    let seed_left = report.seed.as_ref().unwrap().balance;
    assert_eq!(funded + seed_left, U256::from(SEED_BALANCE));
    invariants::check_balance_conservation(U256::from(SEED_BALANCE), f.ledger.total_supply())
        .unwrap();

    // the pool was persisted
    assert!(f.harness.store().exists("accounts.json").await);
}

#[tokio::test]
async fn test_pairwise_batch_moves_exact_amounts() {
    let mut f = fixture(|c| c.transfer_amount = 10);
    f.harness.run_funding_scenario(&f.seed, 8).await.unwrap();
    let before: HashMap<Address, U256> = f
        .harness
        .accounts()
        .iter()
        .map(|a| (a.address, a.balance))
        .collect();

    let report = f.harness.run_throughput_scenario(4, 2).await.unwrap();
    assert_eq!(report.count, 4);
    assert_eq!(report.submitted, 4);
    assert!(report.failures.is_empty());

    for (i, account) in f.harness.accounts().iter().enumerate() {
        let expected = if i % 2 == 0 {
            before[&account.address] - U256::from(10u64)
        } else {
            before[&account.address] + U256::from(10u64)
        };
        assert_eq!(f.ledger.balance_of(&account.address), expected, "account {}", i);
    }
}

#[tokio::test]
async fn test_throughput_spreads_over_channels() {
    let mut f = fixture(|c| c.batch_count = 3);
    f.harness.run_funding_scenario(&f.seed, 8).await.unwrap();

    let report = f.harness.run_throughput_scenario(4, 4).await.unwrap();
    assert_eq!(report.count, 12);
    assert!(!report.cancelled);

    // funding only uses channels 0 and 1
    let per_channel = f.ledger.submissions_per_channel();
    assert_eq!(per_channel.get(&2), Some(&3));
    assert_eq!(per_channel.get(&3), Some(&3));
}

#[tokio::test]
async fn test_throughput_needs_enough_pairs() {
    let mut f = fixture(|_| {});
    f.harness.run_funding_scenario(&f.seed, 4).await.unwrap();

    let result = f.harness.run_throughput_scenario(3, 2).await;
    assert!(matches!(
        result,
        Err(HarnessError::InsufficientAccounts { .. })
    ));
}

#[tokio::test]
async fn test_generate_then_replay() {
    let mut f = fixture(|c| c.tx_scale = 10);
    f.harness.run_funding_scenario(&f.seed, 8).await.unwrap();

    let path = f.harness.generate_transactions_file().await.unwrap();
    assert!(path.ends_with("queued-txs.json"));
    // nothing is sent while generating
    assert_eq!(f.ledger.pending_count(), 0);

    let saved: Vec<SignedTransaction> = f
        .harness
        .store()
        .read_snapshot("queued-txs.json")
        .await
        .unwrap();
    assert_eq!(saved.len(), 10);
    invariants::check_nonce_monotonicity(saved.iter()).unwrap();
    invariants::check_hash_uniqueness(saved.iter().map(|tx| tx.hash())).unwrap();

    let report = f.harness.replay_transactions_file(3).await.unwrap();
    assert_eq!(report.throughput.count, 10);
    assert_eq!(report.hits.values().sum::<usize>(), 10);

    let recipients: Vec<Address> = f
        .harness
        .accounts()
        .iter()
        .skip(1)
        .step_by(2)
        .map(|a| a.address)
        .collect();
    assert!(report.hits.keys().all(|a| recipients.contains(a)));
}

#[tokio::test]
async fn test_replay_without_file() {
    let f = fixture(|_| {});
    let result = f.harness.replay_transactions_file(2).await;
    assert!(matches!(result, Err(HarnessError::NotFound { .. })));
}

#[tokio::test]
async fn test_prepare_accounts_reuses_snapshot() {
    let mut f = fixture(|_| {});
    f.harness.prepare_accounts(4, &f.seed).await.unwrap();
    let height = f.ledger.height();
    let first: Vec<Address> = f.harness.accounts().iter().map(|a| a.address).collect();

    f.harness.set_accounts(Vec::new());
    let reused = f.harness.prepare_accounts(4, &f.seed).await.unwrap();
    let second: Vec<Address> = reused.iter().map(|a| a.address).collect();

    assert_eq!(first, second);
    // no funding transfers the second time
    assert_eq!(f.ledger.height(), height);
}

#[tokio::test]
async fn test_consistency_graph_balances() {
    let mut f = fixture(|_| {});
    f.harness.run_funding_scenario(&f.seed, 6).await.unwrap();
    let accounts: Vec<Address> = f.harness.accounts().iter().map(|a| a.address).collect();
    let outsider = KeyPair::from_secret_bytes(&[3u8; 32]).address();

    let graph = vec![
        TransferRecord::new(accounts[0], accounts[1], U256::from(100u64)),
        TransferRecord::new(accounts[1], accounts[2], U256::from(40u64)),
        TransferRecord::new(accounts[0], accounts[2], U256::from(5u64)),
        TransferRecord::new(accounts[3], outsider, U256::from(7u64)),
        TransferRecord::new(accounts[0], accounts[5], U256::from(1u64)),
    ];
    let report = f.harness.run_consistency_scenario(&graph).await.unwrap();

    assert!(report.is_consistent(), "{:?}", report.mismatches);
    // five pool accounts and the outsider
    assert_eq!(report.checked, 6);
    assert_eq!(f.ledger.balance_of(&outsider), U256::from(7u64));
}

#[tokio::test]
async fn test_consistency_rejects_unknown_sender() {
    let mut f = fixture(|_| {});
    f.harness.run_funding_scenario(&f.seed, 2).await.unwrap();
    let stranger = KeyPair::from_secret_bytes(&[4u8; 32]).address();
    let graph = vec![TransferRecord::new(
        stranger,
        f.harness.accounts()[0].address,
        U256::one(),
    )];

    let result = f.harness.run_consistency_scenario(&graph).await;
    assert!(matches!(result, Err(HarnessError::Keystore { .. })));
}

#[tokio::test]
async fn test_fake_payloads_are_rejected() {
    let f = fixture(|_| {});
    let report = f.harness.run_rejection_scenario(10, 3).await.unwrap();

    assert_eq!(report.count, 10);
    assert!(report.all_rejected());
    assert_eq!(report.accepted, 0);
    assert_eq!(f.ledger.pending_count(), 0);
}

#[tokio::test]
async fn test_cancelled_run_submits_nothing() {
    let mut f = fixture(|_| {});
    f.harness.run_funding_scenario(&f.seed, 4).await.unwrap();
    let height = f.ledger.height();

    let signal = CancelSignal::new();
    signal.cancel();
    let harness = f.harness.with_cancel(signal.token());
    let report = harness.run_throughput_scenario(2, 2).await.unwrap();

    assert_eq!(report.count, 0);
    assert_eq!(report.submitted, 0);
    assert_eq!(f.ledger.height(), height);
}

/// Front for an in-memory ledger that holds back submissions of one sender
/// until a number of inclusion queries have been answered
struct DelayedLedger {
    ledger: Arc<InMemoryLedger>,
    held_sender: Mutex<Option<Address>>,
    held: Mutex<Vec<Vec<u8>>>,
    queries: AtomicUsize,
    release_after: usize,
}

impl DelayedLedger {
    fn new(ledger: Arc<InMemoryLedger>, release_after: usize) -> Self {
        Self {
            ledger,
            held_sender: Mutex::new(None),
            held: Mutex::new(Vec::new()),
            queries: AtomicUsize::new(0),
            release_after,
        }
    }

    fn hold(&self, sender: Address) {
        self.queries.store(0, Ordering::SeqCst);
        *self.held_sender.lock() = Some(sender);
    }
}

#[async_trait]
impl LedgerClient for DelayedLedger {
    async fn submit(&self, encoded: &[u8]) -> HarnessResult<()> {
        let held_sender = *self.held_sender.lock();
        if let Some(sender) = held_sender {
            if SignedTransaction::decode(encoded)?.sender() == &sender {
                self.held.lock().push(encoded.to_vec());
                return Ok(());
            }
        }
        self.ledger.submit(encoded).await
    }

    async fn get_nonce(&self, address: &Address) -> HarnessResult<u64> {
        self.ledger.get_nonce(address).await
    }

    async fn get_balance(&self, address: &Address) -> HarnessResult<U256> {
        self.ledger.get_balance(address).await
    }

    async fn inclusion_status(&self, hash: &Hash) -> HarnessResult<InclusionStatus> {
        let seen = self.queries.fetch_add(1, Ordering::SeqCst) + 1;
        if seen >= self.release_after {
            let held = std::mem::take(&mut *self.held.lock());
            for encoded in held {
                self.ledger.submit(&encoded).await?;
            }
        }
        self.ledger.inclusion_status(hash).await
    }
}

struct DelayedFactory(Arc<DelayedLedger>);

impl ClientFactory for DelayedFactory {
    fn connect(&self, _index: usize) -> HarnessResult<Arc<dyn LedgerClient>> {
        Ok(Arc::clone(&self.0) as Arc<dyn LedgerClient>)
    }
}

#[tokio::test]
async fn test_consistency_waits_for_late_inclusion_under_fail_fast() {
    let home = TempDir::new().unwrap();
    let mut config = config(&home);
    config.fail_fast = true;

    let ledger = Arc::new(InMemoryLedger::auto_commit());
    let front = Arc::new(DelayedLedger::new(Arc::clone(&ledger), 5));
    let keystore = Arc::new(MemoryKeystore::with_seed(11));
    let seed_key = keystore.import(KeyPair::from_secret_bytes(&[5u8; 32]), "seed");
    ledger.credit(seed_key.address, U256::from(SEED_BALANCE));
    let seed = Account {
        address: seed_key.address,
        balance: U256::from(SEED_BALANCE),
        passphrase: "seed".to_string(),
        key_ref: seed_key.url,
        index: 0,
    };

    let mut harness = Harness::new(config, keystore, Arc::new(DelayedFactory(Arc::clone(&front))));
    harness.run_funding_scenario(&seed, 4).await.unwrap();
    let accounts: Vec<Address> = harness.accounts().iter().map(|a| a.address).collect();
    let before_3 = ledger.balance_of(&accounts[3]);

    front.hold(accounts[2]);
    let graph = vec![
        // more than account 0 holds: rejected at commit
        TransferRecord::new(accounts[0], accounts[1], U256::from(SEED_BALANCE * 10)),
        TransferRecord::new(accounts[2], accounts[3], U256::from(5u64)),
    ];
    let report = harness.run_consistency_scenario(&graph).await.unwrap();

    // only the overdraft shows up, the delayed transfer is waited for
    let mismatched: Vec<Address> = report.mismatches.iter().map(|m| m.address).collect();
    assert_eq!(mismatched.len(), 2, "{:?}", report.mismatches);
    assert!(mismatched.contains(&accounts[0]));
    assert!(mismatched.contains(&accounts[1]));
    assert_eq!(ledger.balance_of(&accounts[3]), before_3 + U256::from(5u64));
}
