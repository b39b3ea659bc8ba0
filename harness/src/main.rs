use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use primitive_types::U256;
use std::{fs::File, io::Write, path::Path, sync::Arc, time::Duration};
use tos_throughput_harness::{
    accounts::{Account, MemoryKeystore},
    config::{HarnessConfig, LogLevel},
    crypto::KeyPair,
    invariants,
    ledger::InMemoryLedger,
    orchestrator::CancelSignal,
    verify::TransferRecord,
    Harness,
};

const SEED_PASSPHRASE: &str = "seed";

#[derive(Parser)]
#[clap(
    version,
    about = "Throughput and correctness harness for TOS ledgers",
    long_about = None
)]
struct Cli {
    #[clap(flatten)]
    config: HarnessConfig,
    /// Log verbosity
    #[clap(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
    /// JSON file holding the harness configuration
    #[clap(long)]
    config_file: Option<String>,
    /// Write the current configuration to --config-file and exit
    #[clap(long)]
    generate_config_template: bool,
    /// Block interval of the in-process ledger, in milliseconds
    #[clap(long, default_value_t = 50)]
    block_interval_ms: u64,
    /// Initial balance credited to the seed account
    #[clap(long, default_value_t = 1_000_000_000)]
    seed_balance: u64,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Provision and fund the account pool
    Funding,
    /// Measure throughput with pairwise transfers
    Throughput {
        #[clap(long, default_value_t = 16)]
        batch_size: usize,
        /// Submission channels, defaults to the configured concurrency
        #[clap(long)]
        k: Option<usize>,
    },
    /// Run a random transfer graph and verify final balances
    Consistency {
        #[clap(long, default_value_t = 32)]
        transfers: usize,
    },
    /// Sign transfers and save them to the transactions file
    Generate,
    /// Generate the transactions file and dispatch it
    Replay {
        #[clap(long)]
        k: Option<usize>,
    },
    /// Send undecodable payloads that the ledger must refuse
    Reject {
        #[clap(long, default_value_t = 100)]
        count: usize,
        #[clap(long)]
        k: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    if let Some(path) = cli.config_file.as_ref() {
        if cli.generate_config_template {
            if Path::new(path).exists() {
                eprintln!("Config file already exists at {}", path);
                return Ok(());
            }

            let mut file = File::create(path).context("Error while creating config file")?;
            let json = serde_json::to_string_pretty(&cli.config)
                .context("Error while serializing config file")?;
            file.write_all(json.as_bytes())
                .context("Error while writing config file")?;
            println!("Config file template generated at {}", path);
            return Ok(());
        }

        let file = File::open(path).context("Error while opening config file")?;
        cli.config = serde_json::from_reader(file).context("Error while reading config file")?;
    } else if cli.generate_config_template {
        eprintln!("Provided config file path is required to generate the template with --config-file");
        return Ok(());
    }

    env_logger::Builder::from_default_env()
        .filter_level(cli.log_level.into())
        .format_timestamp_millis()
        .init();

    run(cli).await
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.config;
    let concurrency = config.concurrency;

    let signal = Arc::new(CancelSignal::new());
    let ledger = Arc::new(InMemoryLedger::new());
    let producer = ledger.spawn_block_producer(
        Duration::from_millis(cli.block_interval_ms.max(1)),
        signal.token(),
    );

    let keystore = Arc::new(MemoryKeystore::new());
    let seed_key = keystore.import(KeyPair::generate(&mut rand::thread_rng()), SEED_PASSPHRASE);
    ledger.credit(seed_key.address, U256::from(cli.seed_balance));
    let seed = Account {
        address: seed_key.address,
        balance: U256::from(cli.seed_balance),
        passphrase: SEED_PASSPHRASE.to_owned(),
        key_ref: seed_key.url,
        index: 0,
    };
    let supply_before = ledger.total_supply();

    let ctrl_c = {
        let signal = Arc::clone(&signal);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling the run");
                signal.cancel();
            }
        })
    };

    let mut harness = Harness::new(config, keystore, Arc::new(Arc::clone(&ledger)))
        .with_cancel(signal.token());
    let account_count = harness.config().account_count;

    match cli.command {
        Command::Funding => {
            harness
                .run_funding_scenario(&seed, account_count)
                .await
                .context("Funding scenario failed")?
                .print();
        }
        Command::Throughput { batch_size, k } => {
            fund(&mut harness, &seed, account_count).await?;
            harness
                .run_throughput_scenario(batch_size, k.unwrap_or(concurrency))
                .await
                .context("Throughput scenario failed")?
                .print();
        }
        Command::Consistency { transfers } => {
            fund(&mut harness, &seed, account_count).await?;
            let graph = random_graph(harness.accounts(), transfers);
            let report = harness
                .run_consistency_scenario(&graph)
                .await
                .context("Consistency scenario failed")?;
            report.print();
            if !report.is_consistent() {
                anyhow::bail!("{} balance mismatches", report.mismatches.len());
            }
        }
        Command::Generate => {
            fund(&mut harness, &seed, account_count).await?;
            let path = harness
                .generate_transactions_file()
                .await
                .context("Error while generating transactions")?;
            println!("Transactions written to {}", path.display());
        }
        Command::Replay { k } => {
            fund(&mut harness, &seed, account_count).await?;
            harness
                .generate_transactions_file()
                .await
                .context("Error while generating transactions")?;
            harness
                .replay_transactions_file(k.unwrap_or(concurrency))
                .await
                .context("Replay failed")?
                .print();
        }
        Command::Reject { count, k } => {
            let report = harness
                .run_rejection_scenario(count, k.unwrap_or(concurrency))
                .await
                .context("Rejection scenario failed")?;
            report.print();
            if !report.all_rejected() {
                anyhow::bail!("ledger accepted {} invalid payloads", report.accepted);
            }
        }
    }

    signal.cancel();
    producer.join().await;
    ctrl_c.abort();

    invariants::check_balance_conservation(supply_before, ledger.total_supply())?;
    info!("Ledger height at exit: {}", ledger.height());
    Ok(())
}

/// The in-process ledger starts empty on every run, so the pool is always
/// funded fresh instead of loaded from a previous snapshot
async fn fund(harness: &mut Harness, seed: &Account, n: usize) -> Result<()> {
    let report = harness
        .run_funding_scenario(seed, n)
        .await
        .context("Error while funding accounts")?;
    info!(
        "Funded {} accounts in {} rounds",
        report.funded.len(),
        report.rounds
    );
    Ok(())
}

/// `transfers` random transfers between pool accounts, each well below the
/// sender's balance share
fn random_graph(accounts: &[Account], transfers: usize) -> Vec<TransferRecord> {
    use rand::Rng;

    if accounts.len() < 2 {
        return Vec::new();
    }
    let mut rng = rand::thread_rng();
    (0..transfers)
        .map(|_| {
            let from = rng.gen_range(0..accounts.len());
            let offset = rng.gen_range(1..accounts.len());
            let to = (from + offset) % accounts.len();
            let share = accounts[from].balance / U256::from(transfers.max(1) as u64);
            let cap = share.low_u64().max(1);
            let amount = rng.gen_range(1..=cap);
            TransferRecord::new(accounts[from].address, accounts[to].address, U256::from(amount))
        })
        .collect()
}
