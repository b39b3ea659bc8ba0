use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_HOME: &str = "harness-data/";
pub const DEFAULT_ACCOUNT_COUNT: usize = 64;
pub const DEFAULT_TX_SCALE: usize = 128;
// number of submission channels
pub const DEFAULT_CONCURRENCY: usize = 16;
pub const DEFAULT_BATCH_COUNT: usize = 1;
// batches the generator may run ahead of dispatch
pub const DEFAULT_CHANNEL_CAPACITY: usize = 2;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_GAS_LIMIT: u64 = 21_000;
pub const DEFAULT_TRANSFER_AMOUNT: u64 = 1;
pub const DEFAULT_ACCOUNTS_FILE: &str = "accounts.json";
pub const DEFAULT_TRANSACTIONS_FILE: &str = "queued-txs.json";

// Functions Helpers
fn default_home() -> PathBuf {
    PathBuf::from(DEFAULT_HOME)
}

fn default_account_count() -> usize {
    DEFAULT_ACCOUNT_COUNT
}

fn default_tx_scale() -> usize {
    DEFAULT_TX_SCALE
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_batch_count() -> usize {
    DEFAULT_BATCH_COUNT
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_confirmation_timeout_secs() -> u64 {
    DEFAULT_CONFIRMATION_TIMEOUT_SECS
}

fn default_gas_limit() -> u64 {
    DEFAULT_GAS_LIMIT
}

fn default_transfer_amount() -> u64 {
    DEFAULT_TRANSFER_AMOUNT
}

fn default_accounts_file() -> String {
    DEFAULT_ACCOUNTS_FILE.to_owned()
}

fn default_transactions_file() -> String {
    DEFAULT_TRANSACTIONS_FILE.to_owned()
}

#[derive(Debug, Clone, clap::Args, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Directory holding account and transaction snapshots
    #[clap(long, default_value = DEFAULT_HOME)]
    #[serde(default = "default_home")]
    pub home: PathBuf,
    /// Number of test accounts to provision and fund
    #[clap(long, default_value_t = DEFAULT_ACCOUNT_COUNT)]
    #[serde(default = "default_account_count")]
    pub account_count: usize,
    /// Number of transactions generated for large-scale runs
    #[clap(long, default_value_t = DEFAULT_TX_SCALE)]
    #[serde(default = "default_tx_scale")]
    pub tx_scale: usize,
    /// Number of concurrent submission channels
    #[clap(long, default_value_t = DEFAULT_CONCURRENCY)]
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Batches produced per throughput run
    #[clap(long, default_value_t = DEFAULT_BATCH_COUNT)]
    #[serde(default = "default_batch_count")]
    pub batch_count: usize,
    /// Capacity of the channel between generation and dispatch
    #[clap(long, default_value_t = DEFAULT_CHANNEL_CAPACITY)]
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Interval between inclusion polls, in milliseconds
    #[clap(long, default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Give up on unconfirmed transactions after this many seconds
    #[clap(long, default_value_t = DEFAULT_CONFIRMATION_TIMEOUT_SECS)]
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    /// Gas ceiling put on every transaction
    #[clap(long, default_value_t = DEFAULT_GAS_LIMIT)]
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    /// Amount sent by each generated transfer
    #[clap(long, default_value_t = DEFAULT_TRANSFER_AMOUNT)]
    #[serde(default = "default_transfer_amount")]
    pub transfer_amount: u64,
    /// Snapshot name of the account pool
    #[clap(long, default_value_t = String::from(DEFAULT_ACCOUNTS_FILE))]
    #[serde(default = "default_accounts_file")]
    pub accounts_file: String,
    /// Snapshot name of generated transactions
    #[clap(long, default_value_t = String::from(DEFAULT_TRANSACTIONS_FILE))]
    #[serde(default = "default_transactions_file")]
    pub transactions_file: String,
    /// Stop confirmation at the first failed hash instead of reporting all
    #[clap(long)]
    #[serde(default)]
    pub fail_fast: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            home: default_home(),
            account_count: DEFAULT_ACCOUNT_COUNT,
            tx_scale: DEFAULT_TX_SCALE,
            concurrency: DEFAULT_CONCURRENCY,
            batch_count: DEFAULT_BATCH_COUNT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            confirmation_timeout_secs: DEFAULT_CONFIRMATION_TIMEOUT_SECS,
            gas_limit: DEFAULT_GAS_LIMIT,
            transfer_amount: DEFAULT_TRANSFER_AMOUNT,
            accounts_file: default_accounts_file(),
            transactions_file: default_transactions_file(),
            fail_fast: false,
        }
    }
}

impl HarnessConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}

/// Log verbosity accepted on the command line and in config files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Off => Self::Off,
            LogLevel::Error => Self::Error,
            LogLevel::Warn => Self::Warn,
            LogLevel::Info => Self::Info,
            LogLevel::Debug => Self::Debug,
            LogLevel::Trace => Self::Trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: HarnessConfig =
            serde_json::from_str(r#"{"account_count": 8, "fail_fast": true}"#).unwrap();
        assert_eq!(config.account_count, 8);
        assert!(config.fail_fast);
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.transactions_file, "queued-txs.json");
        assert_eq!(config.confirmation_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_log_level_filter() {
        assert_eq!(log::LevelFilter::from(LogLevel::default()), log::LevelFilter::Info);
        let level: LogLevel = serde_json::from_str("\"debug\"").unwrap();
        assert_eq!(level, LogLevel::Debug);
    }
}
