//! # TOS Throughput Harness
//!
//! Load-test and correctness harness for ledgers that accept signed transfer
//! and contract transactions.
//!
//! ## Pipeline
//!
//! - **AccountProvisioner**: creates or loads the test account pool
//! - **FundDistributor**: funds the pool from one seed in O(log N) rounds
//! - **GenerationPipeline**: signs batches ahead of submission
//! - **DispatchPool**: spreads each batch over k submission channels
//! - **ConfirmationTracker**: waits for every submitted hash to resolve
//! - **ConsistencyVerifier**: checks final balances against the transfer graph
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tos_throughput_harness::prelude::*;
//!
//! let ledger = Arc::new(InMemoryLedger::auto_commit());
//! let keystore = Arc::new(MemoryKeystore::new());
//! let mut harness = Harness::new(HarnessConfig::default(), keystore, Arc::new(ledger));
//! let funding = harness.run_funding_scenario(&seed, 8).await?;
//! let report = harness.run_throughput_scenario(4, 2).await?;
//! ```

#![warn(clippy::all)]

pub mod accounts;
pub mod config;
pub mod confirmation;
pub mod crypto;
pub mod dispatch;
pub mod error;
pub mod funding;
// Run-wide invariant checkers (conservation, nonce monotonicity, ...)
pub mod invariants;
/// Ledger collaborator traits and the in-process ledger
pub mod ledger;
/// Clock, cancellation and nonce state for one run
pub mod orchestrator;
pub mod pipeline;
pub mod scenarios;
pub mod store;
pub mod transaction;
pub mod verify;

/// Convenient re-exports for drivers and tests
pub mod prelude {
    pub use crate::accounts::{Account, AccountProvisioner, Keystore, MemoryKeystore};
    pub use crate::config::HarnessConfig;
    pub use crate::confirmation::{ConfirmationReport, ConfirmationTracker, HashState};
    pub use crate::crypto::{Address, Hash, KeyPair};
    pub use crate::dispatch::{DispatchPool, SubmissionOutcome};
    pub use crate::error::{HarnessError, HarnessResult};
    pub use crate::funding::{FundDistributor, FundingReport};
    pub use crate::ledger::{ClientFactory, InMemoryLedger, InclusionStatus, LedgerClient};
    pub use crate::orchestrator::{CancelSignal, CancelToken, Clock, PausedClock, SystemClock};
    pub use crate::pipeline::{GenerationPipeline, GenerationPlan, TransferPattern};
    pub use crate::scenarios::{Harness, ThroughputReport};
    pub use crate::transaction::{Batch, SignedTransaction, TransactionFactory};
    pub use crate::verify::{ConsistencyVerifier, TransferRecord, VerificationReport};
    pub use primitive_types::U256;
}

pub use error::{HarnessError, HarnessResult};
pub use scenarios::Harness;
