// File: harness/src/ledger/mod.rs
//
// Ledger Collaborator Boundary
//
// The harness consumes a ledger through four operations: submit, nonce query,
// balance query and inclusion query. Validation, ordering and state commitment
// all belong to the ledger behind this trait.

mod memory;

pub use memory::{BlockProducerHandle, BlockSummary, InMemoryLedger, LedgerClientHandle};

use crate::crypto::{Address, Hash};
use crate::error::HarnessResult;
use async_trait::async_trait;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What the ledger knows about a submitted hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InclusionStatus {
    /// Accepted into the pool, not yet committed
    Pending,
    /// Committed into the ledger's history
    Included,
    /// Permanently refused (conflicting nonce, insufficient funds, ...)
    Rejected(String),
    /// The ledger has no record of the hash (yet)
    Unknown,
}

impl InclusionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Included | Self::Rejected(_))
    }
}

/// One submission channel to a ledger endpoint.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit an encoded signed transaction.
    ///
    /// # Errors
    ///
    /// Returns `Submission` if the ledger refuses the bytes, or `Ledger` if
    /// the endpoint is unreachable.
    async fn submit(&self, encoded: &[u8]) -> HarnessResult<()>;

    /// Next nonce the ledger expects from `address`
    async fn get_nonce(&self, address: &Address) -> HarnessResult<u64>;

    /// Committed balance of `address`
    async fn get_balance(&self, address: &Address) -> HarnessResult<U256>;

    /// Inclusion state of a previously submitted hash
    async fn inclusion_status(&self, hash: &Hash) -> HarnessResult<InclusionStatus>;
}

/// Opens submission channels, one per dispatch lane
pub trait ClientFactory: Send + Sync {
    fn connect(&self, index: usize) -> HarnessResult<Arc<dyn LedgerClient>>;
}

/// Open `k` channels from a factory
pub fn connect_all(
    factory: &dyn ClientFactory,
    k: usize,
) -> HarnessResult<Vec<Arc<dyn LedgerClient>>> {
    (0..k).map(|i| factory.connect(i)).collect()
}
