// File: harness/src/error.rs
//
// Harness Error Taxonomy
//
// Component-local failures (one account, one submission, one hash) are
// collected into reports; pipeline-level failures abort the scenario.

use crate::crypto::Hash;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the harness library
pub type HarnessResult<T> = Result<T, HarnessError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HarnessError {
    /// Malformed transaction construction, never retried
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Credential-store failure for a single account
    #[error("Keystore error{}: {reason}", index.map(|i| format!(" at index {}", i)).unwrap_or_default())]
    Keystore { index: Option<u64>, reason: String },

    /// Persisted snapshot is absent
    #[error("Record file not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// Persisted snapshot exists but cannot be parsed
    #[error("Corrupt record file {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// Fan-out round failure, aborts the remaining rounds
    #[error("Funding failed in round {round}: {reason}")]
    Funding { round: usize, reason: String },

    /// A single submission was refused by the ledger or its transport
    #[error("Submission error: {0}")]
    Submission(String),

    /// A hash was still pending when the confirmation bound elapsed
    #[error("Transaction {hash} was not included before timeout")]
    Timeout { hash: Hash },

    /// The ledger permanently rejected a hash
    #[error("Transaction {hash} was rejected: {reason}")]
    Rejection { hash: Hash, reason: String },

    /// Collaborator query failed (nonce, balance, inclusion)
    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("Not enough accounts: required {required}, available {available}")]
    InsufficientAccounts { required: usize, available: usize },

    #[error("Run was cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(String),
}

impl HarnessError {
    pub fn keystore(index: Option<u64>, reason: impl Into<String>) -> Self {
        Self::Keystore {
            index,
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for HarnessError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
