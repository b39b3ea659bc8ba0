//! Run-wide invariant checkers
//!
//! - Balance conservation (transfers move value, never create it)
//! - Nonce monotonicity (per sender, strictly increasing, no gaps)
//! - Hash uniqueness within a run
//! - Terminal outcomes (every submitted hash resolved exactly once)

use crate::confirmation::{ConfirmationReport, HashState};
use crate::crypto::{Address, Hash};
use crate::transaction::SignedTransaction;
use anyhow::{bail, ensure, Result};
use primitive_types::U256;
use std::collections::{HashMap, HashSet};

/// Check balance conservation
pub fn check_balance_conservation(total_before: U256, total_after: U256) -> Result<()> {
    ensure!(
        total_before == total_after,
        "balance not conserved: {} before, {} after",
        total_before,
        total_after
    );
    Ok(())
}

/// Check nonce monotonicity over transactions in submission order
pub fn check_nonce_monotonicity<'a>(
    transactions: impl IntoIterator<Item = &'a SignedTransaction>,
) -> Result<()> {
    let mut last: HashMap<Address, u64> = HashMap::new();
    for tx in transactions {
        if let Some(previous) = last.insert(*tx.sender(), tx.nonce()) {
            if tx.nonce() != previous + 1 {
                bail!(
                    "sender {} used nonce {} after {}",
                    tx.sender(),
                    tx.nonce(),
                    previous
                );
            }
        }
    }
    Ok(())
}

/// Check that no hash appears twice in a run
pub fn check_hash_uniqueness<'a>(hashes: impl IntoIterator<Item = &'a Hash>) -> Result<()> {
    let mut seen = HashSet::new();
    for hash in hashes {
        ensure!(seen.insert(*hash), "duplicate transaction hash {}", hash);
    }
    Ok(())
}

/// Check that a confirmation report covers exactly the submitted hashes and
/// that each of them is terminal
pub fn check_terminal_outcomes(submitted: &[Hash], report: &ConfirmationReport) -> Result<()> {
    let expected: HashSet<&Hash> = submitted.iter().collect();
    let mut reported = HashSet::new();

    for result in &report.results {
        ensure!(
            expected.contains(&result.hash),
            "report contains {} which was never submitted",
            result.hash
        );
        ensure!(
            reported.insert(result.hash),
            "{} reported more than once",
            result.hash
        );
        if !report.cancelled {
            ensure!(
                result.state != HashState::Pending,
                "{} has no terminal state",
                result.hash
            );
        }
    }
    ensure!(
        reported.len() == expected.len(),
        "{} submitted hashes missing from report",
        expected.len() - reported.len()
    );
    Ok(())
}
