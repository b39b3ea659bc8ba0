// File: harness/src/verify.rs
//
// Consistency Verification
//
// Recomputes expected balances from the transfers applied in a scenario and
// compares them with a snapshot of the ledger. Every mismatching account is
// reported; verification never stops at the first difference.

use crate::crypto::Address;
use crate::error::HarnessResult;
use crate::ledger::LedgerClient;
use log::{info, warn};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One value movement applied during a scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub sender: Address,
    pub recipient: Address,
    pub amount: U256,
}

impl TransferRecord {
    pub fn new(sender: Address, recipient: Address, amount: U256) -> Self {
        Self {
            sender,
            recipient,
            amount,
        }
    }
}

/// Expected and observed balance of one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceMismatch {
    pub address: Address,
    /// None if the transfers imply a negative balance
    pub expected: Option<U256>,
    pub observed: Option<U256>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Number of accounts touched by the transfer graph
    pub checked: usize,
    /// Sorted by address
    pub mismatches: Vec<BalanceMismatch>,
}

impl VerificationReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }

    pub fn print(&self) {
        println!("\n=== Consistency Verification ===");
        println!("Accounts checked: {}", self.checked);
        println!("Mismatches: {}", self.mismatches.len());
        for m in &self.mismatches {
            println!(
                "  {}: expected {}, observed {}",
                m.address,
                m.expected.map(|v| v.to_string()).unwrap_or_else(|| "<negative>".into()),
                m.observed.map(|v| v.to_string()).unwrap_or_else(|| "<missing>".into())
            );
        }
    }
}

/// Balance snapshot keyed by address
pub type BalanceSnapshot = BTreeMap<Address, U256>;

/// Read the balance of every address from the ledger
pub async fn snapshot_balances(
    client: &dyn LedgerClient,
    addresses: impl IntoIterator<Item = &Address>,
) -> HarnessResult<BalanceSnapshot> {
    let mut snapshot = BalanceSnapshot::new();
    for address in addresses {
        snapshot.insert(*address, client.get_balance(address).await?);
    }
    Ok(snapshot)
}

pub struct ConsistencyVerifier {
    initial: BalanceSnapshot,
    transfers: Vec<TransferRecord>,
}

impl ConsistencyVerifier {
    /// `initial` holds balances before the first transfer; accounts missing
    /// from it start at zero
    pub fn new(initial: BalanceSnapshot) -> Self {
        Self {
            initial,
            transfers: Vec::new(),
        }
    }

    pub fn record(&mut self, transfer: TransferRecord) {
        self.transfers.push(transfer);
    }

    pub fn extend(&mut self, transfers: impl IntoIterator<Item = TransferRecord>) {
        self.transfers.extend(transfers);
    }

    pub fn transfers(&self) -> &[TransferRecord] {
        &self.transfers
    }

    /// initial + incoming - outgoing for every touched account.
    /// None marks an account whose outgoing exceeds what it could hold.
    pub fn expected_balances(&self) -> BTreeMap<Address, Option<U256>> {
        let mut credits: BTreeMap<Address, U256> = BTreeMap::new();
        let mut debits: BTreeMap<Address, U256> = BTreeMap::new();

        for address in self.initial.keys() {
            credits.entry(*address).or_default();
        }
        for t in &self.transfers {
            let credit = credits.entry(t.recipient).or_default();
            *credit = credit.saturating_add(t.amount);
            let debit = debits.entry(t.sender).or_default();
            *debit = debit.saturating_add(t.amount);
            credits.entry(t.sender).or_default();
        }

        credits
            .into_iter()
            .map(|(address, incoming)| {
                let start = self.initial.get(&address).copied().unwrap_or_default();
                let outgoing = debits.get(&address).copied().unwrap_or_default();
                let expected = start
                    .checked_add(incoming)
                    .and_then(|v| v.checked_sub(outgoing));
                (address, expected)
            })
            .collect()
    }

    /// Compare expected balances with `observed`
    pub fn verify(&self, observed: &BalanceSnapshot) -> VerificationReport {
        let expected = self.expected_balances();
        let mut report = VerificationReport {
            checked: expected.len(),
            mismatches: Vec::new(),
        };

        for (address, expected) in expected {
            let actual = observed.get(&address).copied();
            if expected.is_none() || actual != expected {
                report.mismatches.push(BalanceMismatch {
                    address,
                    expected,
                    observed: actual,
                });
            }
        }

        if report.is_consistent() {
            info!(
                "[VERIFY] {} accounts consistent over {} transfers",
                report.checked,
                self.transfers.len()
            );
        } else {
            warn!(
                "[VERIFY] {} of {} accounts mismatch",
                report.mismatches.len(),
                report.checked
            );
        }
        report
    }

    /// Snapshot the touched accounts from the ledger and verify
    pub async fn verify_against(
        &self,
        client: &dyn LedgerClient,
    ) -> HarnessResult<VerificationReport> {
        let addresses: Vec<Address> = self.expected_balances().into_keys().collect();
        let observed = snapshot_balances(client, &addresses).await?;
        Ok(self.verify(&observed))
    }
}
