// File: harness/src/accounts/mod.rs
//
// Account Provisioning
//
// Creates the pool of test accounts through the keystore and round-trips it
// through a record store. Balances held here are snapshots taken when the
// account was produced or loaded, never live ledger views.

mod keystore;

pub use keystore::{KeyReference, Keystore, MemoryKeystore};

use crate::crypto::Address;
use crate::error::{HarnessError, HarnessResult};
use crate::store::RecordStore;
use log::{debug, info, warn};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A test account handed out by the provisioner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    /// Balance snapshot
    pub balance: U256,
    /// Unlocks the credential in the keystore
    pub passphrase: String,
    /// Where the keystore keeps the credential
    pub key_ref: String,
    /// Creation index within the pool
    pub index: u64,
}

impl Account {
    /// Copy of this account with a new balance snapshot
    pub fn with_balance(&self, balance: U256) -> Self {
        Self {
            balance,
            ..self.clone()
        }
    }
}

/// Outcome of a provisioning call.
///
/// Credential failures do not stop provisioning; callers compare
/// `accounts.len()` against the requested count.
#[derive(Debug, Default)]
pub struct ProvisionReport {
    pub accounts: Vec<Account>,
    pub failures: Vec<(u64, HarnessError)>,
}

impl ProvisionReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// All requested accounts, or the first credential failure
    pub fn into_result(self) -> HarnessResult<Vec<Account>> {
        match self.failures.into_iter().next() {
            Some((_, err)) => Err(err),
            None => Ok(self.accounts),
        }
    }
}

/// Passphrase used for the account at `index`
pub fn passphrase_for(index: u64) -> String {
    index.to_string()
}

pub struct AccountProvisioner {
    keystore: Arc<dyn Keystore>,
}

impl AccountProvisioner {
    pub fn new(keystore: Arc<dyn Keystore>) -> Self {
        Self { keystore }
    }

    pub fn keystore(&self) -> &Arc<dyn Keystore> {
        &self.keystore
    }

    /// Create `n` accounts with indices `offset..offset + n`, zero balance
    pub fn provision(&self, n: usize, offset: u64) -> ProvisionReport {
        let mut report = ProvisionReport {
            accounts: Vec::with_capacity(n),
            failures: Vec::new(),
        };

        for index in (offset..).take(n) {
            let passphrase = passphrase_for(index);
            match self.keystore.create_account(&passphrase) {
                Ok(key) => {
                    if log::log_enabled!(log::Level::Debug) {
                        debug!("Provisioned account #{} at {}", index, key.address);
                    }
                    report.accounts.push(Account {
                        address: key.address,
                        balance: U256::zero(),
                        passphrase,
                        key_ref: key.url,
                        index,
                    });
                }
                Err(e) => {
                    let e = match e {
                        HarnessError::Keystore { index: None, reason } => HarnessError::Keystore {
                            index: Some(index),
                            reason,
                        },
                        other => other,
                    };
                    warn!("Failed to provision account #{}: {}", index, e);
                    report.failures.push((index, e));
                }
            }
        }

        info!(
            "Provisioned {}/{} accounts starting at index {}",
            report.accounts.len(),
            n,
            offset
        );
        report
    }

    /// Replace the snapshot `name` with `accounts`
    pub async fn persist(
        &self,
        accounts: &[Account],
        store: &RecordStore,
        name: &str,
    ) -> HarnessResult<()> {
        let path = store.write_snapshot(name, &accounts).await?;
        info!("Saved {} accounts to {}", accounts.len(), path.display());
        Ok(())
    }

    /// Load the snapshot `name`.
    ///
    /// Loaded accounts are only usable for signing if this provisioner's
    /// keystore still holds their credentials.
    pub async fn load(&self, store: &RecordStore, name: &str) -> HarnessResult<Vec<Account>> {
        let accounts: Vec<Account> = store.read_snapshot(name).await?;
        info!("Loaded {} accounts from {}", accounts.len(), name);
        Ok(accounts)
    }
}
