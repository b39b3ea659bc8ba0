use super::SignedTransaction;
use crate::crypto::{Address, Hash};
use crate::error::{HarnessError, HarnessResult};
use std::collections::HashSet;

/// Transactions generated and dispatched together.
///
/// A batch carries at most one transaction per sender. Items of a batch are
/// submitted concurrently over several channels, so two transactions of the
/// same sender inside one batch could reach the ledger out of nonce order.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    sequence: u64,
    transactions: Vec<SignedTransaction>,
    senders: HashSet<Address>,
}

impl Batch {
    pub fn new(sequence: u64) -> Self {
        Self {
            sequence,
            ..Default::default()
        }
    }

    pub fn from_transactions(
        sequence: u64,
        transactions: impl IntoIterator<Item = SignedTransaction>,
    ) -> HarnessResult<Self> {
        let mut batch = Self::new(sequence);
        for tx in transactions {
            batch.push(tx)?;
        }
        Ok(batch)
    }

    /// Position of this batch in its run
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn push(&mut self, tx: SignedTransaction) -> HarnessResult<()> {
        if !self.senders.insert(*tx.sender()) {
            return Err(HarnessError::InvalidBatch(format!(
                "sender {} already has a transaction in batch {}",
                tx.sender(),
                self.sequence
            )));
        }
        self.transactions.push(tx);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn transactions(&self) -> &[SignedTransaction] {
        &self.transactions
    }

    pub fn hashes(&self) -> Vec<Hash> {
        self.transactions.iter().map(|tx| *tx.hash()).collect()
    }

    pub fn encode_all(&self) -> Vec<Vec<u8>> {
        self.transactions.iter().map(|tx| tx.encode()).collect()
    }

    pub fn into_transactions(self) -> Vec<SignedTransaction> {
        self.transactions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{AccountProvisioner, MemoryKeystore};
    use crate::transaction::TransactionFactory;
    use primitive_types::U256;
    use std::sync::Arc;

    #[test]
    fn test_duplicate_sender_is_rejected() {
        let keystore = Arc::new(MemoryKeystore::with_seed(3));
        let accounts = AccountProvisioner::new(keystore.clone())
            .provision(2, 0)
            .accounts;
        let factory = TransactionFactory::new(keystore, 21_000);

        let mut batch = Batch::new(0);
        batch
            .push(factory.transfer(&accounts[0], 0, accounts[1].address, U256::one()).unwrap())
            .unwrap();
        batch
            .push(factory.transfer(&accounts[1], 0, accounts[0].address, U256::one()).unwrap())
            .unwrap();

        let again = factory.transfer(&accounts[0], 1, accounts[1].address, U256::one()).unwrap();
        assert!(matches!(batch.push(again), Err(HarnessError::InvalidBatch(_))));
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.hashes().len(), 2);
    }
}
