use crate::crypto::Address;
use crate::error::{HarnessError, HarnessResult};
use crate::ledger::LedgerClient;
use std::collections::HashMap;

/// Per-sender nonce allocator for one generation run.
///
/// Starting nonces are read from the ledger when the run begins; after that
/// the tracker hands out strictly increasing nonces without gaps. A tracker
/// must not outlive a confirmation boundary: build a new one from fresh
/// ledger state instead.
#[derive(Debug, Default, Clone)]
pub struct NonceTracker {
    next: HashMap<Address, u64>,
}

impl NonceTracker {
    /// Query the current nonce of every address
    pub async fn from_ledger(
        client: &dyn LedgerClient,
        addresses: impl IntoIterator<Item = &Address>,
    ) -> HarnessResult<Self> {
        let mut next = HashMap::new();
        for address in addresses {
            next.insert(*address, client.get_nonce(address).await?);
        }
        Ok(Self { next })
    }

    pub fn insert(&mut self, address: Address, nonce: u64) {
        self.next.insert(address, nonce);
    }

    /// Reserve the next nonce of `address`
    pub fn reserve(&mut self, address: &Address) -> HarnessResult<u64> {
        let next = self.next.get_mut(address).ok_or_else(|| {
            HarnessError::Ledger(format!("nonce of {} was never queried", address))
        })?;
        let nonce = *next;
        *next += 1;
        Ok(nonce)
    }

    /// Nonce the next reservation would return
    pub fn peek(&self, address: &Address) -> Option<u64> {
        self.next.get(address).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_is_gapless() {
        let a = Address::new([1u8; 20]);
        let mut tracker = NonceTracker::default();
        tracker.insert(a, 5);

        assert_eq!(tracker.reserve(&a).unwrap(), 5);
        assert_eq!(tracker.reserve(&a).unwrap(), 6);
        assert_eq!(tracker.peek(&a), Some(7));
        assert!(tracker.reserve(&Address::new([2u8; 20])).is_err());
    }
}
