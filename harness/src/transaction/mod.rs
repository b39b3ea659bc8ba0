// File: harness/src/transaction/mod.rs
//
// Signed Transactions
//
// A SignedTransaction is immutable once produced. Its hash is the blake3
// digest of the full encoding (signature included) and is the only key used
// to correlate a submission with its confirmation.

mod batch;
mod encoding;
mod factory;

pub use batch::Batch;
pub use factory::{contract_address, TransactionFactory, TransactionRequest};

use crate::crypto::{self, Address, Hash, PublicKey, Signature};
use crate::error::{HarnessError, HarnessResult};
use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// Largest payload the ledger accepts in a single transaction
pub const MAX_PAYLOAD_SIZE: usize = 128 * 1024;

/// Encoding format version
pub const TX_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    sender: Address,
    sender_key: PublicKey,
    /// None for contract creation
    recipient: Option<Address>,
    nonce: u64,
    gas_limit: u64,
    amount: U256,
    #[serde(with = "hex::serde")]
    payload: Vec<u8>,
    signature: Signature,
    hash: Hash,
}

impl SignedTransaction {
    pub fn sender(&self) -> &Address {
        &self.sender
    }

    pub fn sender_key(&self) -> &PublicKey {
        &self.sender_key
    }

    pub fn recipient(&self) -> Option<&Address> {
        self.recipient.as_ref()
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    pub fn amount(&self) -> U256 {
        self.amount
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Hash captured at construction time
    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    pub fn is_contract_creation(&self) -> bool {
        self.recipient.is_none()
    }

    /// Full wire encoding, signature included
    pub fn encode(&self) -> Vec<u8> {
        let mut out = encoding::signing_bytes(
            &self.sender_key,
            self.recipient.as_ref(),
            self.nonce,
            self.gas_limit,
            &self.amount,
            &self.payload,
        );
        out.extend_from_slice(self.signature.as_bytes());
        out
    }

    /// Decode and authenticate a wire encoding
    pub fn decode(bytes: &[u8]) -> HarnessResult<Self> {
        let decoded = encoding::decode(bytes)?;
        let signing_len = bytes.len() - crypto::SIGNATURE_SIZE;
        if !decoded
            .sender_key
            .verify(&bytes[..signing_len], &decoded.signature)
        {
            return Err(HarnessError::Encoding("invalid signature".to_string()));
        }

        Ok(Self {
            sender: decoded.sender_key.to_address(),
            sender_key: decoded.sender_key,
            recipient: decoded.recipient,
            nonce: decoded.nonce,
            gas_limit: decoded.gas_limit,
            amount: decoded.amount,
            payload: decoded.payload,
            signature: decoded.signature,
            hash: crypto::hash(bytes),
        })
    }

    /// Check that a record read back from storage is internally consistent
    pub fn verify_integrity(&self) -> HarnessResult<()> {
        let decoded = Self::decode(&self.encode())?;
        if decoded.hash != self.hash || decoded.sender != self.sender {
            return Err(HarnessError::Encoding(format!(
                "stored hash {} does not match contents",
                self.hash
            )));
        }
        Ok(())
    }
}
