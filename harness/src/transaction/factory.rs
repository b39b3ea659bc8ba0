// File: harness/src/transaction/factory.rs
//
// Transaction Factory
//
// Builds one signed transaction from a sender account, a nonce and a
// transfer or call description. Signing goes through the keystore that owns
// the sender's credential.

use super::{encoding, SignedTransaction, MAX_PAYLOAD_SIZE};
use crate::accounts::{Account, Keystore};
use crate::crypto::{self, Address};
use crate::error::{HarnessError, HarnessResult};
use primitive_types::U256;
use std::sync::Arc;

/// Everything that goes into a transaction besides the sender
#[derive(Debug, Clone, Default)]
pub struct TransactionRequest {
    pub nonce: u64,
    /// None creates a contract from `payload`
    pub recipient: Option<Address>,
    pub amount: U256,
    pub payload: Vec<u8>,
    /// Overrides the factory's default gas ceiling
    pub gas_limit: Option<u64>,
}

#[derive(Clone)]
pub struct TransactionFactory {
    keystore: Arc<dyn Keystore>,
    gas_limit: u64,
}

impl TransactionFactory {
    pub fn new(keystore: Arc<dyn Keystore>, gas_limit: u64) -> Self {
        Self {
            keystore,
            gas_limit,
        }
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    /// Build and sign a transaction.
    ///
    /// The returned hash is the only valid one for this transaction: callers
    /// must keep it rather than recomputing it from the inputs.
    ///
    /// # Errors
    ///
    /// - `Encoding` if the payload exceeds `MAX_PAYLOAD_SIZE`
    /// - `Keystore` if the credential cannot sign
    pub fn build(
        &self,
        sender: &Account,
        request: TransactionRequest,
    ) -> HarnessResult<SignedTransaction> {
        if request.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(HarnessError::Encoding(format!(
                "payload of {} bytes exceeds limit of {}",
                request.payload.len(),
                MAX_PAYLOAD_SIZE
            )));
        }

        let gas_limit = request.gas_limit.unwrap_or(self.gas_limit);
        let public_key = self.keystore.public_key(&sender.address)?;
        let message = encoding::signing_bytes(
            &public_key,
            request.recipient.as_ref(),
            request.nonce,
            gas_limit,
            &request.amount,
            &request.payload,
        );
        let signature = self
            .keystore
            .sign(&sender.address, &sender.passphrase, &message)?;

        let mut encoded = message;
        encoded.extend_from_slice(signature.as_bytes());

        Ok(SignedTransaction {
            sender: sender.address,
            sender_key: public_key,
            recipient: request.recipient,
            nonce: request.nonce,
            gas_limit,
            amount: request.amount,
            payload: request.payload,
            signature,
            hash: crypto::hash(&encoded),
        })
    }

    /// Plain value transfer
    pub fn transfer(
        &self,
        sender: &Account,
        nonce: u64,
        recipient: Address,
        amount: U256,
    ) -> HarnessResult<SignedTransaction> {
        self.build(
            sender,
            TransactionRequest {
                nonce,
                recipient: Some(recipient),
                amount,
                ..Default::default()
            },
        )
    }

    /// Contract creation with the given bytecode
    pub fn deploy_contract(
        &self,
        sender: &Account,
        nonce: u64,
        bytecode: Vec<u8>,
    ) -> HarnessResult<SignedTransaction> {
        self.build(
            sender,
            TransactionRequest {
                nonce,
                recipient: None,
                payload: bytecode,
                ..Default::default()
            },
        )
    }

    /// Contract call: 4-byte selector followed by ABI-encoded argument words
    pub fn call_contract(
        &self,
        sender: &Account,
        nonce: u64,
        contract: Address,
        selector: [u8; 4],
        amount: U256,
        args: &[u8],
    ) -> HarnessResult<SignedTransaction> {
        let mut payload = Vec::with_capacity(4 + args.len());
        payload.extend_from_slice(&selector);
        payload.extend_from_slice(args);

        self.build(
            sender,
            TransactionRequest {
                nonce,
                recipient: Some(contract),
                amount,
                payload,
                ..Default::default()
            },
        )
    }
}

/// Address of the contract created by `sender` at `nonce`
pub fn contract_address(sender: &Address, nonce: u64) -> Address {
    let mut seed = Vec::with_capacity(20 + 8);
    seed.extend_from_slice(sender.as_bytes());
    seed.extend_from_slice(&nonce.to_be_bytes());
    Address::from_digest_of(&seed)
}
