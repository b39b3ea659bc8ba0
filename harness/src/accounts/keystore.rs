// File: harness/src/accounts/keystore.rs
//
// Credential Store
//
// The harness never holds secret keys itself. Accounts carry a passphrase and
// a key reference; signing is delegated to a Keystore implementation.

use crate::crypto::{Address, KeyPair, PublicKey, Signature};
use crate::error::{HarnessError, HarnessResult};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sha3::{Digest, Sha3_256};
use std::collections::HashMap;

/// Handle returned when the keystore creates a new key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyReference {
    pub address: Address,
    /// Location of the key inside the store (path or URL)
    pub url: String,
}

/// Credential-store collaborator
pub trait Keystore: Send + Sync {
    /// Create a new key protected by `passphrase`
    fn create_account(&self, passphrase: &str) -> HarnessResult<KeyReference>;

    /// Public key of a stored account
    fn public_key(&self, address: &Address) -> HarnessResult<PublicKey>;

    /// Sign `message` with the key of `address`, unlocking it with `passphrase`
    fn sign(&self, address: &Address, passphrase: &str, message: &[u8])
        -> HarnessResult<Signature>;
}

struct StoredKey {
    passphrase_digest: [u8; 32],
    keypair: KeyPair,
}

/// Process-local keystore
///
/// Keys live only as long as the keystore. Key generation draws from a
/// seeded RNG so test runs can be reproduced.
pub struct MemoryKeystore {
    keys: RwLock<HashMap<Address, StoredKey>>,
    rng: Mutex<StdRng>,
}

impl MemoryKeystore {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            rng: Mutex::new(rng),
        }
    }

    /// Import an existing key (genesis or seed accounts)
    pub fn import(&self, keypair: KeyPair, passphrase: &str) -> KeyReference {
        let address = keypair.address();
        self.keys.write().insert(
            address,
            StoredKey {
                passphrase_digest: digest(passphrase),
                keypair,
            },
        );
        KeyReference {
            address,
            url: Self::url(&address),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }

    fn url(address: &Address) -> String {
        format!("memory://{}", address)
    }
}

impl Default for MemoryKeystore {
    fn default() -> Self {
        Self::new()
    }
}

fn digest(passphrase: &str) -> [u8; 32] {
    Sha3_256::digest(passphrase.as_bytes()).into()
}

impl Keystore for MemoryKeystore {
    fn create_account(&self, passphrase: &str) -> HarnessResult<KeyReference> {
        let keypair = KeyPair::generate(&mut *self.rng.lock());
        let address = keypair.address();

        let mut keys = self.keys.write();
        if keys.contains_key(&address) {
            return Err(HarnessError::keystore(
                None,
                format!("address collision for {}", address),
            ));
        }
        keys.insert(
            address,
            StoredKey {
                passphrase_digest: digest(passphrase),
                keypair,
            },
        );

        Ok(KeyReference {
            address,
            url: Self::url(&address),
        })
    }

    fn public_key(&self, address: &Address) -> HarnessResult<PublicKey> {
        self.keys
            .read()
            .get(address)
            .map(|stored| stored.keypair.public_key())
            .ok_or_else(|| HarnessError::keystore(None, format!("unknown account {}", address)))
    }

    fn sign(
        &self,
        address: &Address,
        passphrase: &str,
        message: &[u8],
    ) -> HarnessResult<Signature> {
        let keys = self.keys.read();
        let stored = keys
            .get(address)
            .ok_or_else(|| HarnessError::keystore(None, format!("unknown account {}", address)))?;
        if stored.passphrase_digest != digest(passphrase) {
            return Err(HarnessError::keystore(
                None,
                format!("could not unlock {}: wrong passphrase", address),
            ));
        }
        Ok(stored.keypair.sign(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_keystores_generate_same_keys() {
        let a = MemoryKeystore::with_seed(42);
        let b = MemoryKeystore::with_seed(42);
        assert_eq!(
            a.create_account("0").unwrap().address,
            b.create_account("0").unwrap().address
        );
    }

    #[test]
    fn test_sign_requires_passphrase() {
        let keystore = MemoryKeystore::with_seed(1);
        let key = keystore.create_account("secret").unwrap();

        let signature = keystore.sign(&key.address, "secret", b"msg").unwrap();
        let public_key = keystore.public_key(&key.address).unwrap();
        assert!(public_key.verify(b"msg", &signature));

        assert!(keystore.sign(&key.address, "guess", b"msg").is_err());
        assert!(key.url.starts_with("memory://"));
    }

    #[test]
    fn test_import() {
        let keystore = MemoryKeystore::with_seed(1);
        let keypair = KeyPair::from_secret_bytes(&[1u8; 32]);
        let expected = keypair.address();
        let key = keystore.import(keypair, "seed");
        assert_eq!(key.address, expected);
        assert_eq!(keystore.len(), 1);
    }
}
