//! Cryptographic functions for stackward
//!
//! Artifacts are encrypted to an X25519 recipient key with an AES-256-GCM
//! envelope; only the paired private key can open them. The same envelope
//! protects the secrets document.

pub mod encryption;
pub mod keys;
pub mod secrets;
pub mod secure_memory;

use std::path::PathBuf;

pub use encryption::{decrypt, encrypt, is_encrypted};
pub use keys::{generate_keypair, PrivateKeyHandle, RecipientKey};
pub use secrets::SecretsStore;
pub use secure_memory::{SecureBytes, SecureString};

use crate::config::StackPaths;
use crate::error::StackResult;

/// Key-file-backed encryption used by backup, restore and the secrets store
#[derive(Debug, Clone)]
pub struct CryptoVault {
    public_key: PathBuf,
    private_key: PathBuf,
}

impl CryptoVault {
    /// Create a vault over explicit key file paths
    pub fn new(public_key: PathBuf, private_key: PathBuf) -> Self {
        Self {
            public_key,
            private_key,
        }
    }

    /// Create a vault over the project's `secrets/keys/` files
    pub fn from_paths(paths: &StackPaths) -> Self {
        Self::new(paths.public_key(), paths.private_key())
    }

    /// Encrypt to the recipient public key
    pub fn encrypt(&self, plaintext: &[u8]) -> StackResult<Vec<u8>> {
        let recipient = RecipientKey::load(&self.public_key)?;
        encryption::encrypt(plaintext, &recipient)
    }

    /// Decrypt with the private key, which must be owner-only
    pub fn decrypt(&self, ciphertext: &[u8]) -> StackResult<SecureBytes> {
        let key = PrivateKeyHandle::load(&self.private_key)?;
        encryption::decrypt(ciphertext, &key)
    }

    /// Secrets document operations backed by this vault
    pub fn secrets(&self) -> SecretsStore<'_> {
        SecretsStore::new(self)
    }
}
