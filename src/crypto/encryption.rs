//! Asymmetric envelope encryption
//!
//! Each artifact is encrypted with a fresh ephemeral X25519 key agreed
//! against the recipient key, and sealed with AES-256-GCM.
//!
//! Layout:
//!
//! ```text
//! | magic "SWV1" (4) | recipient fingerprint (8) | ephemeral public key (32) |
//! | nonce (12) | ciphertext + tag |
//! ```
//!
//! The fingerprint lets decryption tell "encrypted for another key" apart
//! from "damaged on disk".

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::Zeroizing;

use crate::error::{CryptoErrorKind, StackError, StackResult};

use super::keys::{PrivateKeyHandle, RecipientKey, FINGERPRINT_LEN};
use super::secure_memory::SecureBytes;

/// Leading bytes of every encrypted file
pub const MAGIC: &[u8; 4] = b"SWV1";

/// Size of the AES-GCM nonce in bytes (96 bits)
const NONCE_SIZE: usize = 12;

const EPHEMERAL_LEN: usize = 32;

/// Total header length before the ciphertext
pub const HEADER_LEN: usize = MAGIC.len() + FINGERPRINT_LEN + EPHEMERAL_LEN + NONCE_SIZE;

const KDF_DOMAIN: &[u8] = b"stackward/v1/content-key";

/// Whether the bytes carry the encryption header
pub fn is_encrypted(data: &[u8]) -> bool {
    data.len() >= HEADER_LEN && data.starts_with(MAGIC)
}

/// Encrypt plaintext to the recipient key
pub fn encrypt(plaintext: &[u8], recipient: &RecipientKey) -> StackResult<Vec<u8>> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);

    let shared = ephemeral.diffie_hellman(recipient.inner());
    if !shared.was_contributory() {
        return Err(StackError::crypto(
            CryptoErrorKind::Unavailable,
            "Recipient public key is a low-order point",
        ));
    }

    let key = content_key(shared.as_bytes(), ephemeral_public.as_bytes(), recipient.as_bytes());
    let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|e| {
        StackError::crypto(CryptoErrorKind::Unavailable, format!("Failed to create cipher: {}", e))
    })?;

    // Generate random nonce
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher.encrypt(nonce, plaintext).map_err(|e| {
        StackError::crypto(CryptoErrorKind::Unavailable, format!("Encryption failed: {}", e))
    })?;

    let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&recipient.fingerprint());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt data produced by [`encrypt`]
pub fn decrypt(data: &[u8], key: &PrivateKeyHandle) -> StackResult<SecureBytes> {
    if !is_encrypted(data) {
        return Err(StackError::crypto(
            CryptoErrorKind::Corrupt,
            "Missing or truncated encryption header",
        ));
    }

    let (fingerprint, rest) = data[MAGIC.len()..].split_at(FINGERPRINT_LEN);
    let (ephemeral_bytes, rest) = rest.split_at(EPHEMERAL_LEN);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_SIZE);

    let recipient = key.recipient();
    if fingerprint != recipient.fingerprint() {
        return Err(StackError::crypto(
            CryptoErrorKind::WrongKey,
            "Artifact was encrypted for a different key",
        ));
    }

    let mut ephemeral = [0u8; EPHEMERAL_LEN];
    ephemeral.copy_from_slice(ephemeral_bytes);
    let ephemeral_public = PublicKey::from(ephemeral);

    let shared = key.inner().diffie_hellman(&ephemeral_public);
    let content = content_key(shared.as_bytes(), ephemeral_public.as_bytes(), recipient.as_bytes());
    let cipher = Aes256Gcm::new_from_slice(&content[..]).map_err(|e| {
        StackError::crypto(CryptoErrorKind::Unavailable, format!("Failed to create cipher: {}", e))
    })?;

    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| {
            StackError::crypto(
                CryptoErrorKind::Corrupt,
                "Authentication failed: artifact is truncated or modified",
            )
        })?;

    Ok(SecureBytes::new(plaintext))
}

fn content_key(shared: &[u8; 32], ephemeral: &[u8; 32], recipient: &[u8; 32]) -> Zeroizing<[u8; 32]> {
    let mut hasher = Sha256::new();
    hasher.update(KDF_DOMAIN);
    hasher.update(shared);
    hasher.update(ephemeral);
    hasher.update(recipient);
    let digest = hasher.finalize();

    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&digest);
    key
}
