//! X25519 key files
//!
//! `secrets/keys/public` holds the base64 recipient key used to encrypt
//! artifacts. `secrets/keys/private` holds the base64 secret key, optionally
//! preceded by `#` comment lines, and must be readable by its owner only.

use std::fs;
use std::path::Path;

use aes_gcm::aead::OsRng;
use base64::{engine::general_purpose::STANDARD, Engine};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::{CryptoErrorKind, StackError, StackResult};

use super::secure_memory::restrict_to_owner;

/// Length of the recipient fingerprint embedded in artifacts
pub const FINGERPRINT_LEN: usize = 8;

/// Public half of the key pair; anyone holding it can create artifacts
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RecipientKey {
    key: PublicKey,
}

impl RecipientKey {
    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.key.as_bytes()
    }

    /// Short identifier embedded in artifacts to detect wrong-key decryption
    pub fn fingerprint(&self) -> [u8; FINGERPRINT_LEN] {
        let digest = Sha256::digest(self.key.as_bytes());
        let mut out = [0u8; FINGERPRINT_LEN];
        out.copy_from_slice(&digest[..FINGERPRINT_LEN]);
        out
    }

    /// Base64 encoding as written to the public key file
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.key.as_bytes())
    }

    /// Parse a base64 public key
    pub fn from_base64(encoded: &str) -> StackResult<Self> {
        let bytes = decode_key_bytes(encoded.trim(), "public key")?;
        Ok(Self {
            key: PublicKey::from(bytes),
        })
    }

    /// Load the recipient key from disk
    pub fn load(path: &Path) -> StackResult<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            StackError::crypto(
                CryptoErrorKind::Unavailable,
                format!("Cannot read public key {}: {}", path.display(), e),
            )
        })?;
        let line = last_key_line(&contents).ok_or_else(|| {
            StackError::crypto(
                CryptoErrorKind::Unavailable,
                format!("Public key file {} is empty", path.display()),
            )
        })?;
        Self::from_base64(line)
    }

    pub(crate) fn inner(&self) -> &PublicKey {
        &self.key
    }
}

impl std::fmt::Debug for RecipientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RecipientKey({})", self.to_base64())
    }
}

/// Private half of the key pair. The secret is zeroed on drop.
pub struct PrivateKeyHandle {
    secret: StaticSecret,
}

impl PrivateKeyHandle {
    /// Generate a fresh key pair in memory
    pub fn generate() -> Self {
        Self {
            secret: StaticSecret::random_from_rng(OsRng),
        }
    }

    /// The matching recipient key
    pub fn recipient(&self) -> RecipientKey {
        RecipientKey {
            key: PublicKey::from(&self.secret),
        }
    }

    /// Load the private key, refusing files readable by group or others
    pub fn load(path: &Path) -> StackResult<Self> {
        check_owner_only(path)?;

        let contents = Zeroizing::new(fs::read_to_string(path).map_err(|e| {
            StackError::crypto(
                CryptoErrorKind::Unavailable,
                format!("Cannot read private key {}: {}", path.display(), e),
            )
        })?);

        let line = last_key_line(&contents).ok_or_else(|| {
            StackError::crypto(
                CryptoErrorKind::Unavailable,
                format!("Private key file {} is empty", path.display()),
            )
        })?;

        let bytes = Zeroizing::new(decode_key_bytes(line, "private key")?);
        Ok(Self {
            secret: StaticSecret::from(*bytes),
        })
    }

    /// File contents for the private key
    fn to_file_contents(&self) -> Zeroizing<String> {
        let secret = Zeroizing::new(self.secret.to_bytes());
        Zeroizing::new(format!(
            "# stackward private key\n# created: {}\n# public key: {}\n{}\n",
            chrono::Utc::now().to_rfc3339(),
            self.recipient().to_base64(),
            STANDARD.encode(&secret[..])
        ))
    }

    pub(crate) fn inner(&self) -> &StaticSecret {
        &self.secret
    }
}

/// Generate and write a key pair. Never overwrites an existing private key.
pub fn generate_keypair(private_path: &Path, public_path: &Path) -> StackResult<RecipientKey> {
    if private_path.exists() {
        return Err(StackError::Validation(format!(
            "Private key already exists at {}; refusing to overwrite",
            private_path.display()
        )));
    }
    if let Some(parent) = private_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let handle = PrivateKeyHandle::generate();

    // Create empty, restrict, then write: the secret never sits in a
    // world-readable file.
    fs::write(private_path, b"")?;
    restrict_to_owner(private_path)?;
    fs::write(private_path, handle.to_file_contents().as_bytes())?;

    let recipient = handle.recipient();
    fs::write(public_path, format!("{}\n", recipient.to_base64()))?;

    tracing::info!(path = %private_path.display(), "generated new key pair");
    Ok(recipient)
}

/// Fail unless the file has no group/other permission bits
#[cfg(unix)]
pub fn check_owner_only(path: &Path) -> StackResult<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path).map_err(|e| {
        StackError::crypto(
            CryptoErrorKind::Unavailable,
            format!("Cannot stat private key {}: {}", path.display(), e),
        )
    })?;
    let mode = metadata.permissions().mode() & 0o777;
    if mode & 0o077 != 0 {
        return Err(StackError::crypto(
            CryptoErrorKind::Unavailable,
            format!(
                "Private key {} has mode {:o}; it must be readable by its owner only",
                path.display(),
                mode
            ),
        ));
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn check_owner_only(_path: &Path) -> StackResult<()> {
    Ok(())
}

fn last_key_line(contents: &str) -> Option<&str> {
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .last()
}

fn decode_key_bytes(encoded: &str, what: &str) -> StackResult<[u8; 32]> {
    let bytes = Zeroizing::new(STANDARD.decode(encoded).map_err(|e| {
        StackError::crypto(
            CryptoErrorKind::Unavailable,
            format!("Invalid {} encoding: {}", what, e),
        )
    })?);
    if bytes.len() != 32 {
        return Err(StackError::crypto(
            CryptoErrorKind::Unavailable,
            format!("Invalid {} length: expected 32 bytes, got {}", what, bytes.len()),
        ));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}
