//! Encrypted secrets document
//!
//! The document is a YAML mapping of secret names to values, encrypted to the
//! stack's recipient key. Plaintext only exists in zeroizing buffers and, while
//! an operator edits it, in an owner-only temporary file that is removed on
//! every exit path.

use std::fs;
use std::path::Path;
use std::process::Command;

use crate::error::{StackError, StackResult};
use crate::storage::file_io::write_bytes_atomic;

use super::encryption;
use super::secure_memory::{ScopedPlaintextFile, SecureBytes, SecureString};
use super::CryptoVault;

/// Operations on the encrypted secrets document
pub struct SecretsStore<'a> {
    vault: &'a CryptoVault,
}

impl<'a> SecretsStore<'a> {
    pub fn new(vault: &'a CryptoVault) -> Self {
        Self { vault }
    }

    /// Whether the file at `path` carries the encryption header
    pub fn is_encrypted(&self, path: &Path) -> StackResult<bool> {
        let data = fs::read(path).map_err(|e| {
            StackError::FileSystem(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Ok(encryption::is_encrypted(&data))
    }

    /// Decrypt the whole document into memory
    pub fn decrypt_to_bytes(&self, path: &Path) -> StackResult<SecureBytes> {
        let data = fs::read(path).map_err(|e| {
            StackError::FileSystem(format!("Failed to read {}: {}", path.display(), e))
        })?;
        self.vault.decrypt(&data)
    }

    /// Encrypt a plaintext document in place. Returns false when it already was.
    pub fn encrypt_in_place(&self, path: &Path) -> StackResult<bool> {
        let data = SecureBytes::new(fs::read(path).map_err(|e| {
            StackError::FileSystem(format!("Failed to read {}: {}", path.display(), e))
        })?);

        if encryption::is_encrypted(&data) {
            return Ok(false);
        }

        parse_document(&data)?;
        let encrypted = self.vault.encrypt(&data)?;
        write_bytes_atomic(path, &encrypted, Some(0o600))?;

        tracing::info!(path = %path.display(), "encrypted secrets document in place");
        Ok(true)
    }

    /// Open the decrypted document in `editor`, then re-encrypt it
    ///
    /// A missing document starts out empty. Invalid YAML is rejected and the
    /// encrypted document is left untouched.
    pub fn interactive_edit(&self, path: &Path, editor: &str) -> StackResult<()> {
        let plaintext = if path.exists() {
            self.decrypt_to_bytes(path)?
        } else {
            SecureBytes::new(Vec::new())
        };

        let scratch_dir = path
            .parent()
            .ok_or_else(|| StackError::Config(format!("{} has no parent", path.display())))?;
        fs::create_dir_all(scratch_dir)?;

        let scoped = ScopedPlaintextFile::create_in(scratch_dir, &plaintext)?;

        let status = Command::new(editor)
            .arg(scoped.path())
            .status()
            .map_err(|e| StackError::Config(format!("Failed to launch editor '{}': {}", editor, e)))?;
        if !status.success() {
            return Err(StackError::Validation(format!(
                "Editor exited with {}; secrets document unchanged",
                status
            )));
        }

        let edited = scoped.read()?;
        parse_document(&edited)?;

        let encrypted = self.vault.encrypt(&edited)?;
        write_bytes_atomic(path, &encrypted, Some(0o600))?;

        tracing::info!(path = %path.display(), "secrets document updated");
        Ok(())
    }

    /// Look up one secret by name
    ///
    /// Decrypts the whole document; secret counts are small, so a linear scan
    /// over the mapping is fine.
    pub fn get_secret(&self, path: &Path, name: &str) -> StackResult<SecureString> {
        let plaintext = self.decrypt_to_bytes(path)?;
        let document = parse_document(&plaintext)?;

        for (key, value) in document.iter() {
            if key.as_str() == Some(name) {
                return scalar_to_string(name, value);
            }
        }

        Err(StackError::SecretNotFound(name.to_string()))
    }
}

fn parse_document(data: &[u8]) -> StackResult<serde_yaml::Mapping> {
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_yaml::Mapping::new());
    }
    serde_yaml::from_slice(data)
        .map_err(|e| StackError::Validation(format!("Secrets document is not a YAML mapping: {}", e)))
}

fn scalar_to_string(name: &str, value: &serde_yaml::Value) -> StackResult<SecureString> {
    match value {
        serde_yaml::Value::String(s) => Ok(SecureString::new(s.clone())),
        serde_yaml::Value::Number(n) => Ok(SecureString::new(n.to_string())),
        serde_yaml::Value::Bool(b) => Ok(SecureString::new(b.to_string())),
        _ => Err(StackError::Validation(format!(
            "Secret '{}' is not a scalar value",
            name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::generate_keypair;
    use tempfile::TempDir;

    fn vault_in(temp: &TempDir) -> CryptoVault {
        let private = temp.path().join("private");
        let public = temp.path().join("public");
        generate_keypair(&private, &public).unwrap();
        CryptoVault::new(public, private)
    }

    #[test]
    fn test_encrypt_in_place_then_get_secret() {
        let temp = TempDir::new().unwrap();
        let vault = vault_in(&temp);
        let doc = temp.path().join("secrets.yaml.enc");
        fs::write(&doc, "ADMIN_TOKEN: s3cret\nSMTP_PORT: 587\n").unwrap();

        let store = SecretsStore::new(&vault);
        assert!(!store.is_encrypted(&doc).unwrap());
        assert!(store.encrypt_in_place(&doc).unwrap());
        assert!(store.is_encrypted(&doc).unwrap());
        assert!(!store.encrypt_in_place(&doc).unwrap());

        assert_eq!(store.get_secret(&doc, "ADMIN_TOKEN").unwrap().as_str(), "s3cret");
        assert_eq!(store.get_secret(&doc, "SMTP_PORT").unwrap().as_str(), "587");
    }

    #[test]
    fn test_missing_secret() {
        let temp = TempDir::new().unwrap();
        let vault = vault_in(&temp);
        let doc = temp.path().join("secrets.yaml.enc");
        fs::write(&doc, "A: b\n").unwrap();

        let store = SecretsStore::new(&vault);
        store.encrypt_in_place(&doc).unwrap();

        let err = store.get_secret(&doc, "MISSING").err().unwrap();
        assert!(matches!(err, StackError::SecretNotFound(name) if name == "MISSING"));
    }

    #[test]
    fn test_invalid_document_not_encrypted() {
        let temp = TempDir::new().unwrap();
        let vault = vault_in(&temp);
        let doc = temp.path().join("secrets.yaml.enc");
        fs::write(&doc, "- just\n- a list\n").unwrap();

        let store = SecretsStore::new(&vault);
        assert!(store.encrypt_in_place(&doc).is_err());
        assert_eq!(fs::read_to_string(&doc).unwrap(), "- just\n- a list\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_interactive_edit_with_scripted_editor() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let vault = vault_in(&temp);
        let doc = temp.path().join("secrets").join("secrets.yaml.enc");

        let editor = temp.path().join("editor.sh");
        fs::write(&editor, "#!/bin/sh\necho 'NEW_KEY: value' >> \"$1\"\n").unwrap();
        fs::set_permissions(&editor, fs::Permissions::from_mode(0o755)).unwrap();

        let store = SecretsStore::new(&vault);
        store
            .interactive_edit(&doc, editor.to_str().unwrap())
            .unwrap();

        assert!(store.is_encrypted(&doc).unwrap());
        assert_eq!(store.get_secret(&doc, "NEW_KEY").unwrap().as_str(), "value");

        // Only the encrypted document remains; the scratch file is gone.
        let leftovers: Vec<_> = fs::read_dir(doc.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }
}
