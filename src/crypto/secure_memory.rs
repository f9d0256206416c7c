//! Secure handling of plaintext secrets
//!
//! Provides buffers that zero their contents on drop, and a scoped temporary
//! file for the rare cases where plaintext must touch the disk (editing the
//! secrets document). The temporary file is owner-only and removed when the
//! guard is dropped, on success and error paths alike.

use std::fmt;
use std::ops::Deref;
use std::path::Path;

use tempfile::NamedTempFile;
use zeroize::Zeroize;

use crate::error::{StackError, StackResult};
use crate::storage::CleanupGuard;

/// A string type that zeros its contents on drop
///
/// Use this for secret values read out of the secrets document.
pub struct SecureString {
    inner: String,
}

impl SecureString {
    /// Create a new SecureString
    pub fn new(s: impl Into<String>) -> Self {
        Self { inner: s.into() }
    }

    /// Get the string contents
    pub fn as_str(&self) -> &str {
        &self.inner
    }
}

impl Drop for SecureString {
    fn drop(&mut self) {
        self.inner.zeroize();
    }
}

impl Deref for SecureString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl From<String> for SecureString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

// Don't print the contents in Debug output
impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureString")
            .field("len", &self.inner.len())
            .finish()
    }
}

// Don't print the contents in Display output
impl fmt::Display for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED {} bytes]", self.inner.len())
    }
}

/// A byte vector that zeros its contents on drop
///
/// Decrypted payloads live in this type until they are written out.
pub struct SecureBytes {
    inner: Vec<u8>,
}

impl SecureBytes {
    /// Create new SecureBytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: bytes.into(),
        }
    }

    /// Get the bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.inner
    }
}

impl Drop for SecureBytes {
    fn drop(&mut self) {
        self.inner.zeroize();
    }
}

impl Deref for SecureBytes {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl AsRef<[u8]> for SecureBytes {
    fn as_ref(&self) -> &[u8] {
        &self.inner
    }
}

impl From<Vec<u8>> for SecureBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl fmt::Debug for SecureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureBytes")
            .field("len", &self.inner.len())
            .finish()
    }
}

/// Owner-only temporary file holding plaintext, removed on drop
pub struct ScopedPlaintextFile {
    file: NamedTempFile,
    _cleanup: CleanupGuard,
}

impl ScopedPlaintextFile {
    /// Create the file inside `dir` and write `contents` to it
    pub fn create_in(dir: &Path, contents: &[u8]) -> StackResult<Self> {
        use std::io::Write;

        let mut file = tempfile::Builder::new()
            .prefix(".plaintext-")
            .tempfile_in(dir)
            .map_err(|e| {
                StackError::FileSystem(format!("Failed to create scoped temp file: {}", e))
            })?;

        let cleanup = CleanupGuard::new(file.path());
        restrict_to_owner(file.path())?;

        file.write_all(contents)
            .and_then(|_| file.flush())
            .map_err(|e| StackError::FileSystem(format!("Failed to write scoped temp file: {}", e)))?;

        Ok(Self {
            file,
            _cleanup: cleanup,
        })
    }

    /// Path of the temporary file
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Read the current contents back (after an editor has run)
    pub fn read(&self) -> StackResult<SecureBytes> {
        let bytes = std::fs::read(self.file.path())
            .map_err(|e| StackError::FileSystem(format!("Failed to read scoped temp file: {}", e)))?;
        Ok(SecureBytes::new(bytes))
    }
}

/// Set mode 0600 on a file
#[cfg(unix)]
pub fn restrict_to_owner(path: &Path) -> StackResult<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(|e| {
        StackError::FileSystem(format!(
            "Failed to restrict permissions on {}: {}",
            path.display(),
            e
        ))
    })
}

#[cfg(not(unix))]
pub fn restrict_to_owner(_path: &Path) -> StackResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_secure_string_debug_and_display_redact() {
        let s = SecureString::new("hunter2");
        assert!(!format!("{:?}", s).contains("hunter2"));
        assert!(format!("{}", s).contains("REDACTED"));
        assert_eq!(s.as_str(), "hunter2");
    }

    #[test]
    fn test_secure_bytes_deref() {
        let b: SecureBytes = vec![1, 2, 3].into();
        assert_eq!(&b[..], &[1, 2, 3]);
        assert!(format!("{:?}", b).contains("len: 3"));
    }

    #[test]
    fn test_scoped_file_removed_on_drop() {
        let temp = TempDir::new().unwrap();
        let path = {
            let scoped = ScopedPlaintextFile::create_in(temp.path(), b"API_KEY: abc").unwrap();
            assert_eq!(scoped.read().unwrap().as_bytes(), b"API_KEY: abc");
            assert!(crate::storage::cleanup::is_registered(scoped.path()));
            scoped.path().to_path_buf()
        };
        assert!(!path.exists());
        assert!(!crate::storage::cleanup::is_registered(&path));
    }

    #[cfg(unix)]
    #[test]
    fn test_scoped_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let scoped = ScopedPlaintextFile::create_in(temp.path(), b"x").unwrap();
        let mode = std::fs::metadata(scoped.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
