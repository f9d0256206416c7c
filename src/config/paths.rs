//! Path management for stackward
//!
//! Every file the tool touches is derived from a single project root.
//!
//! ## Root Resolution Order
//!
//! 1. `--root` on the command line
//! 2. `STACKWARD_ROOT` environment variable (read by clap, never by components)
//! 3. The current working directory

use std::path::{Path, PathBuf};

use crate::error::StackError;

/// Name of the settings file inside the project root
pub const SETTINGS_FILE: &str = "stackward.json";

/// Name of the encrypted secrets document inside `secrets/`
pub const SECRETS_DOCUMENT: &str = "secrets.yaml.enc";

/// Manages all paths used by stackward
#[derive(Debug, Clone)]
pub struct StackPaths {
    /// Project root (the compose project directory)
    base_dir: PathBuf,
}

impl StackPaths {
    /// Create StackPaths from an explicit root, or the current directory
    pub fn new(root: Option<PathBuf>) -> Result<Self, StackError> {
        let base_dir = match root {
            Some(root) => root,
            None => std::env::current_dir().map_err(|e| {
                StackError::Config(format!("Could not determine working directory: {}", e))
            })?,
        };
        Ok(Self { base_dir })
    }

    /// Create StackPaths with a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the project root
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Resolve a path that may be relative to the project root
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Get the path to the settings file
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join(SETTINGS_FILE)
    }

    /// Get the root backup directory (`backups/`)
    pub fn backup_dir(&self) -> PathBuf {
        self.base_dir.join("backups")
    }

    /// Get the staging directory for unencrypted payloads
    pub fn staging_dir(&self) -> PathBuf {
        self.backup_dir().join(".staging")
    }

    /// Get the directory holding pre-restore safety copies
    pub fn pre_restore_dir(&self) -> PathBuf {
        self.backup_dir().join("pre-restore")
    }

    /// Get the secrets directory (`secrets/`)
    pub fn secrets_dir(&self) -> PathBuf {
        self.base_dir.join("secrets")
    }

    /// Get the key directory (`secrets/keys/`)
    pub fn keys_dir(&self) -> PathBuf {
        self.secrets_dir().join("keys")
    }

    /// Get the private key path
    pub fn private_key(&self) -> PathBuf {
        self.keys_dir().join("private")
    }

    /// Get the recipient public key path
    pub fn public_key(&self) -> PathBuf {
        self.keys_dir().join("public")
    }

    /// Get the encrypted secrets document path
    pub fn secrets_document(&self) -> PathBuf {
        self.secrets_dir().join(SECRETS_DOCUMENT)
    }

    /// Get the environment file path
    pub fn env_file(&self) -> PathBuf {
        self.base_dir.join(".env")
    }

    /// Get the compose file path
    pub fn compose_file(&self) -> PathBuf {
        self.base_dir.join("docker-compose.yml")
    }

    /// Get the directory of synced config artifacts (`config/`)
    pub fn config_dir(&self) -> PathBuf {
        self.base_dir.join("config")
    }

    /// Get the log directory (`logs/`)
    pub fn log_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the path to the operation journal
    pub fn journal_file(&self) -> PathBuf {
        self.log_dir().join("operations.jsonl")
    }

    /// Files that must be owner-only regardless of archive contents
    pub fn sensitive_files(&self) -> Vec<PathBuf> {
        vec![self.private_key(), self.secrets_document(), self.env_file()]
    }

    /// Ensure all required directories exist
    ///
    /// Creates:
    /// - `backups/{db,full,emergency}`, `backups/.staging`, `backups/pre-restore`
    /// - `secrets/keys`
    /// - `config/`, `logs/`
    pub fn ensure_directories(&self) -> Result<(), StackError> {
        let dirs = [
            self.backup_dir().join("db"),
            self.backup_dir().join("full"),
            self.backup_dir().join("emergency"),
            self.staging_dir(),
            self.pre_restore_dir(),
            self.keys_dir(),
            self.config_dir(),
            self.log_dir(),
        ];

        for dir in dirs {
            std::fs::create_dir_all(&dir).map_err(|e| {
                StackError::FileSystem(format!(
                    "Failed to create directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        Ok(())
    }

    /// Check if stackward has been initialized (settings file exists)
    pub fn is_initialized(&self) -> bool {
        self.settings_file().exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_custom_base_dir() {
        let temp_dir = TempDir::new().unwrap();
        let paths = StackPaths::with_base_dir(temp_dir.path().to_path_buf());

        assert_eq!(paths.base_dir(), temp_dir.path());
        assert_eq!(paths.backup_dir(), temp_dir.path().join("backups"));
        assert_eq!(
            paths.private_key(),
            temp_dir.path().join("secrets").join("keys").join("private")
        );
    }

    #[test]
    fn test_explicit_root() {
        let temp_dir = TempDir::new().unwrap();
        let paths = StackPaths::new(Some(temp_dir.path().to_path_buf())).unwrap();
        assert_eq!(paths.base_dir(), temp_dir.path());
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let paths = StackPaths::with_base_dir(PathBuf::from("/srv/stack"));
        assert_eq!(
            paths.resolve(Path::new("data")),
            PathBuf::from("/srv/stack/data")
        );
        assert_eq!(
            paths.resolve(Path::new("/var/lib/app")),
            PathBuf::from("/var/lib/app")
        );
    }

    #[test]
    fn test_ensure_directories() {
        let temp_dir = TempDir::new().unwrap();
        let paths = StackPaths::with_base_dir(temp_dir.path().to_path_buf());

        paths.ensure_directories().unwrap();

        assert!(paths.backup_dir().join("db").exists());
        assert!(paths.backup_dir().join("emergency").exists());
        assert!(paths.staging_dir().exists());
        assert!(paths.keys_dir().exists());
        assert!(paths.config_dir().exists());
    }
}
