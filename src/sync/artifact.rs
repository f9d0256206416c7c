//! A config file replaced through `.new` and `.backup` siblings
//!
//! At every instant either the current file or its `.backup` holds the
//! last-known-good content: the backup is written before the candidate is
//! renamed over the current file.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{StackError, StackResult};
use crate::storage::file_io::{copy_preserving, sibling_with_suffix, write_bytes_atomic};

/// Mode of a freshly created artifact
const DEFAULT_MODE: u32 = 0o644;

#[derive(Debug, Clone)]
pub struct ConfigArtifact {
    current: PathBuf,
    backup: PathBuf,
    candidate: PathBuf,
}

impl ConfigArtifact {
    pub fn new(current: PathBuf) -> Self {
        Self {
            backup: sibling_with_suffix(&current, ".backup"),
            candidate: sibling_with_suffix(&current, ".new"),
            current,
        }
    }

    pub fn current_path(&self) -> &Path {
        &self.current
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup
    }

    pub fn candidate_path(&self) -> &Path {
        &self.candidate
    }

    /// Current content, if the file exists
    pub fn read_current(&self) -> StackResult<Option<String>> {
        match fs::read_to_string(&self.current) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StackError::FileSystem(format!(
                "Failed to read {}: {}",
                self.current.display(),
                e
            ))),
        }
    }

    /// Write the candidate next to the current file
    pub fn stage(&self, content: &str) -> StackResult<()> {
        let mode = current_mode(&self.current).unwrap_or(DEFAULT_MODE);
        write_bytes_atomic(&self.candidate, content.as_bytes(), Some(mode))
    }

    /// Remove an unused candidate
    pub fn discard(&self) -> StackResult<()> {
        match fs::remove_file(&self.candidate) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Activate the staged candidate; returns whether a previous version existed
    pub fn promote(&self) -> StackResult<bool> {
        let had_previous = self.current.exists();
        if had_previous {
            copy_preserving(&self.current, &self.backup)?;
        }
        fs::rename(&self.candidate, &self.current).map_err(|e| {
            StackError::FileSystem(format!(
                "Failed to activate {}: {}",
                self.current.display(),
                e
            ))
        })?;
        tracing::debug!(path = %self.current.display(), had_previous, "candidate promoted");
        Ok(had_previous)
    }

    /// Put the last-known-good content back
    ///
    /// Without a previous version the activated file is removed.
    pub fn rollback(&self, had_previous: bool) -> StackResult<()> {
        if had_previous {
            let restoring = sibling_with_suffix(&self.current, ".rollback");
            copy_preserving(&self.backup, &restoring)?;
            fs::rename(&restoring, &self.current).map_err(|e| {
                let _ = fs::remove_file(&restoring);
                StackError::FileSystem(format!(
                    "Failed to roll back {}: {}",
                    self.current.display(),
                    e
                ))
            })?;
        } else if self.current.exists() {
            fs::remove_file(&self.current)?;
        }
        tracing::info!(path = %self.current.display(), "rolled back to last-known-good");
        Ok(())
    }
}

#[cfg(unix)]
fn current_mode(path: &Path) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).ok().map(|m| m.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn current_mode(_path: &Path) -> Option<u32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_stage_promote_keeps_backup() {
        let temp = TempDir::new().unwrap();
        let artifact = ConfigArtifact::new(temp.path().join("allowlist.nft"));
        fs::write(artifact.current_path(), "old").unwrap();

        assert_eq!(artifact.read_current().unwrap().as_deref(), Some("old"));
        artifact.stage("new").unwrap();
        assert!(artifact.promote().unwrap());

        assert_eq!(fs::read_to_string(artifact.current_path()).unwrap(), "new");
        assert_eq!(fs::read_to_string(artifact.backup_path()).unwrap(), "old");
        assert!(!artifact.candidate_path().exists());
    }

    #[test]
    fn test_rollback_restores_bytes() {
        let temp = TempDir::new().unwrap();
        let artifact = ConfigArtifact::new(temp.path().join("trusted_proxies.caddy"));
        fs::write(artifact.current_path(), "last known good\n").unwrap();

        artifact.stage("broken\n").unwrap();
        let had_previous = artifact.promote().unwrap();
        artifact.rollback(had_previous).unwrap();

        assert_eq!(
            fs::read(artifact.current_path()).unwrap(),
            b"last known good\n"
        );
    }

    #[test]
    fn test_first_sync_rollback_removes_file() {
        let temp = TempDir::new().unwrap();
        let artifact = ConfigArtifact::new(temp.path().join("allowlist.nft"));

        artifact.stage("new").unwrap();
        let had_previous = artifact.promote().unwrap();
        assert!(!had_previous);
        artifact.rollback(had_previous).unwrap();

        assert!(!artifact.current_path().exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_candidate_inherits_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let artifact = ConfigArtifact::new(temp.path().join("allowlist.nft"));
        fs::write(artifact.current_path(), "old").unwrap();
        crate::storage::file_io::set_mode(artifact.current_path(), 0o640).unwrap();

        artifact.stage("new").unwrap();
        let mode = fs::metadata(artifact.candidate_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }

    #[test]
    fn test_discard_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let artifact = ConfigArtifact::new(temp.path().join("a.conf"));
        artifact.stage("x").unwrap();
        artifact.discard().unwrap();
        artifact.discard().unwrap();
        assert!(!artifact.candidate_path().exists());
    }
}
