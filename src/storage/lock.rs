//! Scoped advisory lock around a directory tree
//!
//! Backup, restore, sweep and sync each hold the lock of the tree they mutate
//! for their whole run. The lock file is created with `create_new`, so two
//! invocations cannot both hold it, and it is removed when the guard drops.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{StackError, StackResult};
use crate::storage::cleanup::CleanupGuard;

/// Name of the lock file placed in the guarded directory
pub const LOCK_FILE: &str = ".stackward.lock";

/// Held lock on a directory tree; released on drop
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,
    _cleanup: CleanupGuard,
}

impl DirLock {
    /// Acquire the lock for `dir`, failing fast when it is already held
    pub fn acquire(dir: &Path, operation: &str) -> StackResult<Self> {
        Self::acquire_with(dir, operation, write_holder)
    }

    fn acquire_with(
        dir: &Path,
        operation: &str,
        holder: impl FnOnce(&mut File, &str) -> StackResult<()>,
    ) -> StackResult<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE);

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    let held_by = fs::read_to_string(&path).unwrap_or_default();
                    StackError::Locked(format!(
                        "{} is locked by another run ({})",
                        dir.display(),
                        held_by.trim()
                    ))
                } else {
                    StackError::FileSystem(format!(
                        "Failed to create lock {}: {}",
                        path.display(),
                        e
                    ))
                }
            })?;

        // The guard owns the file from here on, so a failed write releases it.
        let lock = Self {
            _cleanup: CleanupGuard::new(&path),
            path,
        };
        holder(&mut file, operation)?;

        tracing::debug!(lock = %lock.path.display(), operation, "acquired lock");
        Ok(lock)
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_holder<W: Write>(out: &mut W, operation: &str) -> StackResult<()> {
    writeln!(
        out,
        "pid={} operation={} since={}",
        std::process::id(),
        operation,
        chrono::Utc::now().to_rfc3339()
    )?;
    Ok(())
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(lock = %self.path.display(), error = %e, "failed to release lock");
        }
    }
}
