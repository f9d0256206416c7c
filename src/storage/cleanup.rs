//! Paths to remove when the process is interrupted
//!
//! SIGINT ends the process without unwinding, so no `Drop` runs. Anything that
//! must not outlive an interrupted run (plaintext staging, the secrets scratch
//! file, held lock files) is registered here through a [`CleanupGuard`] while
//! it exists, and the interrupt handler removes whatever is still registered.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

static GLOBAL: CleanupRegistry = CleanupRegistry::new();

/// Set of paths removed on interrupt
#[derive(Debug)]
pub struct CleanupRegistry {
    paths: Mutex<Vec<PathBuf>>,
}

impl CleanupRegistry {
    pub const fn new() -> Self {
        Self {
            paths: Mutex::new(Vec::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<PathBuf>> {
        // A panic elsewhere must not stop the interrupt cleanup.
        self.paths.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, path: &Path) {
        self.entries().push(path.to_path_buf());
    }

    /// Forget one registration of `path`
    pub fn unregister(&self, path: &Path) {
        let mut entries = self.entries();
        if let Some(pos) = entries.iter().rposition(|p| p == path) {
            entries.remove(pos);
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries().iter().any(|p| p == path)
    }

    /// Remove every registered file or directory, newest first
    ///
    /// Returns how many existing paths were removed. Failures are logged and
    /// skipped.
    pub fn remove_all(&self) -> usize {
        let paths: Vec<PathBuf> = self.entries().drain(..).rev().collect();
        let mut removed = 0;
        for path in paths {
            let result = match fs::symlink_metadata(&path) {
                Ok(meta) if meta.is_dir() => fs::remove_dir_all(&path),
                Ok(_) => fs::remove_file(&path),
                Err(_) => continue,
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cleanup failed")
                }
            }
        }
        removed
    }
}

impl Default for CleanupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration of one path in the process-wide registry, dropped with it
#[derive(Debug)]
pub struct CleanupGuard {
    path: PathBuf,
}

impl CleanupGuard {
    pub fn new(path: &Path) -> Self {
        GLOBAL.register(path);
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        GLOBAL.unregister(&self.path);
    }
}

/// Whether `path` is currently registered process-wide
pub fn is_registered(path: &Path) -> bool {
    GLOBAL.contains(path)
}

/// Remove every path registered process-wide
pub fn remove_registered() -> usize {
    let removed = GLOBAL.remove_all();
    tracing::warn!(removed, "interrupted; removed registered temporary files");
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_remove_all_deletes_files_and_directories() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join(".stackward.lock");
        let dir = temp.path().join("staging");
        fs::write(&file, "pid=1").unwrap();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("db-payload-1.sqlite3.gz"), "plaintext").unwrap();
        let registry = CleanupRegistry::new();
        registry.register(&file);
        registry.register(&dir);
        registry.register(&temp.path().join("already-gone"));

        assert_eq!(registry.remove_all(), 2);

        assert!(!file.exists());
        assert!(!dir.exists());
        assert!(!registry.contains(&file));
    }

    #[test]
    fn test_unregistered_paths_survive() {
        let temp = TempDir::new().unwrap();
        let kept = temp.path().join("kept");
        fs::write(&kept, "x").unwrap();
        let registry = CleanupRegistry::new();
        registry.register(&kept);
        registry.unregister(&kept);

        assert_eq!(registry.remove_all(), 0);
        assert!(kept.exists());
    }

    #[test]
    fn test_guard_registers_until_dropped() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("scratch");

        let guard = CleanupGuard::new(&path);
        assert!(is_registered(guard.path()));
        drop(guard);

        assert!(!is_registered(&path));
    }
}
