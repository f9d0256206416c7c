//! File I/O utilities with atomic writes
//!
//! Provides safe file operations that won't corrupt data on failure: every
//! replacement goes through a sibling temp file, fsync, and rename.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::settings::Ownership;
use crate::error::{StackError, StackResult};

/// Write bytes to a file atomically (write to temp, then rename)
///
/// The file is either completely written or not modified at all. When `mode`
/// is given it is applied to the temp file before any content is written.
pub fn write_bytes_atomic(path: &Path, data: &[u8], mode: Option<u32>) -> StackResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            StackError::FileSystem(format!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    let temp_path = sibling_with_suffix(path, ".tmp");

    let file = File::create(&temp_path)
        .map_err(|e| StackError::FileSystem(format!("Failed to create temp file: {}", e)))?;

    if let Some(mode) = mode {
        set_mode(&temp_path, mode)?;
    }

    let mut writer = BufWriter::new(file);
    let written = writer
        .write_all(data)
        .and_then(|_| writer.flush())
        .and_then(|_| writer.get_ref().sync_all());
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(StackError::FileSystem(format!(
            "Failed to write {}: {}",
            temp_path.display(),
            e
        )));
    }

    fs::rename(&temp_path, path).map_err(|e| {
        // Try to clean up temp file if rename fails
        let _ = fs::remove_file(&temp_path);
        StackError::FileSystem(format!("Failed to rename temp file: {}", e))
    })?;

    Ok(())
}

/// `path` with `suffix` appended to its file name (`a.conf` -> `a.conf.new`)
pub fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Copy a file, preserving mode and (when permitted) owner
pub fn copy_preserving(src: &Path, dst: &Path) -> StackResult<()> {
    fs::copy(src, dst).map_err(|e| {
        StackError::FileSystem(format!(
            "Failed to copy {} to {}: {}",
            src.display(),
            dst.display(),
            e
        ))
    })?;

    let metadata = fs::metadata(src)?;
    fs::set_permissions(dst, metadata.permissions())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        // Only root can chown to another user; an unprivileged run keeps
        // its own ownership, which matches the source in that case.
        if let Err(e) = std::os::unix::fs::chown(dst, Some(metadata.uid()), Some(metadata.gid())) {
            tracing::debug!(path = %dst.display(), error = %e, "could not preserve owner");
        }
    }

    File::open(dst)?.sync_all()?;
    Ok(())
}

/// Recursively copy `src` into `dst`, skipping any path in `exclude`
///
/// Returns the number of files copied. Symlinks are recreated, not followed.
pub fn copy_tree(src: &Path, dst: &Path, exclude: &[PathBuf]) -> StackResult<usize> {
    if exclude.iter().any(|e| e == src) {
        return Ok(0);
    }

    let metadata = fs::symlink_metadata(src)?;
    if metadata.is_file() {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        copy_preserving(src, dst)?;
        return Ok(1);
    }

    #[cfg(unix)]
    if metadata.file_type().is_symlink() {
        let target = fs::read_link(src)?;
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        std::os::unix::fs::symlink(target, dst)?;
        return Ok(0);
    }

    fs::create_dir_all(dst)?;
    let mut copied = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        copied += copy_tree(&entry.path(), &dst.join(entry.file_name()), exclude)?;
    }
    Ok(copied)
}

/// Set a Unix mode on a path
#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> StackResult<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| {
        StackError::FileSystem(format!(
            "Failed to set mode {:o} on {}: {}",
            mode,
            path.display(),
            e
        ))
    })
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> StackResult<()> {
    Ok(())
}

/// Apply an owner to every entry below (and including) `root`
#[cfg(unix)]
pub fn apply_ownership(root: &Path, owner: Ownership) -> StackResult<usize> {
    let mut changed = 0;
    let mut stack = vec![root.to_path_buf()];

    while let Some(path) = stack.pop() {
        let metadata = match fs::symlink_metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };

        std::os::unix::fs::lchown(&path, Some(owner.uid), Some(owner.gid)).map_err(|e| {
            StackError::FileSystem(format!(
                "Failed to chown {} to {}:{}: {}",
                path.display(),
                owner.uid,
                owner.gid,
                e
            ))
        })?;
        changed += 1;

        if metadata.is_dir() {
            for entry in fs::read_dir(&path)? {
                stack.push(entry?.path());
            }
        }
    }

    Ok(changed)
}

#[cfg(not(unix))]
pub fn apply_ownership(_root: &Path, _owner: Ownership) -> StackResult<usize> {
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.conf");

        write_bytes_atomic(&path, b"trusted 10.0.0.0/8\n", None).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"trusted 10.0.0.0/8\n");
    }

    #[test]
    fn test_atomic_write_no_temp_file_left() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.conf");

        write_bytes_atomic(&path, b"data", None).unwrap();

        assert!(path.exists());
        assert!(!temp_dir.path().join("test.conf.tmp").exists());
    }

    #[test]
    fn test_write_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("dir").join("test.conf");

        write_bytes_atomic(&path, b"data", None).unwrap();
        assert!(path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_write_with_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("secret");
        write_bytes_atomic(&path, b"data", Some(0o600)).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_sibling_with_suffix() {
        let path = Path::new("/srv/config/allowlist.nft");
        assert_eq!(
            sibling_with_suffix(path, ".new"),
            PathBuf::from("/srv/config/allowlist.nft.new")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_preserving_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        fs::write(&src, b"abc").unwrap();
        set_mode(&src, 0o640).unwrap();

        copy_preserving(&src, &dst).unwrap();

        assert_eq!(fs::read(&dst).unwrap(), b"abc");
        let mode = fs::metadata(&dst).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }

    #[test]
    fn test_copy_tree_with_exclusions() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("project");
        fs::create_dir_all(src.join("config")).unwrap();
        fs::create_dir_all(src.join("backups")).unwrap();
        fs::write(src.join("config").join("a.conf"), b"a").unwrap();
        fs::write(src.join("backups").join("old.enc"), b"x").unwrap();
        fs::write(src.join(".env"), b"KEY=1").unwrap();

        let dst = temp_dir.path().join("copy");
        let copied = copy_tree(&src, &dst, &[src.join("backups")]).unwrap();

        assert_eq!(copied, 2);
        assert!(dst.join("config").join("a.conf").exists());
        assert!(dst.join(".env").exists());
        assert!(!dst.join("backups").exists());
    }
}
