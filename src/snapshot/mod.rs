//! Payload builders for each backup profile
//!
//! A payload is the plaintext that gets encrypted into an artifact:
//!
//! - Database: gzip of a consistent copy of the live database
//! - Full: tar.gz of the include list, the data directory and a database copy
//! - Emergency: Full plus the private key and a recovery runbook
//!
//! Every payload is written into the staging directory as a `TempPath`, so it
//! disappears when the caller drops it, whether the backup succeeded or not.

pub mod archive;
pub mod manifest;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use rusqlite::{Connection, OpenFlags};
use tempfile::TempPath;

use crate::backup::Profile;
use crate::config::paths::StackPaths;
use crate::config::settings::Settings;
use crate::error::{StackError, StackResult};
use crate::services::{RunState, ServiceController};
use crate::storage::CleanupGuard;

pub use archive::{ArchiveEntry, UnpackRoutes};
pub use manifest::{Manifest, MANIFEST_NAME};

/// First 16 bytes of every SQLite 3 database file
pub const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

/// Prefix of the online copy written inside the data directory
pub const SNAPSHOT_FILE_PREFIX: &str = ".stackward-snapshot-";

/// Side files SQLite keeps next to a live database
const SQLITE_SIDE_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

/// Builds plaintext payloads into a staging directory
pub struct SnapshotBuilder<'a> {
    paths: &'a StackPaths,
    settings: &'a Settings,
    controller: &'a dyn ServiceController,
}

/// Removes a file left in the data directory by the online copy
struct RemoveOnDrop(CleanupGuard);

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        let path = self.0.path();
        if path.exists() {
            if let Err(e) = fs::remove_file(path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove snapshot leftover");
            }
        }
    }
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(
        paths: &'a StackPaths,
        settings: &'a Settings,
        controller: &'a dyn ServiceController,
    ) -> Self {
        Self {
            paths,
            settings,
            controller,
        }
    }

    /// Build the payload for `profile` inside `staging`
    pub fn build(&self, profile: Profile, staging: &Path) -> StackResult<TempPath> {
        match profile {
            Profile::Database => self.build_database_payload(staging),
            Profile::Full => self.build_full_snapshot(staging),
            Profile::Emergency => self.build_emergency_kit(staging),
        }
    }

    /// Consistent, integrity-checked copy of the live database
    ///
    /// A running service is asked for an online copy; the live file is only
    /// copied directly once the service is confirmed stopped.
    pub fn build_database_snapshot(&self, staging: &Path) -> StackResult<TempPath> {
        let db = &self.settings.database;
        let live = self.settings.database_file(self.paths);
        let target = staging_file(staging, "db-snapshot-", ".sqlite3")?;

        let state = self.controller.query_state(&db.service)?;
        match state.run {
            RunState::Running | RunState::Starting => {
                tracing::info!(service = %db.service, "requesting online database copy");
                self.online_copy(&target)?;
            }
            RunState::Stopped => {
                if !live.exists() {
                    return Err(StackError::NotFound {
                        entity_type: "Database",
                        identifier: live.display().to_string(),
                    });
                }
                tracing::info!(db = %live.display(), "service stopped; copying database file");
                copy_database(&live, &target)?;
            }
            RunState::Unknown => {
                return Err(StackError::Service(format!(
                    "State of service '{}' is unknown; refusing to copy a possibly live database",
                    db.service
                )));
            }
        }

        integrity_check(&target)?;
        tracing::debug!(snapshot = %target.display(), "database snapshot passed integrity check");
        Ok(target)
    }

    fn online_copy(&self, target: &Path) -> StackResult<()> {
        let db = &self.settings.database;
        let stamp = Local::now().format("%Y%m%d-%H%M%S%.3f");
        let file_name = format!("{}{}.sqlite3", SNAPSHOT_FILE_PREFIX, stamp);
        let container_dir = db.container_data_dir.trim_end_matches('/');
        let container_db = format!("{}/{}", container_dir, db.file_name);
        let container_out = format!("{}/{}", container_dir, file_name);

        let host_out = self.settings.data_dir(self.paths).join(&file_name);
        let leftover = RemoveOnDrop(CleanupGuard::new(&host_out));

        let command: Vec<String> = db
            .online_backup_command
            .iter()
            .map(|arg| {
                arg.replace("{db}", &container_db)
                    .replace("{out}", &container_out)
            })
            .collect();
        self.controller.exec_in_service(&db.service, &command)?;

        if !host_out.exists() {
            return Err(StackError::Integrity(format!(
                "Online copy did not produce {}; check the data directory mount",
                host_out.display()
            )));
        }

        // The data directory may live on another filesystem than backups/.
        if fs::rename(&host_out, target).is_err() {
            fs::copy(&host_out, target)?;
        }
        drop(leftover);
        Ok(())
    }

    /// gzip of the database snapshot
    pub fn build_database_payload(&self, staging: &Path) -> StackResult<TempPath> {
        let snapshot = self.build_database_snapshot(staging)?;
        let payload = staging_file(staging, "db-payload-", ".sqlite3.gz")?;
        archive::gzip_file(&snapshot, &payload)?;
        Ok(payload)
    }

    /// tar.gz of configuration, secrets store, data directory and database
    pub fn build_full_snapshot(&self, staging: &Path) -> StackResult<TempPath> {
        self.build_tar(Profile::Full, staging)
    }

    /// Full snapshot plus the private key and a recovery runbook
    ///
    /// The result contains key material and must be stored offline, apart from
    /// the regular backups.
    pub fn build_emergency_kit(&self, staging: &Path) -> StackResult<TempPath> {
        let payload = self.build_tar(Profile::Emergency, staging)?;
        tracing::warn!("emergency kit contains the private key; store it offline");
        Ok(payload)
    }

    fn build_tar(&self, profile: Profile, staging: &Path) -> StackResult<TempPath> {
        let snapshot = self.build_database_snapshot(staging)?;
        let mut entries = self.project_entries()?;
        entries.extend(self.data_entries(&snapshot)?);

        if profile.carries_key_material() {
            let private = self.paths.private_key();
            if !private.exists() {
                return Err(StackError::crypto(
                    crate::error::CryptoErrorKind::Unavailable,
                    format!("Private key {} not found", private.display()),
                ));
            }
            let rel = private
                .strip_prefix(self.paths.base_dir())
                .unwrap_or(Path::new("secrets/keys/private"));
            entries.push(ArchiveEntry::file(
                format!("{}/{}", archive::PROJECT_PREFIX, archive::archive_path(rel)),
                private,
            ));
        }

        let host = self.settings.host_name();
        let mut files: Vec<String> = entries.iter().map(|e| e.name.clone()).collect();
        if profile == Profile::Emergency {
            files.push(archive::RUNBOOK_NAME.to_string());
        }

        let manifest = Manifest::new(profile, host.clone(), files.clone());
        let manifest_json = serde_json::to_vec_pretty(&manifest)?;

        let mut ordered = Vec::with_capacity(entries.len() + 2);
        ordered.push(ArchiveEntry::bytes(MANIFEST_NAME, manifest_json, 0o644));
        ordered.extend(entries);
        if profile == Profile::Emergency {
            let runbook =
                archive::render_runbook(&host, &manifest.created_at.to_rfc3339(), &files);
            ordered.push(ArchiveEntry::bytes(
                archive::RUNBOOK_NAME,
                runbook.into_bytes(),
                0o644,
            ));
        }

        let payload = staging_file(staging, &format!("{}-payload-", profile.prefix()), ".tar.gz")?;
        archive::write_tar_gz(&payload, &ordered)?;
        tracing::info!(
            profile = %profile,
            entries = ordered.len(),
            "built archive payload"
        );

        // Keep the snapshot alive until the archive has been written.
        drop(snapshot);
        Ok(payload)
    }

    fn project_entries(&self) -> StackResult<Vec<ArchiveEntry>> {
        let base = self.paths.base_dir();
        let private = self.paths.private_key();
        let backups = self.paths.backup_dir();
        let data_dir = self.settings.data_dir(self.paths);

        let mut entries = Vec::new();
        for include in &self.settings.include {
            let rel = match archive::safe_relative(Path::new(include)) {
                Some(rel) if !rel.as_os_str().is_empty() => rel,
                _ => {
                    return Err(StackError::Config(format!(
                        "include entry '{}' must be a relative path inside the project",
                        include
                    )))
                }
            };
            let path = base.join(&rel);
            if !path.exists() {
                tracing::debug!(path = %path.display(), "include entry missing; skipped");
                continue;
            }
            let prefix = format!("{}/{}", archive::PROJECT_PREFIX, archive::archive_path(&rel));
            let files = archive::collect_files(&path, &prefix, |p| {
                p == private.as_path()
                    || p.starts_with(&backups)
                    || p.starts_with(&data_dir)
                    || is_lock_file(p)
            })?;
            entries.extend(files.into_iter().map(|(name, p)| ArchiveEntry::file(name, p)));
        }
        Ok(entries)
    }

    fn data_entries(&self, snapshot: &Path) -> StackResult<Vec<ArchiveEntry>> {
        let data_dir = self.settings.data_dir(self.paths);
        let live = self.settings.database_file(self.paths);
        let excluded = live_database_files(&live);

        let files = archive::collect_files(&data_dir, archive::DATA_PREFIX, |p| {
            excluded.iter().any(|e| e == p) || is_snapshot_leftover(p)
        })?;

        let mut entries: Vec<ArchiveEntry> = files
            .into_iter()
            .map(|(name, p)| ArchiveEntry::file(name, p))
            .collect();
        entries.push(ArchiveEntry::file(
            format!("{}/{}", archive::DATA_PREFIX, self.settings.database.file_name),
            snapshot.to_path_buf(),
        ));
        Ok(entries)
    }
}

/// The live database and its SQLite side files
pub fn live_database_files(db: &Path) -> Vec<PathBuf> {
    let mut files = vec![db.to_path_buf()];
    files.extend(
        SQLITE_SIDE_SUFFIXES
            .iter()
            .map(|suffix| crate::storage::file_io::sibling_with_suffix(db, suffix)),
    );
    files
}

/// Side files only (`-wal`, `-shm`, `-journal`)
pub fn database_side_files(db: &Path) -> Vec<PathBuf> {
    live_database_files(db).into_iter().skip(1).collect()
}

fn is_snapshot_leftover(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |n| n.starts_with(SNAPSHOT_FILE_PREFIX))
}

fn is_lock_file(path: &Path) -> bool {
    path.file_name()
        .map_or(false, |n| n == crate::storage::lock::LOCK_FILE)
}

fn staging_file(staging: &Path, prefix: &str, suffix: &str) -> StackResult<TempPath> {
    fs::create_dir_all(staging)?;
    let file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile_in(staging)
        .map_err(|e| {
            StackError::FileSystem(format!(
                "Failed to create staging file in {}: {}",
                staging.display(),
                e
            ))
        })?;
    Ok(file.into_temp_path())
}

/// Write a self-contained copy of the database at `src` into `dst`
///
/// Opening `src` replays committed frames still sitting in its `-wal` file, so
/// the copy holds every committed transaction. `dst` must be missing or empty
/// and ends up in rollback-journal mode with no side files.
pub fn copy_database(src: &Path, dst: &Path) -> StackResult<()> {
    let copy_failed = |e: rusqlite::Error| {
        StackError::Integrity(format!("Cannot copy database {}: {}", src.display(), e))
    };
    let dst_name = dst.to_str().ok_or_else(|| {
        StackError::FileSystem(format!("Path {} is not valid UTF-8", dst.display()))
    })?;

    let conn = Connection::open_with_flags(
        src,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(copy_failed)?;
    conn.execute("VACUUM INTO ?1", [dst_name])
        .map_err(copy_failed)?;
    drop(conn);

    let copy = Connection::open_with_flags(
        dst,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(copy_failed)?;
    let mode: String = copy
        .query_row("PRAGMA journal_mode=DELETE", [], |row| row.get(0))
        .map_err(copy_failed)?;
    tracing::debug!(copy = %dst.display(), journal_mode = %mode, "database copied");
    Ok(())
}

/// Whether bytes start with the SQLite 3 file header
pub fn has_sqlite_header(data: &[u8]) -> bool {
    data.starts_with(SQLITE_HEADER)
}

/// Verify a database file with `PRAGMA integrity_check`
pub fn integrity_check(path: &Path) -> StackResult<()> {
    let mut header = [0u8; 16];
    let read = {
        use std::io::Read;
        let mut file = fs::File::open(path)?;
        file.read(&mut header)?
    };
    if read < header.len() || !has_sqlite_header(&header) {
        return Err(StackError::Integrity(format!(
            "{} is not a SQLite database",
            path.display()
        )));
    }

    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| StackError::Integrity(format!("Cannot open {}: {}", path.display(), e)))?;

    let result: String = conn
        .query_row("PRAGMA integrity_check", [], |row| row.get(0))
        .map_err(|e| {
            StackError::Integrity(format!("Integrity check on {} failed: {}", path.display(), e))
        })?;

    if result != "ok" {
        return Err(StackError::Integrity(format!(
            "Integrity check on {} reported: {}",
            path.display(),
            result
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::ServiceState;
    use crate::testing::FakeController;
    use tempfile::TempDir;

    /// Create a small real database at `path`
    pub(crate) fn create_database(path: &Path, rows: &[&str]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let conn = Connection::open(path).unwrap();
        conn.execute("CREATE TABLE IF NOT EXISTS notes (body TEXT NOT NULL)", [])
            .unwrap();
        for row in rows {
            conn.execute("INSERT INTO notes (body) VALUES (?1)", [row]).unwrap();
        }
    }

    /// Database in WAL mode whose rows exist only in the `-wal` file
    ///
    /// The writing connection is leaked so nothing checkpoints on close, as
    /// after a killed process.
    pub(crate) fn create_uncheckpointed_database(path: &Path, rows: &[&str]) {
        for file in live_database_files(path) {
            let _ = fs::remove_file(file);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let conn = Connection::open(path).unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
        let _: i64 = conn
            .query_row("PRAGMA wal_autocheckpoint=0", [], |row| row.get(0))
            .unwrap();
        conn.execute("CREATE TABLE notes (body TEXT NOT NULL)", [])
            .unwrap();
        for row in rows {
            conn.execute("INSERT INTO notes (body) VALUES (?1)", [row]).unwrap();
        }
        std::mem::forget(conn);
        let wal = crate::storage::file_io::sibling_with_suffix(path, "-wal");
        assert!(fs::metadata(wal).unwrap().len() > 0);
    }

    pub(crate) fn read_rows(path: &Path) -> Vec<String> {
        let conn = Connection::open(path).unwrap();
        let mut stmt = conn.prepare("SELECT body FROM notes ORDER BY rowid").unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
    }

    /// Controller whose exec copies the database as the online command would
    pub(crate) fn copying_controller(data_dir: PathBuf, state: ServiceState) -> FakeController {
        FakeController::new(&[("app", state), ("proxy", ServiceState::healthy())]).with_exec(
            move |_, command| {
                let out = command
                    .iter()
                    .find_map(|arg| {
                        let start = arg.find("/data/")?;
                        let rest = &arg[start + "/data/".len()..];
                        let name = rest.trim_end_matches('\'');
                        name.starts_with(SNAPSHOT_FILE_PREFIX).then(|| name.to_string())
                    })
                    .expect("command names an output file");
                fs::copy(data_dir.join("db.sqlite3"), data_dir.join(out)).unwrap();
                Ok(String::new())
            },
        )
    }

    fn setup() -> (TempDir, StackPaths, Settings) {
        let temp = TempDir::new().unwrap();
        let paths = StackPaths::with_base_dir(temp.path().to_path_buf());
        paths.ensure_directories().unwrap();
        let settings = Settings::default();
        create_database(&settings.database_file(&paths), &["first", "second"]);
        fs::create_dir_all(paths.config_dir()).unwrap();
        fs::write(paths.config_dir().join("site.conf"), "listen 443\n").unwrap();
        fs::write(paths.env_file(), "TOKEN=abc\n").unwrap();
        fs::create_dir_all(paths.keys_dir()).unwrap();
        fs::write(paths.private_key(), "private").unwrap();
        fs::write(paths.public_key(), "public").unwrap();
        (temp, paths, settings)
    }

    #[test]
    fn test_online_snapshot_through_running_service() {
        let (_temp, paths, settings) = setup();
        let data_dir = settings.data_dir(&paths);
        let controller = copying_controller(data_dir.clone(), ServiceState::healthy());
        let builder = SnapshotBuilder::new(&paths, &settings, &controller);

        let snapshot = builder.build_database_snapshot(&paths.staging_dir()).unwrap();

        assert_eq!(read_rows(&snapshot), vec!["first", "second"]);
        let execs = controller.batches("exec");
        assert_eq!(execs.len(), 1);
        assert_eq!(execs[0][0], "app");
        assert_eq!(execs[0][2], "/data/db.sqlite3");
        // Nothing left behind in the data directory
        let leftovers: Vec<_> = fs::read_dir(&data_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| is_snapshot_leftover(&e.path()))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_stopped_service_copies_file() {
        let (_temp, paths, settings) = setup();
        let controller = FakeController::new(&[("app", ServiceState::stopped())]);
        let builder = SnapshotBuilder::new(&paths, &settings, &controller);

        let snapshot = builder.build_database_snapshot(&paths.staging_dir()).unwrap();

        assert_eq!(read_rows(&snapshot), vec!["first", "second"]);
        assert!(controller.batches("exec").is_empty());
    }

    #[test]
    fn test_stopped_snapshot_keeps_rows_only_in_wal() {
        let (_temp, paths, settings) = setup();
        let live = settings.database_file(&paths);
        create_uncheckpointed_database(&live, &["committed before the crash"]);
        let controller = FakeController::new(&[("app", ServiceState::stopped())]);
        let builder = SnapshotBuilder::new(&paths, &settings, &controller);

        let snapshot = builder.build_database_snapshot(&paths.staging_dir()).unwrap();

        assert_eq!(read_rows(&snapshot), vec!["committed before the crash"]);
        for side in database_side_files(&snapshot) {
            assert!(!side.exists(), "{} left next to the snapshot", side.display());
        }
    }

    #[test]
    fn test_copy_database_is_standalone() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("live.sqlite3");
        let dst = temp.path().join("copy.sqlite3");
        create_uncheckpointed_database(&src, &["a", "b"]);

        copy_database(&src, &dst).unwrap();

        // Readable on its own, without the source's -wal file
        let moved = temp.path().join("moved.sqlite3");
        fs::rename(&dst, &moved).unwrap();
        integrity_check(&moved).unwrap();
        assert_eq!(read_rows(&moved), vec!["a", "b"]);
    }

    #[test]
    fn test_unknown_state_refused() {
        let (_temp, paths, settings) = setup();
        let controller = FakeController::new(&[]);
        let builder = SnapshotBuilder::new(&paths, &settings, &controller);

        let err = builder
            .build_database_snapshot(&paths.staging_dir())
            .unwrap_err();
        assert!(matches!(err, StackError::Service(_)));
    }

    #[test]
    fn test_corrupt_database_fails_integrity() {
        let (_temp, paths, settings) = setup();
        let mut bytes = SQLITE_HEADER.to_vec();
        bytes.extend(std::iter::repeat(0xAB).take(4096));
        fs::write(settings.database_file(&paths), bytes).unwrap();
        let controller = FakeController::new(&[("app", ServiceState::stopped())]);
        let builder = SnapshotBuilder::new(&paths, &settings, &controller);

        let err = builder
            .build_database_snapshot(&paths.staging_dir())
            .unwrap_err();
        assert!(matches!(err, StackError::Integrity(_)));
    }

    #[test]
    fn test_integrity_check_rejects_non_sqlite() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("plain.txt");
        fs::write(&path, "hello world, not a database").unwrap();
        assert!(matches!(
            integrity_check(&path),
            Err(StackError::Integrity(_))
        ));
    }

    #[test]
    fn test_database_payload_is_gzipped_sqlite() {
        let (_temp, paths, settings) = setup();
        let controller = FakeController::new(&[("app", ServiceState::stopped())]);
        let builder = SnapshotBuilder::new(&paths, &settings, &controller);

        let payload = builder.build(Profile::Database, &paths.staging_dir()).unwrap();
        let bytes = fs::read(&payload).unwrap();

        assert!(archive::is_gzip(&bytes));
        assert!(has_sqlite_header(&archive::gunzip_prefix(&bytes, 16).unwrap()));
    }

    #[test]
    fn test_full_snapshot_layout() {
        let (_temp, paths, settings) = setup();
        fs::write(settings.data_dir(&paths).join("db.sqlite3-wal"), "wal").unwrap();
        fs::create_dir_all(settings.data_dir(&paths).join("uploads")).unwrap();
        fs::write(settings.data_dir(&paths).join("uploads/a.png"), "png").unwrap();
        let controller = FakeController::new(&[("app", ServiceState::stopped())]);
        let builder = SnapshotBuilder::new(&paths, &settings, &controller);

        let payload = builder.build_full_snapshot(&paths.staging_dir()).unwrap();
        let bytes = fs::read(&payload).unwrap();
        let names = archive::list_entries(&bytes).unwrap();

        assert_eq!(names[0], MANIFEST_NAME);
        assert!(names.contains(&"project/config/site.conf".to_string()));
        assert!(names.contains(&"project/.env".to_string()));
        assert!(names.contains(&"project/secrets/keys/public".to_string()));
        assert!(names.contains(&"data/uploads/a.png".to_string()));
        assert!(names.contains(&"data/db.sqlite3".to_string()));
        assert!(!names.contains(&"project/secrets/keys/private".to_string()));
        assert!(!names.contains(&"data/db.sqlite3-wal".to_string()));
        assert!(!names.contains(&archive::RUNBOOK_NAME.to_string()));

        let manifest: Manifest =
            serde_json::from_slice(&archive::read_entry(&bytes, MANIFEST_NAME).unwrap().unwrap())
                .unwrap();
        assert_eq!(manifest.profile, Profile::Full);
        assert!(!manifest.offline_storage);
    }

    #[test]
    fn test_emergency_kit_carries_key_and_runbook() {
        let (_temp, paths, settings) = setup();
        let controller = FakeController::new(&[("app", ServiceState::stopped())]);
        let builder = SnapshotBuilder::new(&paths, &settings, &controller);

        let payload = builder.build_emergency_kit(&paths.staging_dir()).unwrap();
        let bytes = fs::read(&payload).unwrap();
        let names = archive::list_entries(&bytes).unwrap();

        assert!(names.contains(&"project/secrets/keys/private".to_string()));
        assert_eq!(names.last().unwrap(), archive::RUNBOOK_NAME);
        let manifest: Manifest =
            serde_json::from_slice(&archive::read_entry(&bytes, MANIFEST_NAME).unwrap().unwrap())
                .unwrap();
        assert!(manifest.offline_storage);
    }

    #[test]
    fn test_staging_files_removed_on_drop() {
        let (_temp, paths, settings) = setup();
        let controller = FakeController::new(&[("app", ServiceState::stopped())]);
        let builder = SnapshotBuilder::new(&paths, &settings, &controller);

        let payload = builder.build_full_snapshot(&paths.staging_dir()).unwrap();
        drop(payload);

        assert_eq!(fs::read_dir(paths.staging_dir()).unwrap().count(), 0);
    }
}
