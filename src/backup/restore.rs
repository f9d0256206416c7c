//! Backup restoration for stackward
//!
//! Every restore follows the same order:
//!
//! 1. decrypt and verify the artifact (no service is touched yet)
//! 2. ask for typed confirmation unless forced
//! 3. stop services and take a safety copy
//! 4. write the restored files
//! 5. start services and wait for them to become healthy
//!
//! A failed start is reported but never reverted automatically; the safety
//! copy is left in place for the operator.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::config::paths::StackPaths;
use crate::config::settings::Settings;
use crate::crypto::{CryptoVault, SecureBytes};
use crate::error::{StackError, StackResult};
use crate::services::{RunState, ServiceController};
use crate::snapshot::{archive, database_side_files, integrity_check, UnpackRoutes};
use crate::storage::file_io::{
    apply_ownership, copy_preserving, copy_tree, set_mode, sibling_with_suffix, write_bytes_atomic,
};
use crate::storage::{CleanupGuard, DirLock};

use super::artifact::{Profile, TIMESTAMP_FORMAT};
use super::detect::{profile_from_name, profile_from_payload};

/// Word the operator must type to confirm a restore
pub const CONFIRM_WORD: &str = "RESTORE";

/// Asks the operator to confirm a destructive step
pub trait Confirm {
    /// Returns true only when the operator typed the confirmation word
    fn confirm(&self, prompt: &str) -> StackResult<bool>;
}

/// Options of one restore run
#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreOptions {
    /// Skip the typed confirmation
    pub force: bool,
    /// Verify and report without mutating anything
    pub dry_run: bool,
}

/// What a restore did (or would do)
#[derive(Debug)]
pub struct RestoreReport {
    pub profile: Profile,
    pub dry_run: bool,
    /// Steps in order; on a dry run, the mutations that were skipped
    pub steps: Vec<String>,
    /// Safety copy of the replaced state
    pub safety_copy: Option<PathBuf>,
    /// Recovery runbook text (emergency kits)
    pub runbook: Option<String>,
    /// Where the runbook was persisted
    pub runbook_path: Option<PathBuf>,
    /// Services that did not become healthy in time
    pub unhealthy: Vec<String>,
    /// Non-fatal problems during best-effort steps
    pub warnings: Vec<String>,
}

impl RestoreReport {
    fn new(profile: Profile, dry_run: bool) -> Self {
        Self {
            profile,
            dry_run,
            steps: Vec::new(),
            safety_copy: None,
            runbook: None,
            runbook_path: None,
            unhealthy: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Whether the operator has to follow up
    pub fn needs_action(&self) -> bool {
        !self.unhealthy.is_empty()
    }

    fn step(&mut self, text: impl Into<String>) {
        let text = text.into();
        if self.dry_run {
            tracing::info!(step = %text, "dry run: skipped");
            self.steps.push(format!("would {}", text));
        } else {
            tracing::info!(step = %text, "restore step");
            self.steps.push(text);
        }
    }

    fn verified(&mut self, text: impl Into<String>) {
        let text = text.into();
        tracing::info!(check = %text, "verified");
        self.steps.push(format!("verified {}", text));
    }
}

/// A decrypted artifact that passed verification
enum VerifiedPayload {
    /// Decompressed database bytes
    Database(SecureBytes),
    /// tar.gz bytes with their entry list
    Archive { data: SecureBytes, entries: Vec<String> },
}

/// Restores artifacts over the live stack
pub struct RestoreEngine<'a> {
    paths: &'a StackPaths,
    settings: &'a Settings,
    vault: &'a CryptoVault,
    controller: &'a dyn ServiceController,
    confirm: &'a dyn Confirm,
}

impl<'a> RestoreEngine<'a> {
    pub fn new(
        paths: &'a StackPaths,
        settings: &'a Settings,
        vault: &'a CryptoVault,
        controller: &'a dyn ServiceController,
        confirm: &'a dyn Confirm,
    ) -> Self {
        Self {
            paths,
            settings,
            vault,
            controller,
            confirm,
        }
    }

    /// Restore `artifact`, detecting the profile unless one is given
    pub fn restore(
        &self,
        artifact: &Path,
        profile: Option<Profile>,
        options: RestoreOptions,
    ) -> StackResult<RestoreReport> {
        let _lock = DirLock::acquire(&self.paths.backup_dir(), "restore")?;
        let _staging = CleanupGuard::new(&self.paths.staging_dir());

        if !artifact.is_file() {
            return Err(StackError::artifact_not_found(artifact.display().to_string()));
        }
        let ciphertext = fs::read(artifact)?;
        let plaintext = self.vault.decrypt(&ciphertext)?;
        drop(ciphertext);

        let profile = match profile {
            Some(p) => p,
            None => artifact
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(profile_from_name)
                .or_else(|| profile_from_payload(&plaintext))
                .ok_or_else(|| {
                    StackError::Validation(format!(
                        "Cannot determine the profile of {}; pass --profile explicitly",
                        artifact.display()
                    ))
                })?,
        };

        let mut report = RestoreReport::new(profile, options.dry_run);
        report.verified(format!("decryption of {}", artifact.display()));
        let verified = self.verify(profile, plaintext, &mut report)?;

        if !options.dry_run && !options.force {
            let prompt = format!(
                "Restoring {} will replace live data. Type {} to continue",
                profile, CONFIRM_WORD
            );
            if !self.confirm.confirm(&prompt)? {
                tracing::info!("restore declined by operator");
                return Err(StackError::UserAborted);
            }
        }

        let stamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        match verified {
            VerifiedPayload::Database(db) => self.restore_database(&db, &stamp, &mut report)?,
            VerifiedPayload::Archive { data, entries } => {
                self.restore_archive(profile, &data, &entries, &stamp, &mut report)?
            }
        }

        Ok(report)
    }

    /// Decompress and integrity-check the payload before anything is touched
    fn verify(
        &self,
        profile: Profile,
        plaintext: SecureBytes,
        report: &mut RestoreReport,
    ) -> StackResult<VerifiedPayload> {
        match profile {
            Profile::Database => {
                let db = SecureBytes::new(archive::gunzip(&plaintext)?);
                self.check_database_bytes(&db)?;
                report.verified("database integrity");
                Ok(VerifiedPayload::Database(db))
            }
            Profile::Full | Profile::Emergency => {
                let entries = archive::list_entries(&plaintext)?;
                if let Some(bad) = entries
                    .iter()
                    .find(|e| archive::safe_relative(Path::new(e)).is_none())
                {
                    return Err(StackError::Integrity(format!(
                        "Archive entry '{}' escapes the restore root",
                        bad
                    )));
                }
                report.verified(format!("archive listing ({} entries)", entries.len()));

                let db_entry = format!(
                    "{}/{}",
                    archive::DATA_PREFIX,
                    self.settings.database.file_name
                );
                match archive::read_entry(&plaintext, &db_entry)? {
                    Some(bytes) => {
                        self.check_database_bytes(&SecureBytes::new(bytes))?;
                        report.verified("database integrity");
                    }
                    None => report
                        .warnings
                        .push(format!("archive carries no {}", db_entry)),
                }

                if profile == Profile::Emergency
                    && !entries.iter().any(|e| e == archive::RUNBOOK_NAME)
                {
                    report
                        .warnings
                        .push("emergency kit carries no recovery runbook".to_string());
                }
                Ok(VerifiedPayload::Archive {
                    data: plaintext,
                    entries,
                })
            }
        }
    }

    fn check_database_bytes(&self, db: &[u8]) -> StackResult<()> {
        let staging = self.paths.staging_dir();
        fs::create_dir_all(&staging)?;
        let temp = tempfile::Builder::new()
            .prefix("restore-check-")
            .suffix(".sqlite3")
            .tempfile_in(&staging)?
            .into_temp_path();
        fs::write(&temp, db)?;
        integrity_check(&temp)
    }

    fn restore_database(
        &self,
        db_bytes: &[u8],
        stamp: &str,
        report: &mut RestoreReport,
    ) -> StackResult<()> {
        let db = self.settings.database_file(self.paths);
        let service = vec![self.settings.database.service.clone()];
        let safety = sibling_with_suffix(&db, &format!(".pre-restore-{}", stamp));

        report.step(format!("stop {}", service[0]));
        report.step(format!("copy {} to {}", db.display(), safety.display()));
        report.step(format!("write restored database to {}", db.display()));
        report.step(format!("start {} and wait until healthy", service[0]));
        if report.dry_run {
            return Ok(());
        }

        if let Err(e) = self.controller.stop(&service) {
            let state = self.controller.query_state(&service[0])?;
            if state.run != RunState::Stopped {
                return Err(StackError::Service(format!(
                    "Could not stop {} ({}); it is {}. The database was not touched",
                    service[0], e, state.run
                )));
            }
            tracing::warn!(error = %e, service = %service[0], "stop failed but service is stopped; continuing");
            report.warnings.push(format!("stop failed: {}", e));
        }

        let mode = if db.exists() {
            database_safety_copy(&db, &safety)?;
            report.safety_copy = Some(safety.clone());
            mode_of(&db)
        } else {
            None
        };

        write_bytes_atomic(&db, db_bytes, mode)?;
        for side in database_side_files(&db) {
            if side.exists() {
                fs::remove_file(&side)?;
                tracing::debug!(path = %side.display(), "removed stale side file");
            }
        }
        if let Some(owner) = self.settings.ownership {
            apply_ownership(&db, owner)?;
        }

        self.controller.start(&service).map_err(|e| {
            StackError::Service(format!(
                "Database restored but {} failed to start ({}). The previous database is at {}",
                service[0],
                e,
                safety.display()
            ))
        })?;

        if !self
            .controller
            .wait_until_healthy(&service[0], self.settings.services.restore_timeout_secs)
        {
            report.unhealthy.push(service[0].clone());
        }
        Ok(())
    }

    fn restore_archive(
        &self,
        profile: Profile,
        data: &[u8],
        entries: &[String],
        stamp: &str,
        report: &mut RestoreReport,
    ) -> StackResult<()> {
        let all = self.settings.services.all.clone();
        let base = self.paths.base_dir().clone();
        let data_dir = self.settings.data_dir(self.paths);
        let safety = self
            .paths
            .pre_restore_dir()
            .join(format!("{}-{}", stamp, profile));

        report.step(format!("stop services {}", all.join(", ")));
        report.step(format!("copy current state to {}", safety.display()));
        report.step(format!(
            "unpack {} entries over {} and {}",
            entries.len(),
            base.display(),
            data_dir.display()
        ));
        report.step("apply ownership and owner-only modes");
        if profile == Profile::Emergency {
            report.step(format!("write RECOVERY-{}.md", stamp));
        }
        report.step(format!("start services {}", all.join(", ")));
        if report.dry_run {
            if profile == Profile::Emergency {
                report.runbook = read_runbook(data)?;
            }
            return Ok(());
        }

        self.controller.stop(&all)?;

        let copied = self.safety_copy(profile, &safety, &data_dir)?;
        tracing::info!(files = copied, safety = %safety.display(), "safety copy taken");
        report.safety_copy = Some(safety);

        let routes = UnpackRoutes {
            project_root: base.clone(),
            data_dir: data_dir.clone(),
        };
        let written = archive::unpack(data, &routes)?;
        tracing::info!(files = written.len(), "archive unpacked");

        for side in database_side_files(&self.settings.database_file(self.paths)) {
            if side.exists() {
                fs::remove_file(&side)?;
            }
        }

        if let Some(owner) = self.settings.ownership {
            let mut changed = apply_ownership(&data_dir, owner)?;
            for path in &written {
                if path.starts_with(&base) {
                    changed += apply_ownership(path, owner)?;
                }
            }
            tracing::info!(changed, uid = owner.uid, gid = owner.gid, "ownership applied");
        }
        for sensitive in self.paths.sensitive_files() {
            if sensitive.exists() {
                set_mode(&sensitive, 0o600)?;
            }
        }

        if profile == Profile::Emergency {
            if let Some(runbook) = read_runbook(data)? {
                let path = base.join(format!("RECOVERY-{}.md", stamp));
                write_bytes_atomic(&path, runbook.as_bytes(), Some(0o600))?;
                report.runbook_path = Some(path);
                report.runbook = Some(runbook);
            }
        }

        self.controller.start(&all).map_err(|e| {
            StackError::Service(format!(
                "Files restored but services failed to start ({}). The previous state is in {}",
                e,
                report
                    .safety_copy
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default()
            ))
        })?;

        for name in &self.settings.services.critical {
            if !self
                .controller
                .wait_until_healthy(name, self.settings.services.restore_timeout_secs)
            {
                tracing::warn!(service = %name, "service not healthy after restore");
                report.unhealthy.push(name.clone());
            }
        }
        Ok(())
    }

    /// Copy what the restore is about to overwrite
    fn safety_copy(&self, profile: Profile, safety: &Path, data_dir: &Path) -> StackResult<usize> {
        let base = self.paths.base_dir();
        let project_copy = safety.join(archive::PROJECT_PREFIX);
        let mut exclude = vec![self.paths.backup_dir(), data_dir.to_path_buf()];
        exclude.push(base.join(crate::storage::lock::LOCK_FILE));

        let mut copied = 0;
        if profile == Profile::Emergency {
            copied += copy_tree(base, &project_copy, &exclude)?;
        } else {
            for include in &self.settings.include {
                let Some(rel) = archive::safe_relative(Path::new(include)) else {
                    continue;
                };
                let src = base.join(&rel);
                if src.exists() {
                    copied += copy_tree(&src, &project_copy.join(&rel), &exclude)?;
                }
            }
        }

        if data_dir.exists() {
            copied += copy_tree(data_dir, &safety.join(archive::DATA_PREFIX), &[])?;
        }
        Ok(copied)
    }
}

/// Copy the live database under the safety name, with its journal files
///
/// SQLite finds `<name>-wal` next to `<name>`, so committed frames that never
/// reached the main file stay readable from the safety copy. Raw copies keep
/// a damaged database restorable too.
fn database_safety_copy(db: &Path, safety: &Path) -> StackResult<()> {
    copy_preserving(db, safety)?;
    for suffix in ["-wal", "-journal"] {
        let side = sibling_with_suffix(db, suffix);
        if side.exists() {
            copy_preserving(&side, &sibling_with_suffix(safety, suffix))?;
        }
    }
    Ok(())
}

fn read_runbook(data: &[u8]) -> StackResult<Option<String>> {
    Ok(archive::read_entry(data, archive::RUNBOOK_NAME)?
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
}

#[cfg(unix)]
fn mode_of(path: &Path) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).ok().map(|m| m.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn mode_of(_path: &Path) -> Option<u32> {
    None
}
