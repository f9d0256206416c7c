//! Backup manager for stackward
//!
//! Creates encrypted artifacts for each profile and enforces the age-based
//! retention policy. Artifacts are immutable once renamed into place.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{Local, NaiveDateTime, Timelike};

use crate::config::paths::StackPaths;
use crate::config::settings::{RetentionPolicy, Settings};
use crate::crypto::{CryptoVault, SecureBytes};
use crate::error::{StackError, StackResult};
use crate::services::ServiceController;
use crate::snapshot::SnapshotBuilder;
use crate::storage::file_io::{set_mode, sibling_with_suffix};
use crate::storage::{CleanupGuard, DirLock};

use super::artifact::{artifact_file_name, BackupArtifact, Profile};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Result of a retention sweep
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Artifacts deleted (or that would be, on a dry run)
    pub deleted: Vec<BackupArtifact>,
    /// Number of artifacts kept
    pub kept: usize,
}

/// Manages artifact creation, listing and retention
pub struct BackupManager<'a> {
    paths: &'a StackPaths,
    settings: &'a Settings,
    vault: &'a CryptoVault,
    controller: &'a dyn ServiceController,
}

impl<'a> BackupManager<'a> {
    pub fn new(
        paths: &'a StackPaths,
        settings: &'a Settings,
        vault: &'a CryptoVault,
        controller: &'a dyn ServiceController,
    ) -> Self {
        Self {
            paths,
            settings,
            vault,
            controller,
        }
    }

    /// Directory holding artifacts of one profile
    pub fn profile_dir(&self, profile: Profile) -> PathBuf {
        self.paths.backup_dir().join(profile.dir_name())
    }

    /// Create an encrypted artifact for `profile`, named after the current local time
    pub fn create(&self, profile: Profile) -> StackResult<BackupArtifact> {
        let now = Local::now().naive_local();
        let now = now.with_nanosecond(0).unwrap_or(now);
        self.create_at(profile, now)
    }

    /// Create an encrypted artifact named after `timestamp`
    ///
    /// The payload is built in staging, encrypted to `<final>.partial`, synced
    /// and only then renamed to its final name. An existing artifact with the
    /// same name is never replaced.
    pub fn create_at(&self, profile: Profile, timestamp: NaiveDateTime) -> StackResult<BackupArtifact> {
        let _lock = DirLock::acquire(&self.paths.backup_dir(), "backup create")?;
        // Plaintext passes through staging; an interrupt must not leave it behind.
        let _staging = CleanupGuard::new(&self.paths.staging_dir());
        self.purge_staging()?;

        let dir = self.profile_dir(profile);
        fs::create_dir_all(&dir)?;
        let final_path = dir.join(artifact_file_name(profile, timestamp));
        if final_path.exists() {
            return Err(StackError::FileSystem(format!(
                "Artifact {} already exists; refusing to overwrite it",
                final_path.display()
            )));
        }

        tracing::info!(profile = %profile, "building payload");
        let builder = SnapshotBuilder::new(self.paths, self.settings, self.controller);
        let staging = self.paths.staging_dir();
        let payload = builder.build(profile, &staging)?;

        let plaintext = SecureBytes::new(fs::read(&payload).map_err(|e| {
            StackError::FileSystem(format!("Failed to read payload {}: {}", payload.display(), e))
        })?);
        // The plaintext payload leaves the disk before the ciphertext lands.
        drop(payload);

        let ciphertext = self.vault.encrypt(&plaintext)?;
        drop(plaintext);

        write_then_rename(&final_path, &ciphertext)?;

        let mut artifact = BackupArtifact::from_path(&final_path).ok_or_else(|| {
            StackError::FileSystem(format!(
                "Artifact {} vanished after creation",
                final_path.display()
            ))
        })?;
        artifact.source_host = Some(self.settings.host_name());

        tracing::info!(
            artifact = %artifact.file_name(),
            size_bytes = artifact.size_bytes,
            "backup artifact created"
        );
        if profile.carries_key_material() {
            tracing::warn!(
                artifact = %artifact.file_name(),
                "emergency kit holds the private key; move it to offline storage"
            );
        }
        Ok(artifact)
    }

    /// Remove leftovers of interrupted runs from the staging directory
    fn purge_staging(&self) -> StackResult<usize> {
        let staging = self.paths.staging_dir();
        if !staging.exists() {
            fs::create_dir_all(&staging)?;
            return Ok(0);
        }

        let mut purged = 0;
        for entry in fs::read_dir(&staging)? {
            let path = entry?.path();
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match removed {
                Ok(()) => purged += 1,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "could not purge stale staging file")
                }
            }
        }
        if purged > 0 {
            tracing::info!(purged, "removed stale staging files");
        }
        Ok(purged)
    }

    /// Artifacts of one or all profiles, newest first
    pub fn list(&self, profile: Option<Profile>) -> StackResult<Vec<BackupArtifact>> {
        let profiles: Vec<Profile> = match profile {
            Some(p) => vec![p],
            None => Profile::ALL.to_vec(),
        };

        let mut artifacts = Vec::new();
        for profile in profiles {
            let dir = self.profile_dir(profile);
            if !dir.exists() {
                continue;
            }
            for entry in fs::read_dir(&dir).map_err(|e| {
                StackError::FileSystem(format!("Failed to read {}: {}", dir.display(), e))
            })? {
                let entry = entry?;
                if let Some(artifact) = BackupArtifact::from_path(&entry.path()) {
                    if artifact.profile == profile {
                        artifacts.push(artifact);
                    }
                }
            }
        }

        artifacts.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.file_name().cmp(&a.file_name()))
        });
        Ok(artifacts)
    }

    /// Most recent artifact of a profile
    pub fn latest(&self, profile: Profile) -> StackResult<Option<BackupArtifact>> {
        Ok(self.list(Some(profile))?.into_iter().next())
    }

    /// Resolve an artifact reference: a path, or `latest-<profile>`
    pub fn resolve(&self, reference: &str) -> StackResult<PathBuf> {
        if let Some(profile) = reference.strip_prefix("latest-") {
            let profile: Profile = profile.parse()?;
            return self
                .latest(profile)?
                .map(|a| a.payload_path)
                .ok_or_else(|| StackError::artifact_not_found(reference));
        }

        let path = Path::new(reference);
        let candidates = [
            path.to_path_buf(),
            self.paths.resolve(path),
        ];
        candidates
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| StackError::artifact_not_found(reference))
    }

    /// Delete artifacts older than their profile's max age
    pub fn sweep(&self, policy: &RetentionPolicy, dry_run: bool) -> StackResult<SweepReport> {
        self.sweep_at(policy, SystemTime::now(), dry_run)
    }

    /// Sweep as if the current time were `now`
    ///
    /// An artifact is deleted only when `now - mtime` strictly exceeds the max
    /// age; one exactly `max_age_days` old is kept.
    pub fn sweep_at(
        &self,
        policy: &RetentionPolicy,
        now: SystemTime,
        dry_run: bool,
    ) -> StackResult<SweepReport> {
        policy.validate()?;
        let _lock = DirLock::acquire(&self.paths.backup_dir(), "backup sweep")?;

        let mut report = SweepReport::default();
        for artifact in self.list(None)? {
            let max_age =
                Duration::from_secs(u64::from(policy.max_age_days(artifact.profile)) * SECONDS_PER_DAY);
            let age = now
                .duration_since(artifact.modified)
                .unwrap_or(Duration::ZERO);

            if age <= max_age {
                report.kept += 1;
                continue;
            }

            if dry_run {
                tracing::info!(artifact = %artifact.file_name(), "would delete expired artifact");
            } else {
                fs::remove_file(&artifact.payload_path).map_err(|e| {
                    StackError::FileSystem(format!(
                        "Failed to delete expired artifact {}: {}",
                        artifact.payload_path.display(),
                        e
                    ))
                })?;
                tracing::info!(artifact = %artifact.file_name(), "deleted expired artifact");
            }
            report.deleted.push(artifact);
        }

        Ok(report)
    }
}

/// Write `data` to `<path>.partial`, sync, then rename onto `path`
fn write_then_rename(path: &Path, data: &[u8]) -> StackResult<()> {
    let partial = sibling_with_suffix(path, ".partial");

    let written = (|| -> StackResult<()> {
        let mut file = File::create(&partial)?;
        set_mode(&partial, 0o600)?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(())
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&partial);
        return Err(StackError::FileSystem(format!(
            "Failed to write {}: {}",
            partial.display(),
            e
        )));
    }

    fs::rename(&partial, path).map_err(|e| {
        let _ = fs::remove_file(&partial);
        StackError::FileSystem(format!("Failed to rename {}: {}", partial.display(), e))
    })?;

    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}
