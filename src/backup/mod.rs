//! Backup system for stackward
//!
//! Creates encrypted, timestamp-named artifacts per profile, enforces the
//! retention policy, detects the profile of foreign artifacts and restores
//! them over the live stack.
//!
//! # Architecture
//!
//! - `BackupManager`: create, list and sweep artifacts
//! - `RestoreEngine`: verify, confirm and restore an artifact
//! - `detect_profile`: name heuristic, then payload inspection
//!
//! # Layout
//!
//! ```text
//! backups/db/db-backup-20240101-030405.sqlite3.gz.enc
//! backups/full/full-backup-20240101-030405.tar.gz.enc
//! backups/emergency/emergency-kit-backup-20240101-030405.tar.gz.enc
//! backups/.staging/        plaintext payloads while a backup runs
//! backups/pre-restore/     safety copies taken by full and emergency restores
//! ```
//!
//! # Retention
//!
//! An artifact is deleted once its age strictly exceeds its profile's max
//! age (14 / 28 / 90 days by default for database / full / emergency).
//!
//! # Example
//!
//! ```rust,ignore
//! use stackward::backup::{BackupManager, Profile, RestoreEngine, RestoreOptions};
//!
//! let manager = BackupManager::new(&paths, &settings, &vault, &controller);
//! let artifact = manager.create(Profile::Full)?;
//! manager.sweep(&settings.retention, false)?;
//!
//! let engine = RestoreEngine::new(&paths, &settings, &vault, &controller, &confirm);
//! let report = engine.restore(&artifact.payload_path, None, RestoreOptions::default())?;
//! ```

mod artifact;
mod detect;
mod manager;
mod restore;

pub use artifact::{
    artifact_file_name, parse_artifact_name, BackupArtifact, Profile, ENCRYPTION_SUFFIX,
    TIMESTAMP_FORMAT,
};
pub use detect::{detect_profile, profile_from_name, profile_from_payload, DetectedProfile};
pub use manager::{BackupManager, SweepReport};
pub use restore::{Confirm, RestoreEngine, RestoreOptions, RestoreReport, CONFIRM_WORD};
