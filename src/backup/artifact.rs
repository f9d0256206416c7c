//! Backup profiles and artifact naming
//!
//! Artifact names are bit-exact:
//! `<prefix>-backup-<YYYYMMDD-HHMMSS>.<ext>.enc`, with prefix one of `db`,
//! `full`, `emergency-kit`. The timestamp is host-local time.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::StackError;

/// Suffix of every encrypted artifact
pub const ENCRYPTION_SUFFIX: &str = "enc";

/// Timestamp format used in artifact names
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Scope of a backup or restore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// The application database only
    #[value(alias = "db")]
    Database,
    /// Configuration, secrets store, data directory and a database snapshot
    Full,
    /// Full plus private key material and a recovery runbook
    #[value(alias = "kit")]
    Emergency,
}

impl Profile {
    pub const ALL: [Profile; 3] = [Profile::Database, Profile::Full, Profile::Emergency];

    /// File name prefix
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Database => "db",
            Self::Full => "full",
            Self::Emergency => "emergency-kit",
        }
    }

    /// Payload extension before the encryption suffix
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Database => "sqlite3.gz",
            Self::Full | Self::Emergency => "tar.gz",
        }
    }

    /// Subdirectory of `backups/`
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Database => "db",
            Self::Full => "full",
            Self::Emergency => "emergency",
        }
    }

    /// Whether artifacts of this profile may carry private key material
    pub fn carries_key_material(&self) -> bool {
        matches!(self, Self::Emergency)
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Database => "database",
            Self::Full => "full",
            Self::Emergency => "emergency",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Profile {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "db" | "database" => Ok(Self::Database),
            "full" => Ok(Self::Full),
            "emergency" | "emergency-kit" | "kit" => Ok(Self::Emergency),
            other => Err(StackError::Validation(format!("Unknown profile '{}'", other))),
        }
    }
}

/// An encrypted, timestamp-named backup file
#[derive(Debug, Clone)]
pub struct BackupArtifact {
    pub profile: Profile,
    /// Timestamp parsed from the file name
    pub created_at: NaiveDateTime,
    /// Host that produced the artifact, when known (set on creation)
    pub source_host: Option<String>,
    pub payload_path: PathBuf,
    pub encrypted: bool,
    pub size_bytes: u64,
    /// File modification time, used for retention
    pub modified: SystemTime,
}

impl BackupArtifact {
    /// Describe an artifact already on disk, if its name parses
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let (profile, created_at) = parse_artifact_name(name)?;
        let metadata = std::fs::metadata(path).ok()?;
        if !metadata.is_file() {
            return None;
        }

        Some(Self {
            profile,
            created_at,
            source_host: None,
            payload_path: path.to_path_buf(),
            encrypted: true,
            size_bytes: metadata.len(),
            modified: metadata.modified().ok()?,
        })
    }

    /// File name of the artifact
    pub fn file_name(&self) -> String {
        self.payload_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Build the final file name for an artifact
pub fn artifact_file_name(profile: Profile, timestamp: NaiveDateTime) -> String {
    format!(
        "{}-backup-{}.{}.{}",
        profile.prefix(),
        timestamp.format(TIMESTAMP_FORMAT),
        profile.extension(),
        ENCRYPTION_SUFFIX
    )
}

/// Parse a strictly-named artifact into its profile and timestamp
pub fn parse_artifact_name(name: &str) -> Option<(Profile, NaiveDateTime)> {
    Profile::ALL.iter().find_map(|profile| {
        let rest = name.strip_prefix(profile.prefix())?.strip_prefix("-backup-")?;
        if rest.len() < 15 || !rest.is_char_boundary(15) {
            return None;
        }
        let (stamp, tail) = rest.split_at(15);
        let expected_tail = format!(".{}.{}", profile.extension(), ENCRYPTION_SUFFIX);
        if tail != expected_tail {
            return None;
        }
        let created_at = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
        Some((*profile, created_at))
    })
}
