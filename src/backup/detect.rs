//! Profile detection for artifacts of unknown provenance
//!
//! The file name is consulted first, so an emergency kit is recognised
//! without touching key material. Otherwise the artifact is decrypted and its
//! payload inspected. Anything inconclusive is `Unknown`; there is no default
//! profile.

use std::fmt;
use std::path::Path;

use crate::crypto::CryptoVault;
use crate::error::{StackError, StackResult};
use crate::snapshot::{archive, has_sqlite_header, Manifest, MANIFEST_NAME, SQLITE_HEADER};

use super::artifact::Profile;

/// Outcome of profile detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedProfile {
    /// Recognised from the file name alone
    FromName(Profile),
    /// Recognised by inspecting the decrypted payload
    FromContent(Profile),
    /// Needs an explicit profile from the operator
    Unknown,
}

impl DetectedProfile {
    pub fn profile(&self) -> Option<Profile> {
        match self {
            Self::FromName(p) | Self::FromContent(p) => Some(*p),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for DetectedProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FromName(p) => write!(f, "{} (from file name)", p),
            Self::FromContent(p) => write!(f, "{} (from contents)", p),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Guess a profile from a file name
///
/// Precedence: emergency/kit, then full, then db/database/.sqlite3/.db.
pub fn profile_from_name(name: &str) -> Option<Profile> {
    let name = name.to_ascii_lowercase();
    if name.contains("emergency") || name.contains("kit") {
        Some(Profile::Emergency)
    } else if name.contains("full") {
        Some(Profile::Full)
    } else if name.contains("db")
        || name.contains("database")
        || name.contains(".sqlite3")
        || name.ends_with(".db")
    {
        Some(Profile::Database)
    } else {
        None
    }
}

/// Inspect a decrypted payload
pub fn profile_from_payload(payload: &[u8]) -> Option<Profile> {
    if !archive::is_gzip(payload) {
        return None;
    }

    let head = archive::gunzip_prefix(payload, SQLITE_HEADER.len()).ok()?;
    if has_sqlite_header(&head) {
        return Some(Profile::Database);
    }

    let entries = archive::list_entries(payload).ok()?;
    if entries.iter().any(|e| e == MANIFEST_NAME) {
        let manifest = archive::read_entry(payload, MANIFEST_NAME)
            .ok()
            .flatten()
            .and_then(|bytes| serde_json::from_slice::<Manifest>(&bytes).ok());
        if let Some(manifest) = manifest {
            return Some(manifest.profile);
        }
    }
    if entries.iter().any(|e| e == archive::RUNBOOK_NAME) {
        return Some(Profile::Emergency);
    }
    let project_marker = |name: &str| format!("{}/{}", archive::PROJECT_PREFIX, name);
    if entries
        .iter()
        .any(|e| *e == project_marker(".env") || *e == project_marker("docker-compose.yml"))
    {
        return Some(Profile::Full);
    }
    None
}

/// Detect the profile of an artifact on disk
pub fn detect_profile(path: &Path, vault: &CryptoVault) -> StackResult<DetectedProfile> {
    if let Some(profile) = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(profile_from_name)
    {
        return Ok(DetectedProfile::FromName(profile));
    }

    if !path.is_file() {
        return Err(StackError::artifact_not_found(path.display().to_string()));
    }
    let ciphertext = std::fs::read(path)?;
    let payload = vault.decrypt(&ciphertext)?;
    Ok(match profile_from_payload(&payload) {
        Some(profile) => DetectedProfile::FromContent(profile),
        None => DetectedProfile::Unknown,
    })
}
