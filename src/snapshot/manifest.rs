//! Manifest embedded as `manifest.json` in every tar payload

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backup::Profile;

/// Archive path of the manifest
pub const MANIFEST_NAME: &str = "manifest.json";

/// Current manifest schema
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Describes what a tar payload contains and where it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Schema version for migration support
    pub schema_version: u32,
    /// When the payload was built
    pub created_at: DateTime<Utc>,
    /// Host the payload was built on
    pub host: String,
    pub profile: Profile,
    /// Archive paths of every payload entry except the manifest itself
    pub files: Vec<String>,
    /// Set on emergency kits: contains key material, keep offline
    #[serde(default)]
    pub offline_storage: bool,
}

impl Manifest {
    pub fn new(profile: Profile, host: impl Into<String>, files: Vec<String>) -> Self {
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            created_at: Utc::now(),
            host: host.into(),
            profile,
            files,
            offline_storage: profile.carries_key_material(),
        }
    }
}
