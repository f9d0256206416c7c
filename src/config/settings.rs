//! Settings for stackward
//!
//! One immutable value, loaded once in `main` and passed by reference to every
//! component. Nothing downstream reads the environment or the working
//! directory.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::paths::StackPaths;
use crate::backup::Profile;
use crate::error::StackError;

/// Backup retention settings, in days per profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Maximum age of database artifacts
    pub database_days: u32,
    /// Maximum age of full artifacts
    pub full_days: u32,
    /// Maximum age of emergency kits
    pub emergency_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            database_days: 14,
            full_days: 28,
            emergency_days: 90,
        }
    }
}

impl RetentionPolicy {
    /// Maximum age in days for a profile
    pub fn max_age_days(&self, profile: Profile) -> u32 {
        match profile {
            Profile::Database => self.database_days,
            Profile::Full => self.full_days,
            Profile::Emergency => self.emergency_days,
        }
    }

    /// Enforce maxAge(Emergency) > maxAge(Full) > maxAge(Database)
    pub fn validate(&self) -> Result<(), StackError> {
        if self.emergency_days > self.full_days && self.full_days > self.database_days {
            Ok(())
        } else {
            Err(StackError::Config(format!(
                "retention must satisfy emergency > full > database, got {}/{}/{} days",
                self.emergency_days, self.full_days, self.database_days
            )))
        }
    }
}

/// The database owned by the application service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Service that owns the database file
    #[serde(default = "default_db_service")]
    pub service: String,

    /// Database file name inside the data directory
    #[serde(default = "default_db_file")]
    pub file_name: String,

    /// Mount point of the data directory inside the service
    #[serde(default = "default_container_data_dir")]
    pub container_data_dir: String,

    /// Command run inside the service for an online copy.
    /// `{db}` and `{out}` are replaced with in-service paths.
    #[serde(default = "default_online_backup_command")]
    pub online_backup_command: Vec<String>,
}

fn default_db_service() -> String {
    "app".to_string()
}

fn default_db_file() -> String {
    "db.sqlite3".to_string()
}

fn default_container_data_dir() -> String {
    "/data".to_string()
}

fn default_online_backup_command() -> Vec<String> {
    vec![
        "sqlite3".to_string(),
        "{db}".to_string(),
        ".backup '{out}'".to_string(),
    ]
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            service: default_db_service(),
            file_name: default_db_file(),
            container_data_dir: default_container_data_dir(),
            online_backup_command: default_online_backup_command(),
        }
    }
}

/// Services managed by the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Every service in the stack, in start order
    #[serde(default = "default_all_services")]
    pub all: Vec<String>,

    /// Services that must be healthy after a full restore
    #[serde(default = "default_critical_services")]
    pub critical: Vec<String>,

    /// Seconds to wait for a service to become healthy after a restore
    #[serde(default = "default_restore_timeout")]
    pub restore_timeout_secs: u64,
}

fn default_all_services() -> Vec<String> {
    vec!["app".to_string(), "proxy".to_string()]
}

fn default_critical_services() -> Vec<String> {
    vec!["app".to_string(), "proxy".to_string()]
}

fn default_restore_timeout() -> u64 {
    60
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            all: default_all_services(),
            critical: default_critical_services(),
            restore_timeout_secs: default_restore_timeout(),
        }
    }
}

/// Numeric owner applied to restored files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    pub uid: u32,
    pub gid: u32,
}

/// How a dependent consumer picks up a new config artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReloadAction {
    /// Restart the service
    Restart { service: String },
    /// Run a command inside the running service
    Exec { service: String, command: Vec<String> },
    /// Run a command on the host
    Host { command: Vec<String> },
}

/// Output format of a synced artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFormat {
    /// Reverse proxy trusted-proxies snippet
    TrustedProxies,
    /// Packet filter allow-list (nftables sets)
    AllowList,
}

/// One config artifact kept in sync with the reference data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncTarget {
    /// Human-readable name used in logs
    pub name: String,
    /// File name inside `config/`
    pub file: String,
    /// Rendering format
    pub format: ArtifactFormat,
    /// Reload performed after activation
    pub reload: ReloadAction,
}

/// External reference data and its consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// URLs returning one CIDR block per line
    #[serde(default = "default_sources")]
    pub sources: Vec<String>,

    /// HTTP timeout per request
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// Fewer networks than this is treated as an implausible response
    #[serde(default = "default_min_entries")]
    pub min_entries: usize,

    /// A response body larger than this is treated as implausible
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,

    /// Artifacts rendered from the same fetch
    #[serde(default = "default_targets")]
    pub targets: Vec<SyncTarget>,
}

fn default_sources() -> Vec<String> {
    vec![
        "https://www.cloudflare.com/ips-v4".to_string(),
        "https://www.cloudflare.com/ips-v6".to_string(),
    ]
}

fn default_fetch_timeout() -> u64 {
    20
}

fn default_min_entries() -> usize {
    5
}

fn default_max_bytes() -> u64 {
    64 * 1024
}

fn default_targets() -> Vec<SyncTarget> {
    vec![
        SyncTarget {
            name: "proxy trust list".to_string(),
            file: "trusted_proxies.caddy".to_string(),
            format: ArtifactFormat::TrustedProxies,
            reload: ReloadAction::Exec {
                service: "proxy".to_string(),
                command: vec![
                    "caddy".to_string(),
                    "reload".to_string(),
                    "--config".to_string(),
                    "/etc/caddy/Caddyfile".to_string(),
                ],
            },
        },
        SyncTarget {
            name: "firewall allow list".to_string(),
            file: "allowlist.nft".to_string(),
            format: ArtifactFormat::AllowList,
            reload: ReloadAction::Host {
                command: vec![
                    "nft".to_string(),
                    "-f".to_string(),
                    "/etc/nftables.conf".to_string(),
                ],
            },
        },
    ]
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            timeout_secs: default_fetch_timeout(),
            min_entries: default_min_entries(),
            max_bytes: default_max_bytes(),
            targets: default_targets(),
        }
    }
}

/// Health escalation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    /// Bounded wait after each repair tier
    #[serde(default = "default_settle_timeout")]
    pub settle_timeout_secs: u64,
}

fn default_settle_timeout() -> u64 {
    30
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            settle_timeout_secs: default_settle_timeout(),
        }
    }
}

/// Where residual failures are reported
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifierSettings {
    /// Webhook receiving `{"subject": .., "body": ..}` as JSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

/// Settings for stackward
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Host name recorded in manifests (defaults to the kernel host name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,

    /// Application data directory, absolute or relative to the project root
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Paths (relative to the project root) packed into full backups
    #[serde(default = "default_include")]
    pub include: Vec<String>,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub services: ServiceSettings,

    #[serde(default)]
    pub retention: RetentionPolicy,

    /// Owner applied recursively after a restore
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ownership: Option<Ownership>,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub health: HealthSettings,

    #[serde(default)]
    pub notifier: NotifierSettings,
}

fn default_schema_version() -> u32 {
    1
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_include() -> Vec<String> {
    vec![
        "config".to_string(),
        "secrets".to_string(),
        ".env".to_string(),
        "docker-compose.yml".to_string(),
    ]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            host_name: None,
            data_dir: default_data_dir(),
            include: default_include(),
            database: DatabaseSettings::default(),
            services: ServiceSettings::default(),
            retention: RetentionPolicy::default(),
            ownership: None,
            sync: SyncSettings::default(),
            health: HealthSettings::default(),
            notifier: NotifierSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from disk, or create default settings if file doesn't exist
    pub fn load_or_create(paths: &StackPaths) -> Result<Self, StackError> {
        let settings_path = paths.settings_file();

        if settings_path.exists() {
            let contents = std::fs::read_to_string(&settings_path).map_err(|e| {
                StackError::FileSystem(format!("Failed to read settings file: {}", e))
            })?;

            let settings: Settings = serde_json::from_str(&contents).map_err(|e| {
                StackError::Config(format!("Failed to parse settings file: {}", e))
            })?;

            settings.validate()?;
            Ok(settings)
        } else {
            // Don't save yet - `init` decides when to persist
            Ok(Settings::default())
        }
    }

    /// Save settings to disk
    pub fn save(&self, paths: &StackPaths) -> Result<(), StackError> {
        paths.ensure_directories()?;

        let contents = serde_json::to_string_pretty(self).map_err(|e| {
            StackError::Config(format!("Failed to serialize settings: {}", e))
        })?;

        std::fs::write(paths.settings_file(), contents).map_err(|e| {
            StackError::FileSystem(format!("Failed to write settings file: {}", e))
        })?;

        Ok(())
    }

    /// Check cross-field invariants
    pub fn validate(&self) -> Result<(), StackError> {
        self.retention.validate()?;

        if self.services.all.is_empty() {
            return Err(StackError::Config("services.all must not be empty".into()));
        }
        if let Some(missing) = self
            .services
            .critical
            .iter()
            .find(|s| !self.services.all.contains(s))
        {
            return Err(StackError::Config(format!(
                "critical service '{}' is not listed in services.all",
                missing
            )));
        }
        if !self.database.online_backup_command.iter().any(|a| a.contains("{out}")) {
            return Err(StackError::Config(
                "database.online_backup_command must reference {out}".into(),
            ));
        }
        Ok(())
    }

    /// Absolute application data directory
    pub fn data_dir(&self, paths: &StackPaths) -> PathBuf {
        paths.resolve(&self.data_dir)
    }

    /// Absolute path of the live database file
    pub fn database_file(&self, paths: &StackPaths) -> PathBuf {
        self.data_dir(paths).join(&self.database.file_name)
    }

    /// Host name recorded in manifests
    pub fn host_name(&self) -> String {
        if let Some(name) = &self.host_name {
            return name.clone();
        }
        std::fs::read_to_string("/proc/sys/kernel/hostname")
            .or_else(|_| std::fs::read_to_string("/etc/hostname"))
            .map(|s| s.trim().to_string())
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.retention.database_days, 14);
        assert_eq!(settings.retention.full_days, 28);
        assert_eq!(settings.retention.emergency_days, 90);
        assert_eq!(settings.sync.targets.len(), 2);
        settings.validate().unwrap();
    }

    #[test]
    fn test_retention_ordering_enforced() {
        let policy = RetentionPolicy {
            database_days: 30,
            full_days: 28,
            emergency_days: 90,
        };
        assert!(policy.validate().is_err());
        assert_eq!(RetentionPolicy::default().max_age_days(Profile::Full), 28);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let paths = StackPaths::with_base_dir(temp_dir.path().to_path_buf());

        let mut settings = Settings::default();
        settings.host_name = Some("vault-01".into());
        settings.ownership = Some(Ownership { uid: 1000, gid: 1000 });

        settings.save(&paths).unwrap();

        let loaded = Settings::load_or_create(&paths).unwrap();
        assert_eq!(loaded.host_name(), "vault-01");
        assert_eq!(loaded.ownership, Some(Ownership { uid: 1000, gid: 1000 }));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let paths = StackPaths::with_base_dir(temp_dir.path().to_path_buf());
        std::fs::write(paths.settings_file(), r#"{"data_dir": "/var/lib/app"}"#).unwrap();

        let loaded = Settings::load_or_create(&paths).unwrap();
        assert_eq!(loaded.data_dir(&paths), PathBuf::from("/var/lib/app"));
        assert_eq!(loaded.database.service, "app");
    }

    #[test]
    fn test_unknown_critical_service_rejected() {
        let mut settings = Settings::default();
        settings.services.critical.push("worker".into());
        assert!(matches!(settings.validate(), Err(StackError::Config(_))));
    }

    #[test]
    fn test_reload_action_serde() {
        let json = r#"{"kind": "restart", "service": "proxy"}"#;
        let action: ReloadAction = serde_json::from_str(json).unwrap();
        assert_eq!(
            action,
            ReloadAction::Restart {
                service: "proxy".into()
            }
        );
    }
}
