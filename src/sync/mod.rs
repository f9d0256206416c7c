//! Atomic synchronisation of config files derived from upstream reference data
//!
//! One run:
//!
//! 1. fetch the reference data once (any failure aborts before disk is touched)
//! 2. render and validate every target, staging changed ones as `.new`
//! 3. promote all staged candidates (`current` -> `.backup`, `.new` -> `current`)
//! 4. reload each consumer
//! 5. on a reload failure, restore every promoted target and reload again
//!
//! Paired consumers (proxy trust list and firewall allow list) therefore
//! always see the same reference data.

pub mod artifact;
pub mod fetch;
pub mod render;

use std::process::Command;

use crate::config::paths::StackPaths;
use crate::config::settings::{ReloadAction, Settings, SyncTarget};
use crate::error::{StackError, StackResult};
use crate::services::ServiceController;
use crate::storage::DirLock;

pub use artifact::ConfigArtifact;
pub use fetch::{fetch_reference, Cidr, Fetcher, HttpFetcher, ReferenceData};

/// What happened to one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetStatus {
    /// Rendering matched the active file
    Unchanged,
    /// New content activated and reloaded
    Updated,
    /// Dry run: content differs by this many added and removed lines
    WouldUpdate { added: usize, removed: usize },
    /// Activated, then restored after a reload failure
    RolledBack,
}

#[derive(Debug, Clone)]
pub struct TargetResult {
    pub name: String,
    pub file: String,
    pub status: TargetStatus,
}

/// Result of one sync run
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub networks: usize,
    pub dry_run: bool,
    pub targets: Vec<TargetResult>,
    /// Reload failure that triggered a rollback
    pub rollback_reason: Option<String>,
}

impl SyncReport {
    /// Whether the operator has to follow up
    pub fn needs_action(&self) -> bool {
        self.rollback_reason.is_some()
    }
}

/// Keeps config artifacts in step with the upstream reference data
pub struct AtomicConfigSync<'a> {
    paths: &'a StackPaths,
    settings: &'a Settings,
    fetcher: &'a dyn Fetcher,
    controller: &'a dyn ServiceController,
}

struct Promoted<'t> {
    target: &'t SyncTarget,
    artifact: ConfigArtifact,
    had_previous: bool,
}

impl<'a> AtomicConfigSync<'a> {
    pub fn new(
        paths: &'a StackPaths,
        settings: &'a Settings,
        fetcher: &'a dyn Fetcher,
        controller: &'a dyn ServiceController,
    ) -> Self {
        Self {
            paths,
            settings,
            fetcher,
            controller,
        }
    }

    fn artifact_for(&self, target: &SyncTarget) -> ConfigArtifact {
        ConfigArtifact::new(self.paths.config_dir().join(&target.file))
    }

    /// Run one sync
    pub fn run(&self, dry_run: bool) -> StackResult<SyncReport> {
        let _lock = DirLock::acquire(&self.paths.config_dir(), "sync")?;
        let targets = &self.settings.sync.targets;

        let data = fetch_reference(self.fetcher, &self.settings.sync)?;

        let mut report = SyncReport {
            networks: data.networks.len(),
            dry_run,
            targets: Vec::with_capacity(targets.len()),
            rollback_reason: None,
        };

        // Render and validate everything before anything is staged.
        let mut rendered = Vec::with_capacity(targets.len());
        for target in targets {
            let content = render::render(target.format, &data);
            render::validate(target.format, &content).map_err(|e| {
                StackError::Validation(format!("{} ({}): {}", target.name, target.file, e))
            })?;
            rendered.push(content);
        }

        let mut staged: Vec<(&SyncTarget, ConfigArtifact)> = Vec::new();
        for (target, content) in targets.iter().zip(&rendered) {
            let artifact = self.artifact_for(target);
            let current = artifact.read_current()?;
            if current.as_deref() == Some(content.as_str()) {
                tracing::info!(consumer = %target.name, "unchanged");
                report.targets.push(result(target, TargetStatus::Unchanged));
                continue;
            }

            if dry_run {
                let (added, removed) = line_diff(current.as_deref().unwrap_or(""), content);
                tracing::info!(consumer = %target.name, added, removed, "would update");
                report
                    .targets
                    .push(result(target, TargetStatus::WouldUpdate { added, removed }));
                continue;
            }

            if let Err(e) = artifact.stage(content) {
                discard_all(&staged);
                return Err(e);
            }
            staged.push((target, artifact));
        }

        if staged.is_empty() {
            return Ok(report);
        }

        let mut promoted: Vec<Promoted<'_>> = Vec::with_capacity(staged.len());
        for (target, artifact) in &staged {
            match artifact.promote() {
                Ok(had_previous) => promoted.push(Promoted {
                    target: *target,
                    artifact: artifact.clone(),
                    had_previous,
                }),
                Err(e) => {
                    tracing::error!(consumer = %target.name, error = %e, "promotion failed; rolling back");
                    discard_all(&staged);
                    self.rollback(&promoted)?;
                    return Err(e);
                }
            }
        }

        let failure = promoted
            .iter()
            .find_map(|p| self.reload(&p.target.reload).err().map(|e| (p.target, e)));

        match failure {
            None => {
                for p in &promoted {
                    tracing::info!(consumer = %p.target.name, "updated");
                    report.targets.push(result(p.target, TargetStatus::Updated));
                }
            }
            Some((target, error)) => {
                let reason = format!("reload of {} failed: {}", target.name, error);
                tracing::error!(%reason, "rolling back every promoted target");
                self.rollback(&promoted)?;

                for p in &promoted {
                    self.reload(&p.target.reload).map_err(|e| {
                        StackError::Service(format!(
                            "{}; last-known-good files are restored but reloading {} failed too: {}",
                            reason, p.target.name, e
                        ))
                    })?;
                    report.targets.push(result(p.target, TargetStatus::RolledBack));
                }
                report.rollback_reason = Some(reason);
            }
        }

        Ok(report)
    }

    fn rollback(&self, promoted: &[Promoted<'_>]) -> StackResult<()> {
        for p in promoted.iter().rev() {
            p.artifact.rollback(p.had_previous)?;
        }
        Ok(())
    }

    /// Make a consumer pick up its config file
    pub fn reload(&self, action: &ReloadAction) -> StackResult<()> {
        match action {
            ReloadAction::Restart { service } => {
                tracing::debug!(%service, "restarting consumer");
                self.controller.restart(std::slice::from_ref(service))
            }
            ReloadAction::Exec { service, command } => {
                tracing::debug!(%service, ?command, "reloading consumer in place");
                self.controller.exec_in_service(service, command).map(|_| ())
            }
            ReloadAction::Host { command } => run_host_command(command),
        }
    }
}

fn result(target: &SyncTarget, status: TargetStatus) -> TargetResult {
    TargetResult {
        name: target.name.clone(),
        file: target.file.clone(),
        status,
    }
}

fn discard_all(staged: &[(&SyncTarget, ConfigArtifact)]) {
    for (target, artifact) in staged {
        if let Err(e) = artifact.discard() {
            tracing::warn!(consumer = %target.name, error = %e, "could not remove candidate");
        }
    }
}

fn run_host_command(command: &[String]) -> StackResult<()> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| StackError::Config("host reload command is empty".into()))?;

    tracing::debug!(%program, ?args, "running host command");
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| StackError::Service(format!("Failed to run {}: {}", program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(StackError::Service(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

/// Count added and removed lines between two files (multiset comparison)
fn line_diff(old: &str, new: &str) -> (usize, usize) {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let added = new_lines.iter().filter(|l| !old_lines.contains(l)).count();
    let removed = old_lines.iter().filter(|l| !new_lines.contains(l)).count();
    (added, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::ArtifactFormat;
    use crate::services::ServiceState;
    use crate::testing::{FakeController, StaticFetcher};
    use std::fs;
    use tempfile::TempDir;

    const V4: &str = "173.245.48.0/20\n103.21.244.0/22\n103.22.200.0/22\n";
    const V6: &str = "2400:cb00::/32\n2606:4700::/32\n";

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.sync.sources = vec!["https://ref/v4".into(), "https://ref/v6".into()];
        settings.sync.targets = vec![
            SyncTarget {
                name: "proxy trust list".into(),
                file: "trusted_proxies.caddy".into(),
                format: ArtifactFormat::TrustedProxies,
                reload: ReloadAction::Exec {
                    service: "proxy".into(),
                    command: vec!["caddy".into(), "reload".into()],
                },
            },
            SyncTarget {
                name: "firewall allow list".into(),
                file: "allowlist.nft".into(),
                format: ArtifactFormat::AllowList,
                reload: ReloadAction::Restart {
                    service: "firewall".into(),
                },
            },
        ];
        settings
    }

    fn setup() -> (TempDir, StackPaths, Settings) {
        let temp = TempDir::new().unwrap();
        let paths = StackPaths::with_base_dir(temp.path().to_path_buf());
        paths.ensure_directories().unwrap();
        (temp, paths, settings())
    }

    fn fetcher() -> StaticFetcher {
        StaticFetcher::new(&[("https://ref/v4", V4), ("https://ref/v6", V6)])
    }

    fn controller() -> FakeController {
        FakeController::new(&[
            ("proxy", ServiceState::healthy()),
            ("firewall", ServiceState::healthy()),
        ])
    }

    #[test]
    fn test_first_sync_writes_both_targets() {
        let (_temp, paths, settings) = setup();
        let fetcher = fetcher();
        let controller = controller();

        let report = AtomicConfigSync::new(&paths, &settings, &fetcher, &controller)
            .run(false)
            .unwrap();

        assert!(!report.needs_action());
        assert_eq!(report.networks, 5);
        assert!(report.targets.iter().all(|t| t.status == TargetStatus::Updated));
        let caddy = fs::read_to_string(paths.config_dir().join("trusted_proxies.caddy")).unwrap();
        assert!(caddy.contains("trusted_proxies static 173.245.48.0/20"));
        assert!(paths.config_dir().join("allowlist.nft").exists());
        assert!(!paths.config_dir().join("allowlist.nft.new").exists());
        // Reference fetched exactly once per source
        assert_eq!(fetcher.fetched.borrow().len(), 2);
        assert_eq!(controller.batches("exec").len(), 1);
        assert_eq!(controller.batches("restart"), vec![vec!["firewall".to_string()]]);
    }

    #[test]
    fn test_second_sync_is_unchanged_and_reloads_nothing() {
        let (_temp, paths, settings) = setup();
        let fetcher = fetcher();
        let controller = controller();
        let sync = AtomicConfigSync::new(&paths, &settings, &fetcher, &controller);
        sync.run(false).unwrap();

        let second = controller_calls_after(&sync, &controller);

        assert!(second
            .targets
            .iter()
            .all(|t| t.status == TargetStatus::Unchanged));
    }

    fn controller_calls_after(sync: &AtomicConfigSync<'_>, controller: &FakeController) -> SyncReport {
        let before = controller.calls().len();
        let report = sync.run(false).unwrap();
        assert_eq!(controller.calls().len(), before);
        report
    }

    #[test]
    fn test_fetch_failure_touches_nothing() {
        let (_temp, paths, settings) = setup();
        let current = paths.config_dir().join("allowlist.nft");
        fs::write(&current, "define upstream_ipv4 = {\n\t10.0.0.0/8\n}\n").unwrap();
        let fetcher = StaticFetcher::new(&[("https://ref/v4", V4)]);
        let controller = controller();

        let err = AtomicConfigSync::new(&paths, &settings, &fetcher, &controller)
            .run(false)
            .unwrap_err();

        assert!(matches!(err, StackError::Fetch(_)));
        assert_eq!(
            fs::read_to_string(&current).unwrap(),
            "define upstream_ipv4 = {\n\t10.0.0.0/8\n}\n"
        );
        assert!(!paths.config_dir().join("allowlist.nft.new").exists());
        assert!(controller.calls().is_empty());
    }

    #[test]
    fn test_reload_failure_rolls_back_byte_equal() {
        let (_temp, paths, settings) = setup();
        let caddy = paths.config_dir().join("trusted_proxies.caddy");
        let nft = paths.config_dir().join("allowlist.nft");
        let caddy_before = b"# hand written\ntrusted_proxies static 10.0.0.0/8\n".to_vec();
        let nft_before = b"define upstream_ipv4 = {\n\t10.0.0.0/8\n}\n".to_vec();
        fs::write(&caddy, &caddy_before).unwrap();
        fs::write(&nft, &nft_before).unwrap();
        let fetcher = fetcher();
        // The first reload fails, the retry after rollback succeeds
        let controller = controller().fail_next_execs(1);

        let report = AtomicConfigSync::new(&paths, &settings, &fetcher, &controller)
            .run(false)
            .unwrap();

        assert!(report.needs_action());
        assert!(report
            .targets
            .iter()
            .all(|t| t.status == TargetStatus::RolledBack));
        assert_eq!(fs::read(&caddy).unwrap(), caddy_before);
        assert_eq!(fs::read(&nft).unwrap(), nft_before);
    }

    #[test]
    fn test_failed_retry_is_fatal_with_last_known_good_active() {
        let (_temp, paths, settings) = setup();
        let caddy = paths.config_dir().join("trusted_proxies.caddy");
        let before = b"trusted_proxies static 10.0.0.0/8\n".to_vec();
        fs::write(&caddy, &before).unwrap();
        let fetcher = fetcher();
        let controller = controller().fail_next_execs(2);

        let err = AtomicConfigSync::new(&paths, &settings, &fetcher, &controller)
            .run(false)
            .unwrap_err();

        assert!(matches!(err, StackError::Service(_)));
        assert_eq!(fs::read(&caddy).unwrap(), before);
    }

    #[test]
    fn test_first_sync_rollback_removes_new_files() {
        let (_temp, paths, settings) = setup();
        let fetcher = fetcher();
        let controller = controller().fail_next_execs(1);

        let report = AtomicConfigSync::new(&paths, &settings, &fetcher, &controller)
            .run(false)
            .unwrap();

        assert!(report.needs_action());
        assert!(!paths.config_dir().join("trusted_proxies.caddy").exists());
        assert!(!paths.config_dir().join("allowlist.nft").exists());
    }

    #[test]
    fn test_dry_run_discards_candidates() {
        let (_temp, paths, settings) = setup();
        let fetcher = fetcher();
        let controller = controller();

        let report = AtomicConfigSync::new(&paths, &settings, &fetcher, &controller)
            .run(true)
            .unwrap();

        assert!(report.dry_run);
        assert!(matches!(
            report.targets[0].status,
            TargetStatus::WouldUpdate { added, removed: 0 } if added > 0
        ));
        let leftover: Vec<_> = fs::read_dir(paths.config_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert!(leftover.is_empty(), "unexpected files: {:?}", leftover);
        assert!(controller.calls().is_empty());
    }

    #[test]
    fn test_host_command_reload() {
        let (_temp, paths, mut settings) = setup();
        settings.sync.targets[1].reload = ReloadAction::Host {
            command: vec!["true".into()],
        };
        let fetcher = fetcher();
        let controller = controller();

        let report = AtomicConfigSync::new(&paths, &settings, &fetcher, &controller)
            .run(false)
            .unwrap();
        assert!(!report.needs_action());

        let sync = AtomicConfigSync::new(&paths, &settings, &fetcher, &controller);
        let err = sync
            .reload(&ReloadAction::Host {
                command: vec!["false".into()],
            })
            .unwrap_err();
        assert!(matches!(err, StackError::Service(_)));
    }

    #[test]
    fn test_line_diff() {
        assert_eq!(line_diff("a\nb\n", "a\nc\nd\n"), (2, 1));
        assert_eq!(line_diff("", "a\n"), (1, 0));
    }
}
