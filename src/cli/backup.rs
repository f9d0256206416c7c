//! Backup CLI commands
//!
//! Implements `backup create`, `backup list` and `backup sweep`.

use clap::Subcommand;

use crate::audit::{JournalOperation, JournalOutcome, OperationJournal};
use crate::backup::{BackupManager, Profile};
use crate::config::paths::StackPaths;
use crate::config::settings::Settings;
use crate::crypto::CryptoVault;
use crate::error::StackResult;
use crate::services::ComposeController;

use super::{format_age, format_size, Outcome};

/// Backup subcommands
#[derive(Subcommand)]
pub enum BackupCommands {
    /// Create an encrypted backup
    Create {
        /// What to back up
        #[arg(value_enum)]
        profile: Profile,
    },

    /// List backups, newest first
    List {
        /// Only show one profile
        #[arg(short, long, value_enum)]
        profile: Option<Profile>,

        /// Show detailed information
        #[arg(short, long)]
        details: bool,
    },

    /// Delete backups older than the retention policy allows
    Sweep {
        /// Show what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },
}

/// Handle a backup command
pub fn handle_backup_command(
    paths: &StackPaths,
    settings: &Settings,
    cmd: BackupCommands,
) -> StackResult<Outcome> {
    let vault = CryptoVault::from_paths(paths);
    let controller = ComposeController::new(paths);
    let manager = BackupManager::new(paths, settings, &vault, &controller);
    let journal = OperationJournal::new(paths.journal_file());

    match cmd {
        BackupCommands::Create { profile } => {
            println!("Creating {} backup...", profile);
            let result = manager.create(profile);
            journal.record(
                JournalOperation::BackupCreate,
                &profile.to_string(),
                &result,
                JournalOutcome::Succeeded,
            );
            let artifact = result?;

            println!("Backup created: {}", artifact.file_name());
            println!("Location: {}", artifact.payload_path.display());
            println!("Size: {}", format_size(artifact.size_bytes));

            if profile.carries_key_material() {
                println!();
                println!("WARNING: this kit contains the private key.");
                println!("Copy it to offline storage and delete it from this host.");
            }
        }

        BackupCommands::List { profile, details } => {
            let artifacts = manager.list(profile)?;

            if artifacts.is_empty() {
                println!("No backups found.");
                println!("Create one with: stackward backup create database");
                return Ok(Outcome::Done);
            }

            println!("Available Backups");
            println!("=================");
            println!();

            let now = chrono::Local::now().naive_local();
            for (i, artifact) in artifacts.iter().enumerate() {
                let age = format_age(now.signed_duration_since(artifact.created_at));
                if details {
                    println!(
                        "{}. {}\n   Profile: {}\n   Created: {}\n   Size: {}\n   Age: {}\n   Path: {}\n",
                        i + 1,
                        artifact.file_name(),
                        artifact.profile,
                        artifact.created_at.format("%Y-%m-%d %H:%M:%S"),
                        format_size(artifact.size_bytes),
                        age,
                        artifact.payload_path.display(),
                    );
                } else {
                    println!(
                        "  {}. {} ({} ago, {})",
                        i + 1,
                        artifact.file_name(),
                        age,
                        format_size(artifact.size_bytes),
                    );
                }
            }

            println!();
            println!("Total: {} backup(s)", artifacts.len());
        }

        BackupCommands::Sweep { dry_run } => {
            let policy = &settings.retention;
            let result = manager.sweep(policy, dry_run);
            journal.record(
                JournalOperation::BackupSweep,
                "backups",
                &result,
                if dry_run {
                    JournalOutcome::DryRun
                } else {
                    JournalOutcome::Succeeded
                },
            );
            let report = result?;

            println!(
                "Retention: database {}d, full {}d, emergency {}d",
                policy.max_age_days(Profile::Database),
                policy.max_age_days(Profile::Full),
                policy.max_age_days(Profile::Emergency),
            );

            if report.deleted.is_empty() {
                println!("Nothing to sweep ({} backup(s) kept).", report.kept);
                return Ok(Outcome::Done);
            }

            let verb = if dry_run { "Would delete" } else { "Deleted" };
            for artifact in &report.deleted {
                println!("  {}: {}", verb, artifact.file_name());
            }
            println!();
            println!(
                "{} {} backup(s), kept {}.",
                verb,
                report.deleted.len(),
                report.kept
            );
            if dry_run {
                println!("Run again without --dry-run to delete them.");
            }
        }
    }

    Ok(Outcome::Done)
}
