//! `init` and `config` commands

use crate::audit::{JournalOperation, JournalOutcome, OperationJournal};
use crate::config::paths::StackPaths;
use crate::config::settings::Settings;
use crate::crypto::generate_keypair;
use crate::error::StackResult;

use super::Outcome;

/// Create the directory layout, the settings file and the key pair
///
/// Safe to re-run: existing settings and keys are left alone.
pub fn handle_init_command(paths: &StackPaths) -> StackResult<Outcome> {
    let result = initialize(paths);
    OperationJournal::new(paths.journal_file()).record(
        JournalOperation::Init,
        &paths.base_dir().display().to_string(),
        &result,
        JournalOutcome::Succeeded,
    );
    let created_key = result?;

    println!("Initialization complete!");
    println!();
    if created_key {
        println!("A new key pair was written to {}.", paths.keys_dir().display());
        println!("Back up the private key offline, e.g. with:");
        println!("  stackward backup create emergency");
    } else {
        println!("Existing key pair kept: {}", paths.private_key().display());
    }
    println!();
    println!("Review {} before the first backup.", paths.settings_file().display());
    Ok(Outcome::Done)
}

/// Returns whether a new key pair was generated
fn initialize(paths: &StackPaths) -> StackResult<bool> {
    println!("Initializing stackward at: {}", paths.base_dir().display());
    paths.ensure_directories()?;

    if !paths.settings_file().exists() {
        Settings::default().save(paths)?;
        println!("  wrote {}", paths.settings_file().display());
    }

    if paths.private_key().exists() {
        return Ok(false);
    }
    let recipient = generate_keypair(&paths.private_key(), &paths.public_key())?;
    tracing::debug!(public_key = ?recipient, "recipient key ready");
    Ok(true)
}

/// Show paths and the effective settings
pub fn handle_config_command(paths: &StackPaths, settings: &Settings) -> StackResult<Outcome> {
    println!("stackward Configuration");
    println!("=======================");
    println!("Project root:     {}", paths.base_dir().display());
    println!("Settings file:    {}", paths.settings_file().display());
    println!("Backup directory: {}", paths.backup_dir().display());
    println!("Data directory:   {}", settings.data_dir(paths).display());
    println!("Database file:    {}", settings.database_file(paths).display());
    println!("Private key:      {}", paths.private_key().display());
    println!("Journal:          {}", paths.journal_file().display());
    println!();
    println!("Settings:");
    println!("  Host name:        {}", settings.host_name());
    println!("  Database service: {}", settings.database.service);
    println!("  Services:         {}", settings.services.all.join(", "));
    println!("  Critical:         {}", settings.services.critical.join(", "));
    println!("  Sync targets:     {}", settings.sync.targets.len());
    println!(
        "  Notifications:    {}",
        if settings.notifier.webhook_url.is_some() {
            "webhook"
        } else {
            "disabled"
        }
    );
    if !paths.is_initialized() {
        println!();
        println!("Not initialized yet; run 'stackward init'.");
    }
    Ok(Outcome::Done)
}
