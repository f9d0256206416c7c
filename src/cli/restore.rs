//! `restore` and `detect` commands

use std::io::{BufRead, Write};
use std::path::PathBuf;

use clap::Args;

use crate::audit::{JournalOperation, JournalOutcome, OperationJournal};
use crate::backup::{
    detect_profile, BackupManager, Confirm, Profile, RestoreEngine, RestoreOptions, CONFIRM_WORD,
};
use crate::config::paths::StackPaths;
use crate::config::settings::Settings;
use crate::crypto::CryptoVault;
use crate::error::StackResult;
use crate::services::ComposeController;

use super::Outcome;

#[derive(Args)]
pub struct RestoreArgs {
    /// Artifact path, or latest-<profile> (e.g. latest-database)
    pub artifact: String,

    /// Profile to restore as, when it cannot be detected
    #[arg(short, long, value_enum)]
    pub profile: Option<Profile>,

    /// Skip the typed confirmation
    #[arg(short, long)]
    pub force: bool,

    /// Decrypt and verify, then list the steps without running them
    #[arg(long)]
    pub dry_run: bool,
}

/// Asks on the terminal; only the exact confirmation word proceeds
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, prompt: &str) -> StackResult<bool> {
        println!("{}", prompt);
        print!("Type {} to continue: ", CONFIRM_WORD);
        std::io::stdout().flush()?;

        let mut answer = String::new();
        std::io::stdin().lock().read_line(&mut answer)?;
        Ok(answer.trim() == CONFIRM_WORD)
    }
}

/// Handle `restore`
pub fn handle_restore_command(
    paths: &StackPaths,
    settings: &Settings,
    args: RestoreArgs,
) -> StackResult<Outcome> {
    let vault = CryptoVault::from_paths(paths);
    let controller = ComposeController::new(paths);
    let journal = OperationJournal::new(paths.journal_file());

    let artifact = BackupManager::new(paths, settings, &vault, &controller).resolve(&args.artifact)?;
    println!("Restoring from: {}", artifact.display());

    let engine = RestoreEngine::new(paths, settings, &vault, &controller, &StdinConfirm);
    let options = RestoreOptions {
        force: args.force,
        dry_run: args.dry_run,
    };
    let result = engine.restore(&artifact, args.profile, options);

    let outcome_on_ok = match &result {
        Ok(report) if report.needs_action() => JournalOutcome::ActionRequired,
        _ if args.dry_run => JournalOutcome::DryRun,
        _ => JournalOutcome::Succeeded,
    };
    journal.record(
        JournalOperation::Restore,
        &artifact.display().to_string(),
        &result,
        outcome_on_ok,
    );
    let report = result?;

    println!();
    println!(
        "{} restore{}",
        report.profile,
        if report.dry_run { " (dry run)" } else { "" }
    );
    for step in &report.steps {
        println!("  - {}", step);
    }
    if let Some(copy) = &report.safety_copy {
        println!();
        println!("Previous state saved to: {}", copy.display());
    }
    for warning in &report.warnings {
        println!("Warning: {}", warning);
    }
    if let Some(runbook) = &report.runbook {
        println!();
        println!("{}", runbook);
        if let Some(path) = &report.runbook_path {
            println!("Runbook saved to: {}", path.display());
        }
    }

    if report.needs_action() {
        println!();
        println!(
            "Restore finished, but these services are not healthy: {}",
            report.unhealthy.join(", ")
        );
        println!("Inspect them with: docker compose logs --tail 100 <service>");
    } else if !report.dry_run {
        println!();
        println!("Restore complete.");
    }

    Ok(Outcome::from_needs_action(report.needs_action()))
}

/// Handle `detect`
pub fn handle_detect_command(paths: &StackPaths, artifact: PathBuf) -> StackResult<Outcome> {
    let vault = CryptoVault::from_paths(paths);
    let artifact = paths.resolve(&artifact);

    let detected = detect_profile(&artifact, &vault)?;
    println!("{}: {}", artifact.display(), detected);

    if detected.profile().is_none() {
        println!("Pass --profile to 'stackward restore' to restore this artifact.");
        return Ok(Outcome::ActionRequired);
    }
    Ok(Outcome::Done)
}
