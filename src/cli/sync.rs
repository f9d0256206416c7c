//! `sync` command

use crate::audit::{JournalOperation, JournalOutcome, OperationJournal};
use crate::config::paths::StackPaths;
use crate::config::settings::Settings;
use crate::error::StackResult;
use crate::services::ComposeController;
use crate::sync::{AtomicConfigSync, HttpFetcher, TargetStatus};

use super::Outcome;

/// Handle `sync`
pub fn handle_sync_command(
    paths: &StackPaths,
    settings: &Settings,
    dry_run: bool,
) -> StackResult<Outcome> {
    if settings.sync.targets.is_empty() {
        println!("No sync targets configured.");
        println!("Add entries under \"sync.targets\" in {}.", paths.settings_file().display());
        return Ok(Outcome::Done);
    }

    let fetcher = HttpFetcher::new(&settings.sync)?;
    let controller = ComposeController::new(paths);
    let sync = AtomicConfigSync::new(paths, settings, &fetcher, &controller);

    let result = sync.run(dry_run);
    let outcome_on_ok = match &result {
        Ok(report) if report.needs_action() => JournalOutcome::ActionRequired,
        _ if dry_run => JournalOutcome::DryRun,
        _ => JournalOutcome::Succeeded,
    };
    OperationJournal::new(paths.journal_file()).record(
        JournalOperation::Sync,
        "config",
        &result,
        outcome_on_ok,
    );
    let report = result?;

    println!(
        "Fetched {} network(s){}",
        report.networks,
        if dry_run { " (dry run)" } else { "" }
    );
    for target in &report.targets {
        let status = match &target.status {
            TargetStatus::Unchanged => "unchanged".to_string(),
            TargetStatus::Updated => "updated".to_string(),
            TargetStatus::WouldUpdate { added, removed } => {
                format!("would update (+{} -{})", added, removed)
            }
            TargetStatus::RolledBack => "rolled back".to_string(),
        };
        println!("  {:<20} {:<32} {}", target.name, target.file, status);
    }

    if let Some(reason) = &report.rollback_reason {
        println!();
        println!("Sync rolled back: {}", reason);
        println!("The previous files are active again. Fix the consumer and re-run 'stackward sync'.");
    }

    Ok(Outcome::from_needs_action(report.needs_action()))
}
