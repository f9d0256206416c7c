//! Health CLI commands

use clap::Subcommand;

use crate::audit::{JournalOperation, JournalOutcome, OperationJournal};
use crate::config::paths::StackPaths;
use crate::config::settings::Settings;
use crate::error::StackResult;
use crate::health::{HealthController, RepairOutcome, ServiceCondition};
use crate::notify;
use crate::services::ComposeController;

use super::Outcome;

/// Health subcommands
#[derive(Subcommand)]
pub enum HealthCommands {
    /// Show the condition of every service
    Check {
        /// Services to check (default: all configured services)
        services: Vec<String>,
    },

    /// Restart, then recreate, services that are not healthy
    Heal {
        /// Services to heal (default: all configured services)
        services: Vec<String>,
    },
}

/// Handle a health command
pub fn handle_health_command(
    paths: &StackPaths,
    settings: &Settings,
    cmd: HealthCommands,
) -> StackResult<Outcome> {
    let controller = ComposeController::new(paths);
    let notifier = notify::from_settings(&settings.notifier, &settings.host_name());
    let health = HealthController::new(settings, &controller, notifier.as_ref());

    let or_all = |services: Vec<String>| {
        if services.is_empty() {
            settings.services.all.clone()
        } else {
            services
        }
    };

    match cmd {
        HealthCommands::Check { services } => {
            let report = health.check(&or_all(services));

            println!("{:<20} {:<10} {:<10} CONDITION", "SERVICE", "STATE", "HEALTH");
            for service in &report.services {
                let (run, probe) = match &service.state {
                    Some(state) => (state.run.to_string(), state.health.to_string()),
                    None => ("?".to_string(), "?".to_string()),
                };
                println!(
                    "{:<20} {:<10} {:<10} {}",
                    service.name, run, probe, service.condition
                );
                if let Some(error) = &service.error {
                    println!("  ({})", error);
                }
            }

            let down = report
                .services
                .iter()
                .filter(|s| s.condition == ServiceCondition::Down)
                .count();
            if !report.all_healthy() {
                println!();
                println!(
                    "{} service(s) not healthy ({} down). Run 'stackward health heal' to repair.",
                    report.unhealthy().len(),
                    down
                );
            }
            Ok(Outcome::from_needs_action(!report.all_healthy()))
        }

        HealthCommands::Heal { services } => {
            let targets = or_all(services);
            let result = health.auto_heal(&targets);
            let outcome_on_ok = match &result {
                Ok(outcome) if outcome.needs_action() => JournalOutcome::ActionRequired,
                _ => JournalOutcome::Succeeded,
            };
            OperationJournal::new(paths.journal_file()).record(
                JournalOperation::Heal,
                &targets.join(","),
                &result,
                outcome_on_ok,
            );
            let outcome = result?;

            if outcome.attempts.is_empty() {
                println!("All {} service(s) healthy; nothing to do.", targets.len());
                return Ok(Outcome::Done);
            }

            for attempt in &outcome.attempts {
                let result = match &attempt.outcome {
                    RepairOutcome::Recovered => "recovered".to_string(),
                    RepairOutcome::StillUnhealthy => "still unhealthy".to_string(),
                    RepairOutcome::Failed(e) => format!("failed: {}", e),
                };
                println!(
                    "  {:<9} {:<20} {}",
                    attempt.action.to_string(),
                    attempt.service,
                    result
                );
            }

            if outcome.needs_action() {
                println!();
                println!(
                    "Still unhealthy after recreate: {}",
                    outcome.residual.join(", ")
                );
                println!("Inspect them with: docker compose logs --tail 100 <service>");
            } else {
                println!();
                println!("All targeted services are healthy.");
            }
            Ok(Outcome::from_needs_action(outcome.needs_action()))
        }
    }
}
