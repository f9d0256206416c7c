//! Service health checks and bounded self-repair
//!
//! `check` classifies every service; `auto_heal` walks the repair ladder
//! (restart, then recreate) for the ones that are not healthy, waiting a
//! bounded time after each rung. Whatever is still broken afterwards is
//! reported to the notifier.

pub mod ladder;

use std::fmt;

use serde::Serialize;

use crate::config::settings::Settings;
use crate::error::StackResult;
use crate::notify::{notify_best_effort, Notifier};
use crate::services::{RunState, HealthState, ServiceController, ServiceState};

pub use ladder::{HealOutcome, RepairAction, RepairAttempt, RepairOutcome};

/// Coarse condition derived from a service's typed state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceCondition {
    Healthy,
    Degraded,
    Down,
}

impl fmt::Display for ServiceCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// Map a typed state onto a condition
pub fn classify(state: ServiceState) -> ServiceCondition {
    match (state.run, state.health) {
        (RunState::Running, HealthState::Healthy | HealthState::None) => ServiceCondition::Healthy,
        (RunState::Running, HealthState::Unhealthy) | (RunState::Starting, _) => {
            ServiceCondition::Degraded
        }
        (RunState::Stopped | RunState::Unknown, _) => ServiceCondition::Down,
    }
}

/// Condition of one service at one poll
#[derive(Debug, Clone)]
pub struct ServiceHealth {
    pub name: String,
    pub state: Option<ServiceState>,
    pub condition: ServiceCondition,
    /// Why the state could not be queried
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct HealthReport {
    pub services: Vec<ServiceHealth>,
}

impl HealthReport {
    /// Names of services that are Degraded or Down
    pub fn unhealthy(&self) -> Vec<String> {
        self.services
            .iter()
            .filter(|s| s.condition != ServiceCondition::Healthy)
            .map(|s| s.name.clone())
            .collect()
    }

    pub fn all_healthy(&self) -> bool {
        self.services
            .iter()
            .all(|s| s.condition == ServiceCondition::Healthy)
    }
}

pub struct HealthController<'a> {
    settings: &'a Settings,
    controller: &'a dyn ServiceController,
    notifier: &'a dyn Notifier,
}

impl<'a> HealthController<'a> {
    pub fn new(
        settings: &'a Settings,
        controller: &'a dyn ServiceController,
        notifier: &'a dyn Notifier,
    ) -> Self {
        Self {
            settings,
            controller,
            notifier,
        }
    }

    /// Classify each service; a failed query counts as Down
    pub fn check(&self, services: &[String]) -> HealthReport {
        let services = services
            .iter()
            .map(|name| match self.controller.query_state(name) {
                Ok(state) => ServiceHealth {
                    name: name.clone(),
                    state: Some(state),
                    condition: classify(state),
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(service = %name, error = %e, "state query failed");
                    ServiceHealth {
                        name: name.clone(),
                        state: None,
                        condition: ServiceCondition::Down,
                        error: Some(e.to_string()),
                    }
                }
            })
            .collect();
        HealthReport { services }
    }

    /// Repair every unhealthy target, escalating at most once
    pub fn auto_heal(&self, targets: &[String]) -> StackResult<HealOutcome> {
        let settle = self.settings.health.settle_timeout_secs;
        let initial = self.check(targets);

        let mut outcome = HealOutcome::default();
        let mut pending = initial.unhealthy();
        outcome.already_healthy = targets
            .iter()
            .filter(|t| !pending.contains(t))
            .cloned()
            .collect();

        let mut tier = Some(RepairAction::FIRST);
        while let Some(action) = tier {
            if pending.is_empty() {
                break;
            }
            tracing::info!(%action, services = ?pending, "applying repair");

            if let Err(e) = action.apply(self.controller, &pending) {
                tracing::warn!(%action, error = %e, "repair action failed");
                outcome.attempts.extend(pending.iter().map(|service| RepairAttempt {
                    service: service.clone(),
                    action,
                    outcome: RepairOutcome::Failed(e.to_string()),
                }));
                tier = action.escalate();
                continue;
            }

            for service in &pending {
                self.controller.wait_until_healthy(service, settle);
            }

            let still = self.check(&pending).unhealthy();
            outcome.attempts.extend(pending.iter().map(|service| RepairAttempt {
                service: service.clone(),
                action,
                outcome: if still.contains(service) {
                    RepairOutcome::StillUnhealthy
                } else {
                    RepairOutcome::Recovered
                },
            }));
            pending = still;
            tier = action.escalate();
        }

        if !pending.is_empty() {
            tracing::error!(services = ?pending, "services still unhealthy after recreate");
            let subject = format!(
                "[{}] {} service(s) unhealthy after auto-heal",
                self.settings.host_name(),
                pending.len()
            );
            let body = format!(
                "Still unhealthy after restart and recreate: {}.\nInspect `docker compose logs` on the host.",
                pending.join(", ")
            );
            notify_best_effort(self.notifier, &subject, &body);
        }
        outcome.residual = pending;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeController, RecordingNotifier};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn degraded() -> ServiceState {
        ServiceState::new(RunState::Running, HealthState::Unhealthy)
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(ServiceState::healthy()), ServiceCondition::Healthy);
        assert_eq!(
            classify(ServiceState::new(RunState::Running, HealthState::None)),
            ServiceCondition::Healthy
        );
        assert_eq!(classify(degraded()), ServiceCondition::Degraded);
        assert_eq!(
            classify(ServiceState::new(RunState::Starting, HealthState::None)),
            ServiceCondition::Degraded
        );
        assert_eq!(classify(ServiceState::stopped()), ServiceCondition::Down);
        assert_eq!(
            classify(ServiceState::new(RunState::Unknown, HealthState::None)),
            ServiceCondition::Down
        );
    }

    #[test]
    fn test_check_reports_unhealthy() {
        let settings = Settings::default();
        let controller = FakeController::new(&[
            ("app", ServiceState::healthy()),
            ("proxy", degraded()),
        ]);
        let notifier = RecordingNotifier::default();
        let health = HealthController::new(&settings, &controller, &notifier);

        let report = health.check(&names(&["app", "proxy", "worker"]));

        assert!(!report.all_healthy());
        assert_eq!(report.unhealthy(), names(&["proxy", "worker"]));
    }

    #[test]
    fn test_escalates_once_to_recreate() {
        let settings = Settings::default();
        let controller = FakeController::new(&[("app", ServiceState::stopped())])
            .on_restart("app", ServiceState::stopped())
            .on_recreate("app", ServiceState::healthy());
        let notifier = RecordingNotifier::default();
        let health = HealthController::new(&settings, &controller, &notifier);

        let outcome = health.auto_heal(&names(&["app"])).unwrap();

        assert_eq!(controller.batches("restart"), vec![names(&["app"])]);
        assert_eq!(controller.batches("recreate"), vec![names(&["app"])]);
        assert!(!outcome.needs_action());
        assert_eq!(
            outcome.attempts.iter().map(|a| &a.outcome).collect::<Vec<_>>(),
            vec![&RepairOutcome::StillUnhealthy, &RepairOutcome::Recovered]
        );
        assert!(notifier.sent.borrow().is_empty());
    }

    #[test]
    fn test_restart_fixes_without_recreate() {
        let settings = Settings::default();
        let controller = FakeController::new(&[
            ("app", degraded()),
            ("proxy", ServiceState::healthy()),
        ]);
        let notifier = RecordingNotifier::default();
        let health = HealthController::new(&settings, &controller, &notifier);

        let outcome = health.auto_heal(&names(&["app", "proxy"])).unwrap();

        assert_eq!(outcome.already_healthy, names(&["proxy"]));
        assert_eq!(controller.batches("restart"), vec![names(&["app"])]);
        assert!(controller.batches("recreate").is_empty());
    }

    #[test]
    fn test_residual_failure_is_notified_and_bounded() {
        let mut settings = Settings::default();
        settings.health.settle_timeout_secs = 3;
        let controller = FakeController::new(&[("app", ServiceState::stopped())])
            .on_restart("app", ServiceState::stopped())
            .on_recreate("app", ServiceState::stopped());
        let notifier = RecordingNotifier::default();
        let health = HealthController::new(&settings, &controller, &notifier);

        let outcome = health.auto_heal(&names(&["app"])).unwrap();

        assert!(outcome.needs_action());
        assert_eq!(outcome.residual, names(&["app"]));
        assert_eq!(controller.batches("restart").len(), 1);
        assert_eq!(controller.batches("recreate").len(), 1);
        // initial check + (3 polls + re-check) per rung
        assert_eq!(controller.query_count("app"), 1 + 2 * (3 + 1));
        assert_eq!(notifier.sent.borrow().len(), 1);
        assert!(notifier.sent.borrow()[0].1.contains("app"));
    }

    #[test]
    fn test_healthy_stack_does_nothing() {
        let settings = Settings::default();
        let controller = FakeController::new(&[
            ("app", ServiceState::healthy()),
            ("proxy", ServiceState::healthy()),
        ]);
        let notifier = RecordingNotifier::default();
        let health = HealthController::new(&settings, &controller, &notifier);

        let outcome = health.auto_heal(&names(&["app", "proxy"])).unwrap();

        assert!(outcome.attempts.is_empty());
        assert!(controller.calls().is_empty());
    }
}
