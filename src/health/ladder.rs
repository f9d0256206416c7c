//! Repair tiers for unhealthy services
//!
//! The ladder has exactly two rungs. `escalate` is the only way to move up,
//! and the top rung escalates to nothing, so a heal run performs at most one
//! restart batch and one recreate batch.

use std::fmt;

use serde::Serialize;

use crate::error::StackResult;
use crate::services::ServiceController;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairAction {
    Restart,
    Recreate,
}

impl RepairAction {
    /// Rung every heal run starts on
    pub const FIRST: RepairAction = RepairAction::Restart;

    /// Next rung, if any
    pub fn escalate(self) -> Option<RepairAction> {
        match self {
            Self::Restart => Some(Self::Recreate),
            Self::Recreate => None,
        }
    }

    /// Apply this action to a batch of services
    pub fn apply(self, controller: &dyn ServiceController, services: &[String]) -> StackResult<()> {
        match self {
            Self::Restart => controller.restart(services),
            Self::Recreate => controller.recreate(services),
        }
    }
}

impl fmt::Display for RepairAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Restart => write!(f, "restart"),
            Self::Recreate => write!(f, "recreate"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairOutcome {
    Recovered,
    StillUnhealthy,
    /// The action itself could not be carried out
    Failed(String),
}

/// One action applied to one service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairAttempt {
    pub service: String,
    pub action: RepairAction,
    pub outcome: RepairOutcome,
}

/// Result of one heal run
#[derive(Debug, Clone, Default)]
pub struct HealOutcome {
    /// Services that needed no repair
    pub already_healthy: Vec<String>,
    pub attempts: Vec<RepairAttempt>,
    /// Services still unhealthy after the last rung
    pub residual: Vec<String>,
}

impl HealOutcome {
    /// Whether the operator has to follow up
    pub fn needs_action(&self) -> bool {
        !self.residual.is_empty()
    }
}
