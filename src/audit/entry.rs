//! Journal entry data structures
//!
//! One entry per mutating operation: what ran, against which target, and how
//! it ended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operations recorded in the journal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalOperation {
    Init,
    BackupCreate,
    BackupSweep,
    Restore,
    Sync,
    Heal,
    SecretsEncrypt,
    SecretsEdit,
}

impl std::fmt::Display for JournalOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JournalOperation::Init => write!(f, "INIT"),
            JournalOperation::BackupCreate => write!(f, "BACKUP"),
            JournalOperation::BackupSweep => write!(f, "SWEEP"),
            JournalOperation::Restore => write!(f, "RESTORE"),
            JournalOperation::Sync => write!(f, "SYNC"),
            JournalOperation::Heal => write!(f, "HEAL"),
            JournalOperation::SecretsEncrypt => write!(f, "SECRETS-ENCRYPT"),
            JournalOperation::SecretsEdit => write!(f, "SECRETS-EDIT"),
        }
    }
}

/// How an operation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalOutcome {
    Succeeded,
    ActionRequired,
    Failed,
    Aborted,
    DryRun,
}

impl std::fmt::Display for JournalOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JournalOutcome::Succeeded => "ok",
            JournalOutcome::ActionRequired => "action required",
            JournalOutcome::Failed => "failed",
            JournalOutcome::Aborted => "aborted",
            JournalOutcome::DryRun => "dry run",
        };
        write!(f, "{}", s)
    }
}

/// A single journal entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// When the operation finished (UTC)
    pub timestamp: DateTime<Utc>,

    pub operation: JournalOperation,

    /// Artifact, profile or service set the operation acted on
    pub target: String,

    pub outcome: JournalOutcome,

    /// Error text or a short summary
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl JournalEntry {
    pub fn new(
        operation: JournalOperation,
        target: impl Into<String>,
        outcome: JournalOutcome,
        detail: Option<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            target: target.into(),
            outcome,
            detail,
        }
    }

    /// Format the entry for human-readable output
    pub fn format_human_readable(&self) -> String {
        let mut output = format!(
            "[{}] {} {} ({})",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.operation,
            self.target,
            self.outcome
        );

        if let Some(detail) = &self.detail {
            output.push_str(&format!("\n  {}", detail));
        }

        output
    }
}
