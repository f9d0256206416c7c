//! CLI command handlers
//!
//! This module bridges clap argument parsing with the backup, restore, sync
//! and health components. Handlers print operator-facing output and report
//! whether the operator still has something to do.

pub mod backup;
pub mod health;
pub mod history;
pub mod init;
pub mod restore;
pub mod secrets;
pub mod sync;

use crate::error::{EXIT_ACTION_REQUIRED, EXIT_OK};

pub use backup::{handle_backup_command, BackupCommands};
pub use health::{handle_health_command, HealthCommands};
pub use history::handle_history_command;
pub use init::{handle_config_command, handle_init_command};
pub use restore::{handle_detect_command, handle_restore_command, RestoreArgs, StdinConfirm};
pub use secrets::{handle_secrets_command, SecretsCommands};
pub use sync::handle_sync_command;

/// How a command that did not fail ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// Completed, but something needs a human
    ActionRequired,
}

impl Outcome {
    pub fn from_needs_action(needs_action: bool) -> Self {
        if needs_action {
            Self::ActionRequired
        } else {
            Self::Done
        }
    }

    pub fn exit_code(self) -> u8 {
        match self {
            Self::Done => EXIT_OK,
            Self::ActionRequired => EXIT_ACTION_REQUIRED,
        }
    }
}

/// Format a duration in human-readable form
pub(crate) fn format_age(duration: chrono::Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);

    if total_seconds < 60 {
        return format!("{}s", total_seconds);
    }

    let minutes = total_seconds / 60;
    if minutes < 60 {
        return format!("{}m", minutes);
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h", hours);
    }

    format!("{}d", hours / 24)
}

/// Format a file size in human-readable form
pub(crate) fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
