//! `history` command

use crate::audit::OperationJournal;
use crate::config::paths::StackPaths;
use crate::error::StackResult;

use super::Outcome;

/// Print the most recent journal entries, oldest first
pub fn handle_history_command(paths: &StackPaths, count: usize) -> StackResult<Outcome> {
    let journal = OperationJournal::new(paths.journal_file());
    let entries = journal.read_recent(count)?;

    if entries.is_empty() {
        println!("No operations recorded yet.");
        return Ok(Outcome::Done);
    }

    for entry in &entries {
        println!("{}", entry.format_human_readable());
    }
    Ok(Outcome::Done)
}
