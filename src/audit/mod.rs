//! Operation journal for stackward
//!
//! Every mutating command (backup, sweep, restore, sync, heal, secrets
//! changes) appends one entry to `logs/operations.jsonl` describing what ran
//! and how it ended. `stackward history` reads it back.
//!
//! # Example
//!
//! ```rust,ignore
//! use stackward::audit::{JournalOperation, JournalOutcome, OperationJournal};
//!
//! let journal = OperationJournal::new(paths.journal_file());
//! let result = manager.create(Profile::Full);
//! journal.record(JournalOperation::BackupCreate, "full", &result, JournalOutcome::Succeeded);
//! ```

mod entry;
mod logger;

pub use entry::{JournalEntry, JournalOperation, JournalOutcome};
pub use logger::OperationJournal;
