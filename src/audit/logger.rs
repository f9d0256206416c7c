//! Append-only operation journal
//!
//! Each entry is written as a single JSON line and flushed immediately.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use crate::error::{StackError, StackResult};

use super::entry::{JournalEntry, JournalOperation, JournalOutcome};

/// Writes journal entries to `logs/operations.jsonl`
pub struct OperationJournal {
    log_path: PathBuf,
}

impl OperationJournal {
    pub fn new(log_path: PathBuf) -> Self {
        Self { log_path }
    }

    /// Append one entry
    pub fn log(&self, entry: &JournalEntry) -> StackResult<()> {
        if let Some(parent) = self.log_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| StackError::FileSystem(format!("Failed to open journal: {}", e)))?;

        let json = serde_json::to_string(entry)
            .map_err(|e| StackError::Json(format!("Failed to serialize journal entry: {}", e)))?;

        writeln!(file, "{}", json)
            .map_err(|e| StackError::FileSystem(format!("Failed to write journal entry: {}", e)))?;

        file.flush()
            .map_err(|e| StackError::FileSystem(format!("Failed to flush journal: {}", e)))?;

        Ok(())
    }

    /// Record an operation's result; journal failures are only logged
    pub fn record<T>(
        &self,
        operation: JournalOperation,
        target: &str,
        result: &StackResult<T>,
        outcome_on_ok: JournalOutcome,
    ) {
        let entry = match result {
            Ok(_) => JournalEntry::new(operation, target, outcome_on_ok, None),
            Err(StackError::UserAborted) => {
                JournalEntry::new(operation, target, JournalOutcome::Aborted, None)
            }
            Err(e) => JournalEntry::new(
                operation,
                target,
                JournalOutcome::Failed,
                Some(e.to_string()),
            ),
        };

        if let Err(e) = self.log(&entry) {
            tracing::warn!(error = %e, "failed to append to operation journal");
        }
    }

    /// Read all entries, oldest first
    pub fn read_all(&self) -> StackResult<Vec<JournalEntry>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.log_path)
            .map_err(|e| StackError::FileSystem(format!("Failed to open journal: {}", e)))?;

        let reader = BufReader::new(file);
        let mut entries = Vec::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| {
                StackError::FileSystem(format!(
                    "Failed to read journal line {}: {}",
                    line_num + 1,
                    e
                ))
            })?;

            if line.trim().is_empty() {
                continue;
            }

            let entry: JournalEntry = serde_json::from_str(&line).map_err(|e| {
                StackError::Json(format!(
                    "Failed to parse journal entry at line {}: {}",
                    line_num + 1,
                    e
                ))
            })?;

            entries.push(entry);
        }

        Ok(entries)
    }

    /// The most recent `count` entries, oldest first
    pub fn read_recent(&self, count: usize) -> StackResult<Vec<JournalEntry>> {
        let all_entries = self.read_all()?;
        let start = all_entries.len().saturating_sub(count);
        Ok(all_entries[start..].to_vec())
    }

    pub fn path(&self) -> &PathBuf {
        &self.log_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_journal() -> (OperationJournal, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let journal = OperationJournal::new(temp_dir.path().join("logs").join("operations.jsonl"));
        (journal, temp_dir)
    }

    #[test]
    fn test_log_and_read() {
        let (journal, _temp) = create_test_journal();
        let entry = JournalEntry::new(
            JournalOperation::BackupCreate,
            "full",
            JournalOutcome::Succeeded,
            None,
        );

        journal.log(&entry).unwrap();

        let entries = journal.read_all().unwrap();
        assert_eq!(entries, vec![entry]);
    }

    #[test]
    fn test_record_maps_results() {
        let (journal, _temp) = create_test_journal();

        let ok: StackResult<()> = Ok(());
        journal.record(JournalOperation::Sync, "config", &ok, JournalOutcome::Succeeded);
        let aborted: StackResult<()> = Err(StackError::UserAborted);
        journal.record(JournalOperation::Restore, "db", &aborted, JournalOutcome::Succeeded);
        let failed: StackResult<()> = Err(StackError::Fetch("timeout".into()));
        journal.record(JournalOperation::Sync, "config", &failed, JournalOutcome::Succeeded);

        let outcomes: Vec<_> = journal
            .read_all()
            .unwrap()
            .into_iter()
            .map(|e| e.outcome)
            .collect();
        assert_eq!(
            outcomes,
            vec![
                JournalOutcome::Succeeded,
                JournalOutcome::Aborted,
                JournalOutcome::Failed
            ]
        );
    }

    #[test]
    fn test_read_recent() {
        let (journal, _temp) = create_test_journal();

        for i in 0..10 {
            let entry = JournalEntry::new(
                JournalOperation::BackupSweep,
                format!("run-{}", i),
                JournalOutcome::Succeeded,
                None,
            );
            journal.log(&entry).unwrap();
        }

        let recent = journal.read_recent(3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].target, "run-7");
        assert_eq!(recent[2].target, "run-9");
    }

    #[test]
    fn test_missing_journal_is_empty() {
        let (journal, _temp) = create_test_journal();
        assert!(journal.read_all().unwrap().is_empty());
    }
}
