//! Secrets CLI commands
//!
//! The secrets document stays encrypted at rest; `get` and `edit` decrypt it
//! in memory (or in an owner-only scratch file for the editor).

use std::path::PathBuf;

use clap::Subcommand;

use crate::audit::{JournalOperation, JournalOutcome, OperationJournal};
use crate::config::paths::StackPaths;
use crate::crypto::CryptoVault;
use crate::error::StackResult;

use super::Outcome;

/// Secrets subcommands
#[derive(Subcommand)]
pub enum SecretsCommands {
    /// Print one secret to stdout
    Get {
        /// Secret name
        name: String,
    },

    /// Encrypt a plaintext secrets document in place
    Encrypt {
        /// Document to encrypt (default: secrets/secrets.yaml.enc)
        file: Option<PathBuf>,
    },

    /// Edit the secrets document in $EDITOR
    Edit,
}

/// Handle a secrets command; `editor` is only used by `edit`
pub fn handle_secrets_command(
    paths: &StackPaths,
    editor: &str,
    cmd: SecretsCommands,
) -> StackResult<Outcome> {
    let vault = CryptoVault::from_paths(paths);
    let store = vault.secrets();
    let journal = OperationJournal::new(paths.journal_file());
    let document = paths.secrets_document();

    match cmd {
        SecretsCommands::Get { name } => {
            let secret = store.get_secret(&document, &name)?;
            println!("{}", secret.as_str());
        }

        SecretsCommands::Encrypt { file } => {
            let file = file.map(|f| paths.resolve(&f)).unwrap_or(document);
            let result = store.encrypt_in_place(&file);
            journal.record(
                JournalOperation::SecretsEncrypt,
                &file.display().to_string(),
                &result,
                JournalOutcome::Succeeded,
            );
            if result? {
                println!("Encrypted {}", file.display());
            } else {
                println!("{} is already encrypted.", file.display());
            }
        }

        SecretsCommands::Edit => {
            let result = store.interactive_edit(&document, editor);
            journal.record(
                JournalOperation::SecretsEdit,
                &document.display().to_string(),
                &result,
                JournalOutcome::Succeeded,
            );
            result?;
            println!("Saved {}", document.display());
        }
    }

    Ok(Outcome::Done)
}
