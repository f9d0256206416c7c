//! Custom error types for stackward
//!
//! This module defines the error hierarchy for the application using thiserror
//! for ergonomic error definitions. Every variant carries enough context to
//! print a concrete remediation step next to the failure.

use std::fmt;

use thiserror::Error;

/// Exit code for a successful run (also used when the operator declines)
pub const EXIT_OK: u8 = 0;

/// Exit code for any failure
pub const EXIT_FAILURE: u8 = 1;

/// Exit code for "completed, operator action required"
pub const EXIT_ACTION_REQUIRED: u8 = 2;

/// Exit code after SIGINT (128 + signal number)
pub const EXIT_INTERRUPTED: u8 = 130;

/// Distinguishes the ways decryption and key handling can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoErrorKind {
    /// The artifact was encrypted to a different recipient
    WrongKey,
    /// The artifact is truncated, malformed, or fails authentication
    Corrupt,
    /// Key material is missing, unreadable, malformed, or too permissive
    Unavailable,
}

impl fmt::Display for CryptoErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongKey => write!(f, "wrong key"),
            Self::Corrupt => write!(f, "corrupt data"),
            Self::Unavailable => write!(f, "key unavailable"),
        }
    }
}

/// The main error type for stackward operations
#[derive(Error, Debug)]
pub enum StackError {
    /// Fetching external reference data failed
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Encryption, decryption, or key handling failed
    #[error("Crypto error ({kind}): {message}")]
    Crypto {
        kind: CryptoErrorKind,
        message: String,
    },

    /// A snapshot or restored payload failed its integrity check
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// The service controller could not complete a required step
    #[error("Service error: {0}")]
    Service(String),

    /// File I/O errors
    #[error("File system error: {0}")]
    FileSystem(String),

    /// The operator declined a destructive confirmation
    #[error("Aborted by operator")]
    UserAborted,

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors for rendered artifacts and inputs
    #[error("Validation error: {0}")]
    Validation(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    /// A named secret is absent from the secrets document
    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    /// Another invocation holds the lock on a directory tree
    #[error("Locked: {0}")]
    Locked(String),
}

impl StackError {
    /// Create a crypto error of the given kind
    pub fn crypto(kind: CryptoErrorKind, message: impl Into<String>) -> Self {
        Self::Crypto {
            kind,
            message: message.into(),
        }
    }

    /// Create a "not found" error for backup artifacts
    pub fn artifact_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Backup artifact",
            identifier: identifier.into(),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::SecretNotFound(_))
    }

    /// Check if this is a crypto error of the given kind
    pub fn is_crypto(&self, expected: CryptoErrorKind) -> bool {
        matches!(self, Self::Crypto { kind, .. } if *kind == expected)
    }

    /// Whether retrying the same operation could plausibly succeed.
    ///
    /// Corrupt data and integrity failures never heal on their own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Fetch(_) | Self::Service(_) | Self::Locked(_))
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::UserAborted => EXIT_OK,
            _ => EXIT_FAILURE,
        }
    }

    /// A concrete next step for the operator
    pub fn remediation(&self) -> String {
        match self {
            Self::Fetch(_) => "No files were changed. Check network access to the reference \
                               source and re-run `stackward sync`."
                .into(),
            Self::Crypto {
                kind: CryptoErrorKind::WrongKey,
                ..
            } => "The artifact was encrypted for another key. Restore the matching \
                  secrets/keys/private from the emergency kit and retry."
                .into(),
            Self::Crypto {
                kind: CryptoErrorKind::Corrupt,
                ..
            } => "The artifact is damaged; do not retry it. Pick an older artifact with \
                  `stackward backup list`."
                .into(),
            Self::Crypto {
                kind: CryptoErrorKind::Unavailable,
                ..
            } => "Check secrets/keys/{private,public} exist and run \
                  `chmod 600 secrets/keys/private`."
                .into(),
            Self::Integrity(_) => "The database copy is not trustworthy. Inspect the live \
                                   database with `sqlite3 <db> 'PRAGMA integrity_check'` before \
                                   taking another backup."
                .into(),
            Self::Service(_) => "Inspect `docker compose ps` and `docker compose logs --tail 100` \
                                 for the affected service, then re-run the command."
                .into(),
            Self::FileSystem(_) => "Check free disk space and directory permissions, then \
                                    re-run the command."
                .into(),
            Self::UserAborted => "Nothing was changed.".into(),
            Self::Config(_) => "Fix stackward.json (see `stackward config`) and re-run.".into(),
            Self::Validation(_) => "The rendered or supplied input was rejected; no file was \
                                    activated. Inspect the input and re-run."
                .into(),
            Self::Json(_) => "Check the JSON file mentioned above for syntax errors.".into(),
            Self::NotFound { entity_type, .. } => {
                format!("List available entries (e.g. `stackward backup list`) and pass an existing {}.", entity_type.to_lowercase())
            }
            Self::SecretNotFound(_) => {
                "Add the secret with `stackward secrets edit` and retry.".into()
            }
            Self::Locked(_) => "Wait for the other stackward run to finish. If none is running, \
                                remove the stale .stackward.lock file."
                .into(),
        }
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for StackError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem(err.to_string())
    }
}

impl From<serde_json::Error> for StackError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Result type alias for stackward operations
pub type StackResult<T> = Result<T, StackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StackError::Config("test error".into());
        assert_eq!(err.to_string(), "Configuration error: test error");
    }

    #[test]
    fn test_crypto_error_display() {
        let err = StackError::crypto(CryptoErrorKind::WrongKey, "fingerprint mismatch");
        assert_eq!(
            err.to_string(),
            "Crypto error (wrong key): fingerprint mismatch"
        );
        assert!(err.is_crypto(CryptoErrorKind::WrongKey));
        assert!(!err.is_crypto(CryptoErrorKind::Corrupt));
    }

    #[test]
    fn test_not_found_error() {
        let err = StackError::artifact_not_found("db-backup-20240101-000000.sqlite3.gz.enc");
        assert!(err.to_string().starts_with("Backup artifact not found"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_corrupt_data_is_never_retryable() {
        assert!(!StackError::crypto(CryptoErrorKind::Corrupt, "x").is_retryable());
        assert!(!StackError::Integrity("x".into()).is_retryable());
        assert!(StackError::Fetch("timeout".into()).is_retryable());
    }

    #[test]
    fn test_user_aborted_exits_cleanly() {
        assert_eq!(StackError::UserAborted.exit_code(), EXIT_OK);
        assert_eq!(StackError::Service("x".into()).exit_code(), EXIT_FAILURE);
    }

    #[test]
    fn test_every_error_has_remediation() {
        let errors = vec![
            StackError::Fetch("x".into()),
            StackError::crypto(CryptoErrorKind::Unavailable, "x"),
            StackError::Integrity("x".into()),
            StackError::Locked("x".into()),
            StackError::SecretNotFound("x".into()),
        ];
        for err in errors {
            assert!(!err.remediation().is_empty());
        }
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: StackError = io_err.into();
        assert!(matches!(err, StackError::FileSystem(_)));
    }
}
