//! stackward - backups, restores, config sync and self-healing for a compose stack
//!
//! This library provides the core functionality behind the `stackward` CLI.
//! It operates on one single-host docker compose project: it takes encrypted
//! backups of the application database and project files, restores them with
//! a safety copy and a typed confirmation, keeps proxy and firewall allow-lists
//! in step with upstream reference data, and repairs unhealthy services.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Paths and settings (`stackward.json`)
//! - `error`: Custom error types, exit codes and remediation text
//! - `crypto`: Public-key encryption of artifacts and the secrets store
//! - `storage`: Atomic file writes and directory locks
//! - `services`: The service controller seam (docker compose)
//! - `snapshot`: Consistent database snapshots and tar.gz archives
//! - `backup`: Artifact creation, retention, detection and restore
//! - `sync`: Atomic config sync with rollback
//! - `health`: Health checks and the repair ladder
//! - `notify`: Best-effort operator notifications
//! - `audit`: Operation journal
//! - `cli`: Command handlers
//!
//! # Example
//!
//! ```rust,ignore
//! use stackward::config::{paths::StackPaths, settings::Settings};
//!
//! let paths = StackPaths::new(None)?;
//! let settings = Settings::load_or_create(&paths)?;
//! ```

pub mod audit;
pub mod backup;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod error;
pub mod health;
pub mod notify;
pub mod services;
pub mod snapshot;
pub mod storage;
pub mod sync;

#[cfg(test)]
mod testing;

pub use error::StackError;
