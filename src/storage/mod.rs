//! Storage layer for stackward
//!
//! Atomic file replacement, owner/mode handling, the scoped directory lock
//! shared by backup, restore and sync, and the interrupt cleanup registry.

pub mod cleanup;
pub mod file_io;
pub mod lock;

pub use cleanup::CleanupGuard;
pub use file_io::{copy_preserving, sibling_with_suffix, write_bytes_atomic};
pub use lock::DirLock;
