//! Configuration module for stackward
//!
//! This module provides configuration management including:
//! - Project-root-relative path resolution
//! - Settings persistence and validation

pub mod paths;
pub mod settings;

pub use paths::StackPaths;
pub use settings::Settings;
