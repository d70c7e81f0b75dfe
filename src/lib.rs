//! Taskforge - a declarative task runner
//!
//! Tasks are defined in YAML files that can include each other, take typed
//! inputs and variables, and run commands with retry and timeout handling.

// Public modules
pub mod cli;
pub mod config;
pub mod error;
pub mod runner;
pub mod utils;

// Re-export commonly used types
pub use error::{Result, TaskforgeError};

/// Current version of Taskforge
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
