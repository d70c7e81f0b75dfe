//! Task execution engine
//!
//! This module resolves includes into a [`TaskSet`], validates call graphs,
//! templates inputs and variables, and runs actions through an
//! [`ActionExecutor`].

pub mod action;
pub mod context;
pub mod executor;
pub mod files;
pub mod include;
pub mod inputs;
pub mod loops;
pub mod task;
pub mod template;

// Re-export main types
pub use action::{convert_wait_to_cmd, mutate_command, run_with_retries};
pub use context::Context;
pub use executor::{derive_config, ActionConfig, ActionDefaults, ActionExecutor, ShellExecutor};
pub use files::{place_file, place_files};
pub use include::{qualify, TaskSet};
pub use inputs::template_actions;
pub use loops::check_for_task_loops;
pub use task::{run, RunOptions, Runner, DEFAULT_TASK};
pub use template::{TemplateStore, TemplateValue};
