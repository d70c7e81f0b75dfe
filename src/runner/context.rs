//! Execution context for task running
//!
//! The context owns all state of a single run: the template store, the
//! scratch env file shared by every command, and the stack of running tasks.

use crate::runner::executor::ActionDefaults;
use crate::runner::template::TemplateStore;
use crate::utils::architecture;
use std::env;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Execution context that tracks state during task execution
pub struct Context {
    /// Directory commands run in and relative paths resolve against
    pub working_dir: PathBuf,

    /// Variables and captures for this run
    pub store: TemplateStore,

    /// Defaults merged into every command action
    pub defaults: ActionDefaults,

    /// Stack of tasks being executed
    pub task_stack: Vec<String>,

    env_file: NamedTempFile,
}

impl Context {
    /// Create a context whose env file starts with `ARCHITECTURE=<arch>`
    pub fn new(store: TemplateStore) -> io::Result<Self> {
        let mut env_file = tempfile::Builder::new()
            .prefix("taskforge-")
            .suffix(".env")
            .tempfile()?;
        writeln!(env_file, "ARCHITECTURE={}", architecture())?;
        env_file.flush()?;

        Ok(Context {
            working_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            store,
            defaults: ActionDefaults::default(),
            task_stack: Vec::new(),
            env_file,
        })
    }

    /// Create a context with a specific working directory
    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn with_defaults(mut self, defaults: ActionDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Path of the run's env file
    pub fn env_file_path(&self) -> &Path {
        self.env_file.path()
    }

    /// Append `KEY=VALUE` lines to the run's env file
    pub fn append_env(&self, entries: &[String]) -> io::Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new().append(true).open(self.env_file.path())?;
        for entry in entries {
            writeln!(file, "{}", entry)?;
        }
        Ok(())
    }

    /// Push a task onto the execution stack
    pub fn push_task(&mut self, task_name: String) {
        self.task_stack.push(task_name);
    }

    /// Pop a task from the execution stack
    pub fn pop_task(&mut self) -> Option<String> {
        self.task_stack.pop()
    }

    /// Running tasks joined outermost first, e.g. `default > lib:build`
    pub fn call_path(&self) -> String {
        self.task_stack.join(" > ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_env_file_starts_with_architecture() {
        let ctx = Context::new(TemplateStore::new()).unwrap();
        let contents = fs::read_to_string(ctx.env_file_path()).unwrap();
        assert!(contents.starts_with("ARCHITECTURE="));
    }

    #[test]
    fn test_append_env() {
        let ctx = Context::new(TemplateStore::new()).unwrap();
        ctx.append_env(&["INPUT_A=1".to_string(), "INPUT_B=2".to_string()])
            .unwrap();

        let contents = fs::read_to_string(ctx.env_file_path()).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(&lines[1..], ["INPUT_A=1", "INPUT_B=2"]);
    }

    #[test]
    fn test_task_stack() {
        let mut ctx = Context::new(TemplateStore::new()).unwrap();

        ctx.push_task("task1".to_string());
        ctx.push_task("task2".to_string());
        assert_eq!(ctx.call_path(), "task1 > task2");

        assert_eq!(ctx.pop_task(), Some("task2".to_string()));
        assert_eq!(ctx.call_path(), "task1");
    }
}
