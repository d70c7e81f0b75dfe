//! Common test utilities

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use taskforge::error::{ExecutionError, ExecutionResult};
use taskforge::runner::{ActionConfig, ActionExecutor};
use tempfile::TempDir;

/// Create a temporary directory with a tasks.yaml file
pub fn create_test_tasks(content: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let tasks_path = temp_dir.path().join("tasks.yaml");
    fs::write(&tasks_path, content).unwrap();
    (temp_dir, tasks_path)
}

/// Write a file below `dir`, creating parent directories
pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

/// Executor that records every attempt instead of spawning processes
///
/// Commands containing `fail` always fail. Any other command succeeds and
/// returns the text after a leading `echo `.
#[derive(Default)]
pub struct FakeExecutor {
    pub attempts: Cell<u32>,
    pub commands: RefCell<Vec<String>>,
    pub configs: RefCell<Vec<ActionConfig>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }
}

impl ActionExecutor for FakeExecutor {
    fn run(
        &self,
        config: &ActionConfig,
        cmd: &str,
        _timeout: Option<Duration>,
    ) -> ExecutionResult<String> {
        self.attempts.set(self.attempts.get() + 1);
        self.commands.borrow_mut().push(cmd.to_string());
        self.configs.borrow_mut().push(config.clone());

        if cmd.contains("fail") {
            return Err(ExecutionError::CommandFailed {
                code: Some(1),
                stderr: "failed on purpose".to_string(),
            });
        }
        Ok(cmd.strip_prefix("echo ").unwrap_or(cmd).to_string())
    }
}
