//! Error types for Taskforge

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Taskforge operations
pub type Result<T> = std::result::Result<T, TaskforgeError>;

/// Main error type for Taskforge
#[derive(Error, Debug)]
pub enum TaskforgeError {
    /// Configuration and resolution errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Variable and input templating errors
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    /// Action execution errors
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// File placement errors
    #[error("File provisioning error: {0}")]
    File(#[from] FileError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// YAML parsing errors
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// An error raised while running a task, tagged with that task's name
    #[error("task '{task}' failed: {source}")]
    InTask {
        task: String,
        #[source]
        source: Box<TaskforgeError>,
    },
}

impl TaskforgeError {
    /// Wrap an error with the name of the task that produced it
    pub fn in_task(task: impl Into<String>, err: TaskforgeError) -> Self {
        TaskforgeError::InTask {
            task: task.into(),
            source: Box::new(err),
        }
    }

    /// Strip every layer of task context and return the underlying error
    pub fn root_cause(&self) -> &TaskforgeError {
        match self {
            TaskforgeError::InTask { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Names of the tasks the error passed through, outermost first
    pub fn task_trace(&self) -> Vec<&str> {
        let mut trace = Vec::new();
        let mut current = self;
        while let TaskforgeError::InTask { task, source } = current {
            trace.push(task.as_str());
            current = source;
        }
        trace
    }
}

/// Configuration parsing, include resolution and call graph errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to find tasks file (searched: {0})")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Task '{0}' is not defined")]
    TaskNotFound(String),

    #[error("Include entry in '{location}' must have exactly one key, found: {keys}")]
    MalformedInclude { location: String, keys: String },

    #[error("Failed to load include '{location}': {error}")]
    IncludeLoad { location: String, error: String },

    #[error("Task loop detected: {0}")]
    LoopDetected(String),
}

/// Variable substitution and input templating errors
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Missing required inputs: {}", .0.join(", "))]
    MissingRequiredInputs(Vec<String>),

    #[error("Failed to render template '{template}': {error}")]
    Resolution { template: String, error: String },

    #[error("Value of '{name}' does not match pattern '{pattern}'")]
    PatternMismatch { name: String, pattern: String },

    #[error("Invalid pattern '{pattern}' for '{name}': {error}")]
    InvalidPattern {
        name: String,
        pattern: String,
        error: String,
    },
}

/// Action execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Command failed with exit code {code:?}{}", stderr_suffix(.stderr))]
    CommandFailed { code: Option<i32>, stderr: String },

    #[error("Failed to spawn '{shell}': {error}")]
    Spawn { shell: String, error: String },

    #[error("Attempt timed out after {0:?}")]
    AttemptTimedOut(std::time::Duration),

    #[error("Command \"{command}\" timed out after {seconds} seconds")]
    Timeout {
        command: String,
        seconds: u64,
        #[source]
        last: Option<Box<ExecutionError>>,
    },

    #[error("Command \"{command}\" failed after {retries} retries")]
    RetriesExhausted {
        command: String,
        retries: u32,
        #[source]
        last: Option<Box<ExecutionError>>,
    },

    #[error("Failed to load env file '{path}': {error}")]
    EnvFile { path: PathBuf, error: String },
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {}", stderr)
    }
}

/// File placement errors
#[derive(Error, Debug)]
pub enum FileError {
    #[error("Failed to download '{url}': {error}")]
    Download { url: String, error: String },

    #[error("Failed to copy '{path}': {source}")]
    Copy {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to extract '{archive}' into '{dest}': {error}")]
    Extract {
        archive: PathBuf,
        dest: PathBuf,
        error: String,
    },

    #[error("Checksum mismatch for '{path}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Invalid checksum '{0}'")]
    InvalidChecksum(String),

    #[error("Failed to template '{path}': {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to set permissions on '{path}': {source}")]
    Permissions {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to create symlink '{link}' -> '{target}': {source}")]
    Symlink {
        link: PathBuf,
        target: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Specialized result type for templating operations
pub type TemplateResult<T> = std::result::Result<T, TemplateError>;

/// Specialized result type for execution operations
pub type ExecutionResult<T> = std::result::Result<T, ExecutionError>;

/// Specialized result type for file placement operations
pub type FileResult<T> = std::result::Result<T, FileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_unwraps_task_context() {
        let err = TaskforgeError::in_task(
            "outer",
            TaskforgeError::in_task("inner", ConfigError::TaskNotFound("x".into()).into()),
        );

        assert_eq!(err.task_trace(), vec!["outer", "inner"]);
        assert!(matches!(
            err.root_cause(),
            TaskforgeError::Config(ConfigError::TaskNotFound(name)) if name == "x"
        ));
    }

    #[test]
    fn test_missing_inputs_message_lists_all_names() {
        let err = TemplateError::MissingRequiredInputs(vec!["A".into(), "B".into()]);
        assert_eq!(err.to_string(), "Missing required inputs: A, B");
    }
}
