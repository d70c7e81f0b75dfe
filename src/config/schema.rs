//! Tasks file validation
//!
//! Structural checks that serde cannot express. Call graph checks live in
//! `runner::loops` because they need the resolved task set.

use crate::config::types::{Action, TasksFile};
use crate::error::{ConfigError, ConfigResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static VARIABLE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9_]+$").expect("variable name regex is valid"));

/// Validate a tasks file loaded from `location`
pub fn validate_tasks_file(file: &TasksFile, location: &str) -> ConfigResult<()> {
    for include in &file.includes {
        if include.single().is_none() {
            return Err(ConfigError::MalformedInclude {
                location: location.to_string(),
                keys: include.keys(),
            });
        }
    }

    let mut names = HashSet::new();
    for task in &file.tasks {
        validate_task_name(&task.name)?;
        if !names.insert(task.name.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "task '{}' is defined more than once in {}",
                task.name, location
            )));
        }

        for action in &task.actions {
            match action {
                Action::TaskReference(reference) if reference.task.trim().is_empty() => {
                    return Err(ConfigError::Invalid(format!(
                        "task '{}' has an action with an empty task reference",
                        task.name
                    )));
                }
                Action::TaskReference(_) => {}
                Action::Command(command) => {
                    for output in &command.set_variables {
                        validate_variable_name(&output.name, location)?;
                    }
                }
            }
        }
    }

    for variable in &file.variables {
        validate_variable_name(&variable.name, location)?;
        if let Some(pattern) = &variable.pattern {
            validate_pattern(&variable.name, pattern)?;
        }
    }

    Ok(())
}

/// Validate a task name
fn validate_task_name(name: &str) -> ConfigResult<()> {
    if name.is_empty() {
        return Err(ConfigError::Invalid("task with empty name".to_string()));
    }
    if name.contains(':') {
        return Err(ConfigError::Invalid(format!(
            "task name '{}' must not contain ':' (reserved for include namespaces)",
            name
        )));
    }
    Ok(())
}

/// Variable names are uppercase so that `--set` keys always match them
fn validate_variable_name(name: &str, location: &str) -> ConfigResult<()> {
    if VARIABLE_NAME.is_match(name) {
        return Ok(());
    }
    Err(ConfigError::Invalid(format!(
        "variable name '{}' in {} must match ^[A-Z0-9_]+$",
        name, location
    )))
}

fn validate_pattern(name: &str, pattern: &str) -> ConfigResult<()> {
    Regex::new(pattern).map(|_| ()).map_err(|e| {
        ConfigError::Invalid(format!(
            "variable '{}' has an invalid pattern '{}': {}",
            name, pattern, e
        ))
    })
}
