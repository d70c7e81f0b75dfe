//! Task loop detection
//!
//! Walks the task-reference graph depth-first from one task. Only the tasks
//! on the current path count as visited, so a task that is called twice from
//! different places (or twice in a row) is fine; only a task that ends up
//! calling itself is rejected.

use crate::error::{ConfigError, ConfigResult};
use crate::runner::include::TaskSet;

/// Check that `task_name` and everything it references never loops
pub fn check_for_task_loops(tasks: &TaskSet, task_name: &str) -> ConfigResult<()> {
    let mut stack = Vec::new();
    check_task(tasks, task_name, &mut stack)
}

fn check_task(tasks: &TaskSet, task_name: &str, stack: &mut Vec<String>) -> ConfigResult<()> {
    if stack.iter().any(|name| name == task_name) {
        stack.push(task_name.to_string());
        return Err(ConfigError::LoopDetected(stack.join(" -> ")));
    }

    let task = tasks.get(task_name)?;

    stack.push(task_name.to_string());
    for reference in task.actions.iter().filter_map(|a| a.task_reference()) {
        check_task(tasks, &reference.task, stack)?;
    }
    stack.pop();

    Ok(())
}
