//! Task execution
//!
//! A [`Runner`] owns the state of one run and executes a task's files and
//! actions depth-first, recursing into referenced tasks.

use crate::config::{Action, Task};
use crate::error::{Result, TaskforgeError};
use crate::runner::action::run_command_action;
use crate::runner::context::Context;
use crate::runner::executor::{ActionDefaults, ActionExecutor};
use crate::runner::files::place_files;
use crate::runner::include::TaskSet;
use crate::runner::inputs::{input_env_entries, input_values, template_actions};
use crate::runner::loops::check_for_task_loops;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tracing::{debug, info};

/// Name of the task run when none is given
pub const DEFAULT_TASK: &str = "default";

/// Caller-supplied settings for a single run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Variable overrides, highest precedence
    pub set_variables: HashMap<String, String>,

    /// Input bindings for the requested task
    pub with_inputs: Option<BTreeMap<String, String>>,

    /// Directory to run in instead of the current one
    pub working_dir: Option<PathBuf>,

    pub defaults: ActionDefaults,
}

/// Run `task_name` from `tasks` with `executor` as the command backend
pub fn run(
    tasks: &TaskSet,
    task_name: &str,
    options: &RunOptions,
    executor: &dyn ActionExecutor,
) -> Result<()> {
    Runner::new(tasks, options, executor)?.run(task_name)
}

/// Executes tasks from one [`TaskSet`] against a private run context
pub struct Runner<'a> {
    tasks: &'a TaskSet,
    executor: &'a dyn ActionExecutor,
    with_inputs: Option<BTreeMap<String, String>>,
    ctx: Context,
}

impl<'a> Runner<'a> {
    pub fn new(
        tasks: &'a TaskSet,
        options: &RunOptions,
        executor: &'a dyn ActionExecutor,
    ) -> Result<Self> {
        let mut store = tasks.store().clone();
        store.add_overrides(&options.set_variables);

        let mut ctx = Context::new(store)?.with_defaults(options.defaults.clone());
        if let Some(dir) = &options.working_dir {
            ctx = ctx.with_working_dir(dir.clone());
        }

        Ok(Runner {
            tasks,
            executor,
            with_inputs: options.with_inputs.clone(),
            ctx,
        })
    }

    /// The run context, including the template store as it stands
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Validate the call graph of `task_name`, then execute it
    pub fn run(&mut self, task_name: &str) -> Result<()> {
        check_for_task_loops(self.tasks, task_name)?;
        let task = self.tasks.get(task_name)?;
        let with = self.with_inputs.clone();

        self.call_task(task, with.as_ref(), &[])
    }

    /// Bind inputs when needed and execute `task`
    fn call_task(
        &mut self,
        task: &'a Task,
        with: Option<&BTreeMap<String, String>>,
        env: &[String],
    ) -> Result<()> {
        let result = self
            .bind_inputs(task, with)
            .and_then(|actions| self.execute_task(task, &actions, env));
        result.map_err(|err| TaskforgeError::in_task(&task.name, err))
    }

    /// Template the task's actions when it takes inputs or is given bindings
    fn bind_inputs(
        &mut self,
        task: &Task,
        with: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<Action>> {
        let has_bindings = with.is_some_and(|w| !w.is_empty());
        if !has_bindings && task.inputs.is_empty() {
            return Ok(task.actions.clone());
        }

        let with: BTreeMap<String, String> = with
            .into_iter()
            .flatten()
            .map(|(k, v)| (k.clone(), self.ctx.store.substitute(v)))
            .collect();

        let actions = template_actions(task, &with)?;
        self.ctx
            .append_env(&input_env_entries(&input_values(task, &with)))?;
        Ok(actions)
    }

    fn execute_task(&mut self, task: &Task, actions: &[Action], env: &[String]) -> Result<()> {
        info!(task = %task.name, "Running task");
        self.ctx.push_task(task.name.clone());

        let result = self.execute_actions(task, actions, env);

        self.ctx.pop_task();
        if result.is_ok() {
            debug!(task = %task.name, "Task completed");
        }
        result
    }

    fn execute_actions(&mut self, task: &Task, actions: &[Action], env: &[String]) -> Result<()> {
        place_files(&task.files, &self.ctx.store, &self.ctx.working_dir)?;

        for action in actions {
            self.perform_action(action, env)?;
        }
        Ok(())
    }

    fn perform_action(&mut self, action: &Action, env: &[String]) -> Result<()> {
        match action {
            Action::TaskReference(reference) => {
                let target = self.tasks.get(&reference.task)?;

                let mut inherited = env.to_vec();
                inherited.extend(
                    reference
                        .env
                        .iter()
                        .map(|entry| self.ctx.store.substitute(entry)),
                );

                self.call_task(target, Some(&reference.with), &inherited)
            }
            Action::Command(command) => {
                run_command_action(command, &mut self.ctx, env, self.executor)
            }
        }
    }
}
