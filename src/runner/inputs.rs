//! Input binding and `{{ inputs.NAME }}` templating
//!
//! When a task is called with bindings, its action list is rendered through
//! minijinja with strict undefined handling. Unlike `${NAME}` substitution,
//! a reference to an input the task does not declare is an error.

use crate::config::{Action, Task};
use crate::error::{Result, TemplateError, TemplateResult};
use minijinja::{context, Environment, UndefinedBehavior};
use serde_yaml::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// Prefix of the environment entries written for bound inputs
pub const INPUT_ENV_PREFIX: &str = "INPUT_";

/// Check bindings against a task's input declarations
///
/// Every required input without a default needs a non-empty binding; all
/// missing names are reported together. Bindings the task does not declare
/// and bindings of deprecated inputs only produce warnings.
pub fn validate_inputs(task: &Task, with: &BTreeMap<String, String>) -> TemplateResult<()> {
    let mut missing: Vec<String> = task
        .inputs
        .iter()
        .filter(|(name, input)| {
            input.is_required() && with.get(*name).map_or(true, |value| value.is_empty())
        })
        .map(|(name, _)| name.clone())
        .collect();

    if !missing.is_empty() {
        missing.sort();
        return Err(TemplateError::MissingRequiredInputs(missing));
    }

    for key in with.keys() {
        match task.inputs.get(key) {
            None => warn!("task {} does not have an input named {}", task.name, key),
            Some(input) => {
                if let Some(message) = &input.deprecated_message {
                    warn!(
                        "input '{}' of task {} has been marked deprecated: {}",
                        key, task.name, message
                    );
                }
            }
        }
    }

    Ok(())
}

/// Values of every declared input: the binding, else the default, else empty
pub fn input_values(task: &Task, with: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    task.inputs
        .iter()
        .map(|(name, input)| {
            let value = with
                .get(name)
                .cloned()
                .or_else(|| input.default_value().map(str::to_string))
                .unwrap_or_default();
            (name.clone(), value)
        })
        .collect()
}

/// Validate bindings and return the task's actions with inputs rendered
pub fn template_actions(task: &Task, with: &BTreeMap<String, String>) -> Result<Vec<Action>> {
    validate_inputs(task, with)?;

    let values = input_values(task, with);
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    let ctx = context! { inputs => values };

    let mut tree = serde_yaml::to_value(&task.actions)?;
    render_value(&env, &ctx, &mut tree)?;
    let actions: Vec<Action> = serde_yaml::from_value(tree)?;

    Ok(actions)
}

fn render_value(env: &Environment, ctx: &minijinja::Value, value: &mut Value) -> TemplateResult<()> {
    match value {
        Value::String(s) if s.contains("{{") || s.contains("{%") => {
            let rendered = env
                .render_str(s, ctx)
                .map_err(|e| TemplateError::Resolution {
                    template: s.clone(),
                    error: e.to_string(),
                })?;
            *s = rendered;
        }
        Value::Sequence(items) => {
            for item in items {
                render_value(env, ctx, item)?;
            }
        }
        Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                render_value(env, ctx, item)?;
            }
        }
        Value::Tagged(tagged) => render_value(env, ctx, &mut tagged.value)?,
        _ => {}
    }
    Ok(())
}

/// `INPUT_<NAME>=value` entries for every input with a non-empty value
///
/// Names are uppercased and anything outside `[A-Z0-9_]` becomes `_`.
pub fn input_env_entries(values: &BTreeMap<String, String>) -> Vec<String> {
    values
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(name, value)| {
            let name: String = name
                .to_uppercase()
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect();
            format!("{}{}={}", INPUT_ENV_PREFIX, name, value)
        })
        .collect()
}
