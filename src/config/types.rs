//! Core configuration types
//!
//! This module defines the data structures that represent a tasks file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level tasks file structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TasksFile {
    /// Other task files to import, each under its own namespace key
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub includes: Vec<IncludeEntry>,

    /// Variables available as `${NAME}` placeholders
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<Variable>,

    /// Tasks defined in this file
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// A single include entry, `namespace: location`
///
/// Kept as a map so that entries with several keys survive parsing and can be
/// rejected with a proper error by the include resolver.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct IncludeEntry(pub BTreeMap<String, String>);

impl IncludeEntry {
    /// The `(namespace, location)` pair, if the entry has exactly one key
    pub fn single(&self) -> Option<(&str, &str)> {
        if self.0.len() != 1 {
            return None;
        }
        self.0.iter().next().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Comma-separated keys, for error messages
    pub fn keys(&self) -> String {
        self.0.keys().cloned().collect::<Vec<_>>().join(", ")
    }
}

/// A variable declaration
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    /// Never echo the value to logs
    #[serde(default)]
    pub sensitive: bool,

    /// Indent continuation lines of multi-line values to the placeholder's column
    #[serde(default)]
    pub auto_indent: bool,

    #[serde(default, rename = "type")]
    pub variable_type: VariableType,

    /// Regular expression the final value must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// How a variable's value is interpreted when templating files
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    /// The value is substituted as-is
    #[default]
    Raw,
    /// The value is a path; file templating substitutes the file's contents
    File,
}

/// A task definition
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Task {
    pub name: String,

    /// Description shown by `--list`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Inputs that callers bind through `with`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, Input>,

    /// Files to place before the actions run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<File>,

    /// Actions to execute, in order
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// An input declaration on a task
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Input {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    #[serde(default)]
    pub required: bool,

    /// Warning printed when a caller binds this input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated_message: Option<String>,
}

impl Input {
    /// Default value, treating an empty string as no default
    pub fn default_value(&self) -> Option<&str> {
        self.default.as_deref().filter(|d| !d.is_empty())
    }

    /// An input with a default is never required, whatever its flag says
    pub fn is_required(&self) -> bool {
        self.required && self.default_value().is_none()
    }
}

/// A file or folder to download or copy
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct File {
    /// Local path or URL
    pub source: String,

    /// Destination, relative to the working directory
    pub target: String,

    /// Expected checksum: `<hex>` (sha256) or `<algo>:<hex>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shasum: Option<String>,

    #[serde(default)]
    pub executable: bool,

    /// Links to create pointing at the target
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symlinks: Vec<String>,

    /// Directory the fetched archive is extracted into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract_path: Option<String>,
}

/// One step of a task
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "RawAction", into = "RawAction")]
pub enum Action {
    /// Call another task
    TaskReference(TaskReference),

    /// Delegate a unit of work to the action executor
    Command(CommandAction),
}

impl Action {
    pub fn task_reference(&self) -> Option<&TaskReference> {
        match self {
            Action::TaskReference(reference) => Some(reference),
            Action::Command(_) => None,
        }
    }
}

/// A call to another task
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskReference {
    /// Name of the task to run, possibly namespaced (`ns:task`)
    pub task: String,

    /// Input bindings
    pub with: BTreeMap<String, String>,

    /// `KEY=VALUE` entries passed down to every command of the called task
    pub env: Vec<String>,
}

/// A command or wait to run through the action executor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandAction {
    pub cmd: Option<String>,
    pub wait: Option<Wait>,
    pub description: Option<String>,
    pub mute: Option<bool>,
    pub max_retries: Option<u32>,
    pub max_total_seconds: Option<u64>,
    pub env: Vec<String>,
    pub env_path: Option<String>,
    pub dir: Option<String>,
    pub shell: Option<Shell>,
    pub set_variables: Vec<OutputVariable>,
}

/// A "poll until true" descriptor
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Wait {
    Cluster(ClusterWait),
    Network(NetworkWait),
}

/// Wait for a cluster resource to reach a condition
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClusterWait {
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub identifier: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub condition: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

/// Wait for a network endpoint to respond
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct NetworkWait {
    pub protocol: String,
    pub address: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub code: u16,
}

fn is_zero(code: &u16) -> bool {
    *code == 0
}

/// Per-OS shell preference
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Shell {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linux: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub darwin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub windows: Option<String>,
}

/// Capture of an action's output into the template store
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputVariable {
    pub name: String,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub auto_indent: bool,
    #[serde(default, rename = "type")]
    pub variable_type: VariableType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// Flat on-disk form of an action
///
/// Every field of both action kinds lives here; [`Action`] converts from it and
/// rejects entries that mix the two.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RawAction {
    #[serde(default, alias = "taskReference", skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub with: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<Wait>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mute: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_total_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<Shell>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub set_variables: Vec<OutputVariable>,
}

impl TryFrom<RawAction> for Action {
    type Error = String;

    fn try_from(raw: RawAction) -> Result<Self, Self::Error> {
        if let Some(task) = raw.task {
            let mut extra = Vec::new();
            if raw.cmd.is_some() {
                extra.push("cmd");
            }
            if raw.wait.is_some() {
                extra.push("wait");
            }
            if !raw.set_variables.is_empty() {
                extra.push("setVariables");
            }
            if raw.max_retries.is_some() || raw.max_total_seconds.is_some() {
                extra.push("maxRetries/maxTotalSeconds");
            }
            if raw.dir.is_some() || raw.shell.is_some() || raw.env_path.is_some() {
                extra.push("dir/shell/envPath");
            }
            if !extra.is_empty() {
                return Err(format!(
                    "action referencing task '{}' cannot also set {}",
                    task,
                    extra.join(", ")
                ));
            }
            return Ok(Action::TaskReference(TaskReference {
                task,
                with: raw.with,
                env: raw.env,
            }));
        }

        if !raw.with.is_empty() {
            return Err("'with' is only valid on an action that references a task".to_string());
        }
        match (&raw.cmd, &raw.wait) {
            (Some(_), Some(_)) => {
                return Err("action cannot define both 'cmd' and 'wait'".to_string())
            }
            (None, None) => {
                return Err("action must define one of 'task', 'cmd' or 'wait'".to_string())
            }
            _ => {}
        }

        Ok(Action::Command(CommandAction {
            cmd: raw.cmd,
            wait: raw.wait,
            description: raw.description,
            mute: raw.mute,
            max_retries: raw.max_retries,
            max_total_seconds: raw.max_total_seconds,
            env: raw.env,
            env_path: raw.env_path,
            dir: raw.dir,
            shell: raw.shell,
            set_variables: raw.set_variables,
        }))
    }
}

impl From<Action> for RawAction {
    fn from(action: Action) -> Self {
        match action {
            Action::TaskReference(reference) => RawAction {
                task: Some(reference.task),
                with: reference.with,
                env: reference.env,
                ..RawAction::default()
            },
            Action::Command(command) => RawAction {
                cmd: command.cmd,
                wait: command.wait,
                description: command.description,
                mute: command.mute,
                max_retries: command.max_retries,
                max_total_seconds: command.max_total_seconds,
                env: command.env,
                env_path: command.env_path,
                dir: command.dir,
                shell: command.shell,
                set_variables: command.set_variables,
                ..RawAction::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_simple_tasks_file() {
        let yaml = r#"
tasks:
  - name: hello
    description: Say hello
    actions:
      - cmd: echo "hello"
"#;
        let file: TasksFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(file.tasks.len(), 1);
        assert_eq!(file.tasks[0].name, "hello");
        assert!(matches!(file.tasks[0].actions[0], Action::Command(_)));
    }

    #[test]
    fn test_deserialize_task_reference_with_inputs() {
        let yaml = r#"
tasks:
  - name: greet
    inputs:
      who:
        default: World
        deprecatedMessage: use 'name'
    actions:
      - task: echo
        with:
          msg: "Hello {{ inputs.who }}"
"#;
        let file: TasksFile = serde_yaml::from_str(yaml).unwrap();
        let task = &file.tasks[0];
        let input = task.inputs.get("who").unwrap();
        assert_eq!(input.default_value(), Some("World"));
        assert_eq!(input.deprecated_message.as_deref(), Some("use 'name'"));

        let reference = task.actions[0].task_reference().unwrap();
        assert_eq!(reference.task, "echo");
        assert_eq!(reference.with.get("msg").unwrap(), "Hello {{ inputs.who }}");
    }

    #[test]
    fn test_task_reference_alias() {
        let action: Action = serde_yaml::from_str("taskReference: build").unwrap();
        assert_eq!(action.task_reference().unwrap().task, "build");
    }

    #[test]
    fn test_deserialize_wait_actions() {
        let yaml = r#"
- wait:
    cluster:
      kind: pod
      identifier: app=nginx
      condition: Ready
      namespace: web
- wait:
    network:
      protocol: HTTP
      address: localhost:8080
"#;
        let actions: Vec<Action> = serde_yaml::from_str(yaml).unwrap();
        match &actions[0] {
            Action::Command(CommandAction {
                wait: Some(Wait::Cluster(cluster)),
                ..
            }) => assert_eq!(cluster.namespace, "web"),
            other => panic!("unexpected action {:?}", other),
        }
        match &actions[1] {
            Action::Command(CommandAction {
                wait: Some(Wait::Network(network)),
                ..
            }) => assert_eq!(network.code, 0),
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_reject_task_and_cmd() {
        let result: Result<Action, _> = serde_yaml::from_str("task: a\ncmd: echo hi");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("cannot also set cmd"), "{}", err);
    }

    #[test]
    fn test_reject_cmd_and_wait() {
        let yaml = "cmd: echo hi\nwait:\n  network:\n    protocol: tcp\n    address: x:1\n";
        let result: Result<Action, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn test_reject_empty_action() {
        let result: Result<Action, _> = serde_yaml::from_str("description: nothing");
        assert!(result.is_err());
    }

    #[test]
    fn test_required_with_default_is_not_required() {
        let input = Input {
            default: Some("fallback".into()),
            required: true,
            ..Input::default()
        };
        assert!(!input.is_required());

        let input = Input {
            default: Some(String::new()),
            required: true,
            ..Input::default()
        };
        assert!(input.is_required());
    }

    #[test]
    fn test_include_entry_single() {
        let file: TasksFile =
            serde_yaml::from_str("includes:\n  - foo: ./foo.yaml\n  - a: x\n    b: y\n").unwrap();
        assert_eq!(file.includes[0].single(), Some(("foo", "./foo.yaml")));
        assert_eq!(file.includes[1].single(), None);
        assert_eq!(file.includes[1].keys(), "a, b");
    }

    #[test]
    fn test_action_roundtrip_keeps_variant() {
        let yaml = r#"
cmd: echo ${FOO}
maxRetries: 2
setVariables:
  - name: OUT
    pattern: "^[a-z]+$"
"#;
        let action: Action = serde_yaml::from_str(yaml).unwrap();
        let value = serde_yaml::to_value(&action).unwrap();
        let back: Action = serde_yaml::from_value(value).unwrap();
        assert_eq!(action, back);
    }
}
