//! Include resolution and the merged task registry
//!
//! Includes are expanded breadth-first from a worklist of
//! `(namespace prefix, location)` entries. Every task loaded under prefix `P`
//! is registered as `P:name` and every task reference inside its file is
//! rewritten to `P:reference`, so references keep pointing at the same tasks
//! after all files are merged into one flat registry.

use crate::config::{
    load_included, parse_tasks_file, validate_tasks_file, Action, IncludeEntry, Location, Task,
    TasksFile,
};
use crate::error::{ConfigError, ConfigResult, Result};
use crate::runner::template::TemplateStore;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Separator between include namespaces and task names
pub const NAMESPACE_SEPARATOR: char = ':';

/// The fully merged set of tasks and variables for one tasks file
#[derive(Debug, Clone)]
pub struct TaskSet {
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
    store: TemplateStore,
    origin: Location,
}

/// An include waiting to be loaded
struct PendingInclude {
    prefix: String,
    location: Location,
    /// Locations of the files that led to this include, root first
    chain: Vec<Location>,
}

impl TaskSet {
    /// Load a tasks file from disk and resolve all of its includes
    pub fn load(path: &Path, overrides: &HashMap<String, String>) -> Result<TaskSet> {
        let file = parse_tasks_file(path)?;
        Self::resolve(file, Location::Local(path.to_path_buf()), overrides)
    }

    /// Resolve the includes of an already parsed root file
    ///
    /// Variables are merged in load order: root declarations first, then each
    /// included file's. `overrides` beat every declared default.
    pub fn resolve(
        root: TasksFile,
        origin: Location,
        overrides: &HashMap<String, String>,
    ) -> Result<TaskSet> {
        validate_tasks_file(&root, &origin.to_string())?;

        let mut store = TemplateStore::with_overrides(overrides);
        store.populate(&root.variables)?;

        let mut set = TaskSet {
            tasks: Vec::new(),
            index: HashMap::new(),
            store: TemplateStore::new(),
            origin: origin.clone(),
        };
        set.add_tasks("", root.tasks)?;

        let scratch = tempfile::Builder::new().prefix("taskforge-").tempdir()?;
        let mut queue = VecDeque::new();
        let root_chain = vec![canonical(&origin)];
        enqueue(&mut queue, "", &origin, &root.includes, &root_chain, &store)?;

        while let Some(pending) = queue.pop_front() {
            info!(namespace = %pending.prefix, location = %pending.location, "loading include");

            let file = load_included(&pending.location, scratch.path())?;
            validate_tasks_file(&file, &pending.location.to_string())?;

            store.populate(&file.variables)?;
            set.add_tasks(&pending.prefix, file.tasks)?;

            let mut chain = pending.chain;
            chain.push(canonical(&pending.location));
            enqueue(
                &mut queue,
                &pending.prefix,
                &pending.location,
                &file.includes,
                &chain,
                &store,
            )?;
        }

        set.store = store;
        Ok(set)
    }

    fn add_tasks(&mut self, prefix: &str, tasks: Vec<Task>) -> ConfigResult<()> {
        for mut task in tasks {
            task.name = qualify(prefix, &task.name);
            if !prefix.is_empty() {
                for action in &mut task.actions {
                    if let Action::TaskReference(reference) = action {
                        reference.task = qualify(prefix, &reference.task);
                    }
                }
            }

            if self.index.contains_key(&task.name) {
                return Err(ConfigError::Invalid(format!(
                    "task '{}' is defined more than once",
                    task.name
                )));
            }
            debug!(task = %task.name, "registered task");
            self.index.insert(task.name.clone(), self.tasks.len());
            self.tasks.push(task);
        }
        Ok(())
    }

    /// Look up a task by its qualified name
    pub fn get(&self, name: &str) -> ConfigResult<&Task> {
        self.index
            .get(name)
            .map(|&i| &self.tasks[i])
            .ok_or_else(|| ConfigError::TaskNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All tasks in load order
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    /// Tasks declared in the root file
    pub fn root_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks
            .iter()
            .filter(|task| !task.name.contains(NAMESPACE_SEPARATOR))
    }

    /// Variables merged from the root file and every include
    pub fn store(&self) -> &TemplateStore {
        &self.store
    }

    /// Location of the root tasks file
    pub fn origin(&self) -> &Location {
        &self.origin
    }
}

fn enqueue(
    queue: &mut VecDeque<PendingInclude>,
    prefix: &str,
    parent: &Location,
    includes: &[IncludeEntry],
    chain: &[Location],
    store: &TemplateStore,
) -> ConfigResult<()> {
    for entry in includes {
        let (namespace, raw_location) =
            entry
                .single()
                .ok_or_else(|| ConfigError::MalformedInclude {
                    location: parent.to_string(),
                    keys: entry.keys(),
                })?;

        let location = parent.join(&store.substitute(raw_location))?;
        if chain.contains(&canonical(&location)) {
            return Err(ConfigError::IncludeLoad {
                location: location.to_string(),
                error: format!("include cycle through '{}'", parent),
            });
        }

        queue.push_back(PendingInclude {
            prefix: qualify(prefix, namespace),
            location,
            chain: chain.to_vec(),
        });
    }
    Ok(())
}

/// Join a namespace prefix and a name
pub fn qualify(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}{}{}", prefix, NAMESPACE_SEPARATOR, name)
    }
}

fn canonical(location: &Location) -> Location {
    match location {
        Location::Local(path) => {
            Location::Local(fs::canonicalize(path).unwrap_or_else(|_| path.clone()))
        }
        remote => remote.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskforgeError;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        path
    }

    fn no_overrides() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn test_same_task_name_in_two_includes() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.yaml", "tasks:\n  - name: build\n    actions: [{cmd: echo a}]\n");
        write(&dir, "b.yaml", "tasks:\n  - name: build\n    actions: [{cmd: echo b}]\n");
        let root = write(
            &dir,
            "tasks.yaml",
            "includes:\n  - pkgA: ./a.yaml\n  - pkgB: ./b.yaml\ntasks:\n  - name: build\n",
        );

        let set = TaskSet::load(&root, &no_overrides()).unwrap();
        assert!(set.contains("build"));
        assert!(set.contains("pkgA:build"));
        assert!(set.contains("pkgB:build"));
        assert_eq!(set.root_tasks().count(), 1);
        assert_eq!(set.tasks().count(), 3);
    }

    #[test]
    fn test_references_are_namespaced() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "lib/build.yaml",
            r#"
includes:
  - tools: ./tools.yaml
tasks:
  - name: all
    actions:
      - task: compile
      - task: tools:lint
  - name: compile
    actions: [{cmd: echo compile}]
"#,
        );
        write(
            &dir,
            "lib/tools.yaml",
            "tasks:\n  - name: lint\n    actions: [{task: fmt}]\n  - name: fmt\n    actions: [{cmd: echo fmt}]\n",
        );
        let root = write(&dir, "tasks.yaml", "includes:\n  - build: ./lib/build.yaml\n");

        let set = TaskSet::load(&root, &no_overrides()).unwrap();
        let all = set.get("build:all").unwrap();
        let references: Vec<_> = all
            .actions
            .iter()
            .filter_map(|a| a.task_reference())
            .map(|r| r.task.as_str())
            .collect();
        assert_eq!(references, vec!["build:compile", "build:tools:lint"]);

        let lint = set.get("build:tools:lint").unwrap();
        assert_eq!(lint.actions[0].task_reference().unwrap().task, "build:tools:fmt");
        assert!(set.contains("build:tools:fmt"));
    }

    #[test]
    fn test_include_variables_merge_under_overrides() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "inc.yaml",
            "variables:\n  - name: FROM_INCLUDE\n    default: inc\n  - name: SHARED\n    default: inc\n  - name: SET_ME\n    default: inc\n",
        );
        let root = write(
            &dir,
            "tasks.yaml",
            "variables:\n  - name: SHARED\n    default: root\nincludes:\n  - inc: ./inc.yaml\n",
        );

        let mut overrides = HashMap::new();
        overrides.insert("SET_ME".to_string(), "cli".to_string());
        let set = TaskSet::load(&root, &overrides).unwrap();

        assert_eq!(set.store().value("FROM_INCLUDE"), Some("inc"));
        assert_eq!(set.store().value("SHARED"), Some("root"));
        assert_eq!(set.store().value("SET_ME"), Some("cli"));
    }

    #[test]
    fn test_include_location_is_templated() {
        let dir = TempDir::new().unwrap();
        write(&dir, "v2/lib.yaml", "tasks:\n  - name: hello\n");
        let root = write(
            &dir,
            "tasks.yaml",
            "variables:\n  - name: VERSION\n    default: v1\nincludes:\n  - lib: ./${VERSION}/lib.yaml\n",
        );

        let mut overrides = HashMap::new();
        overrides.insert("VERSION".to_string(), "v2".to_string());
        let set = TaskSet::load(&root, &overrides).unwrap();
        assert!(set.contains("lib:hello"));
    }

    #[test]
    fn test_malformed_include() {
        let dir = TempDir::new().unwrap();
        let root = write(
            &dir,
            "tasks.yaml",
            "includes:\n  - a: ./a.yaml\n    b: ./b.yaml\n",
        );

        let err = TaskSet::load(&root, &no_overrides()).unwrap_err();
        assert!(matches!(
            err,
            TaskforgeError::Config(ConfigError::MalformedInclude { .. })
        ));
    }

    #[test]
    fn test_missing_include() {
        let dir = TempDir::new().unwrap();
        let root = write(&dir, "tasks.yaml", "includes:\n  - gone: ./missing.yaml\n");

        let err = TaskSet::load(&root, &no_overrides()).unwrap_err();
        assert!(matches!(
            err,
            TaskforgeError::Config(ConfigError::IncludeLoad { .. })
        ));
    }

    #[test]
    fn test_include_cycle_is_rejected() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.yaml", "includes:\n  - b: ./b.yaml\n");
        write(&dir, "b.yaml", "includes:\n  - a: ./a.yaml\n");
        let root = write(&dir, "tasks.yaml", "includes:\n  - a: ./a.yaml\n");

        let err = TaskSet::load(&root, &no_overrides()).unwrap_err();
        match err {
            TaskforgeError::Config(ConfigError::IncludeLoad { error, .. }) => {
                assert!(error.contains("include cycle"), "{}", error)
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_same_file_included_twice_is_not_a_cycle() {
        let dir = TempDir::new().unwrap();
        write(&dir, "common.yaml", "tasks:\n  - name: hi\n");
        write(&dir, "a.yaml", "includes:\n  - common: ./common.yaml\n");
        let root = write(
            &dir,
            "tasks.yaml",
            "includes:\n  - a: ./a.yaml\n  - common: ./common.yaml\n",
        );

        let set = TaskSet::load(&root, &no_overrides()).unwrap();
        assert!(set.contains("common:hi"));
        assert!(set.contains("a:common:hi"));
    }

    #[test]
    fn test_get_unknown_task() {
        let set = TaskSet::resolve(
            TasksFile::default(),
            Location::Local("tasks.yaml".into()),
            &no_overrides(),
        )
        .unwrap();
        assert!(matches!(set.get("nope"), Err(ConfigError::TaskNotFound(_))));
    }

    #[test]
    fn test_qualify() {
        assert_eq!(qualify("", "build"), "build");
        assert_eq!(qualify("a", "build"), "a:build");
        assert_eq!(qualify("a:b", "c:build"), "a:b:c:build");
    }
}
