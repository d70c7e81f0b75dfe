//! Integration tests for YAML parsing

mod common;

use common::{create_test_tasks, write_file};
use std::collections::HashMap;
use std::fs;
use taskforge::config::{
    find_tasks_file_from, parse_tasks, parse_tasks_file, validate_tasks_file, Action, Wait,
};
use taskforge::error::{ConfigError, TaskforgeError};
use taskforge::runner::TaskSet;

#[test]
fn test_parse_complete_tasks_file() {
    let yaml = r#"
includes:
  - shared: ./shared.yaml
  - remote: https://example.com/tasks/${VERSION}/tasks.yaml

variables:
  - name: VERSION
    default: v1.2.0
    description: Release to deploy
  - name: TOKEN
    sensitive: true
  - name: MANIFEST
    type: file
    autoIndent: true
    pattern: ".+\\.yaml$"
    default: deploy.yaml

tasks:
  - name: default
    description: Build and deploy
    inputs:
      environment:
        description: Where to deploy
        default: staging
      legacy:
        deprecatedMessage: use 'environment' instead
    files:
      - source: https://example.com/tool-${VERSION}.tar.gz
        target: downloads/tool.tar.gz
        extractPath: tools
        shasum: sha256:0123abcd
        executable: true
        symlinks:
          - bin/tool
    actions:
      - task: shared:build
        with:
          target: "{{ inputs.environment }}"
        env:
          - CI=true
      - cmd: ./deploy.sh
        description: Deploy
        dir: scripts
        env:
          - TOKEN=${TOKEN}
        envPath: .env
        maxRetries: 3
        maxTotalSeconds: 120
        mute: false
        shell:
          linux: bash
          darwin: zsh
          windows: pwsh
        setVariables:
          - name: DEPLOY_ID
            pattern: "^[0-9]+$"
      - wait:
          network:
            protocol: https
            address: example.com/health
            code: 200
"#;

    let file = parse_tasks(yaml).unwrap();
    validate_tasks_file(&file, "tasks.yaml").unwrap();

    assert_eq!(file.includes.len(), 2);
    assert_eq!(file.variables.len(), 3);
    assert!(file.variables[1].sensitive);

    let task = &file.tasks[0];
    assert_eq!(task.description.as_deref(), Some("Build and deploy"));
    assert_eq!(task.inputs.len(), 2);
    assert_eq!(task.files[0].extract_path.as_deref(), Some("tools"));
    assert_eq!(task.actions.len(), 3);

    match &task.actions[1] {
        Action::Command(command) => {
            assert_eq!(command.max_retries, Some(3));
            assert_eq!(command.max_total_seconds, Some(120));
            assert_eq!(command.env_path.as_deref(), Some(".env"));
            assert_eq!(command.set_variables[0].name, "DEPLOY_ID");
            assert_eq!(
                command.shell.as_ref().and_then(|s| s.windows.as_deref()),
                Some("pwsh")
            );
        }
        other => panic!("unexpected action {:?}", other),
    }
    assert!(matches!(
        &task.actions[2],
        Action::Command(command) if matches!(command.wait, Some(Wait::Network(_)))
    ));
}

#[test]
fn test_unknown_action_field_is_rejected() {
    let yaml = r#"
tasks:
  - name: default
    actions:
      - cmd: echo hi
        retries: 3
"#;
    assert!(matches!(parse_tasks(yaml), Err(TaskforgeError::Yaml(_))));
}

#[test]
fn test_mixed_action_is_rejected() {
    let yaml = r#"
tasks:
  - name: default
    actions:
      - task: other
        cmd: echo hi
"#;
    assert!(parse_tasks(yaml).is_err());
}

#[test]
fn test_duplicate_task_names_are_rejected() {
    let yaml = r#"
tasks:
  - name: build
  - name: build
"#;
    let file = parse_tasks(yaml).unwrap();
    assert!(matches!(
        validate_tasks_file(&file, "tasks.yaml"),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_parse_tasks_file_and_find_upward() {
    let (dir, path) = create_test_tasks("tasks:\n  - name: default\n    actions:\n      - cmd: echo hi\n");
    let nested = dir.path().join("a/b/c");
    fs::create_dir_all(&nested).unwrap();

    let found = find_tasks_file_from(nested).unwrap();
    assert_eq!(
        fs::canonicalize(found).unwrap(),
        fs::canonicalize(&path).unwrap()
    );

    let file = parse_tasks_file(&path).unwrap();
    assert_eq!(file.tasks[0].name, "default");
}

#[test]
fn test_no_tasks_file_found() {
    let dir = tempfile::TempDir::new().unwrap();
    let result = find_tasks_file_from(dir.path().to_path_buf());
    // A tasks file further up the real filesystem would also satisfy the search.
    if let Err(err) = result {
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}

#[test]
fn test_nested_includes_accumulate_namespaces() {
    let (dir, path) = create_test_tasks("includes:\n  - outer: ./outer/tasks.yaml\n");
    write_file(
        dir.path(),
        "outer/tasks.yaml",
        "includes:\n  - inner: ./inner/tasks.yaml\ntasks:\n  - name: run\n    actions:\n      - task: inner:hello\n",
    );
    write_file(
        dir.path(),
        "outer/inner/tasks.yaml",
        "tasks:\n  - name: hello\n    actions:\n      - cmd: echo hello\n",
    );

    let tasks = TaskSet::load(&path, &HashMap::new()).unwrap();
    let run = tasks.get("outer:run").unwrap();
    assert_eq!(
        run.actions[0].task_reference().unwrap().task,
        "outer:inner:hello"
    );
    assert!(tasks.contains("outer:inner:hello"));
    assert_eq!(tasks.root_tasks().count(), 0);
}

#[test]
fn test_malformed_include_entry() {
    let (_dir, path) = create_test_tasks("includes:\n  - a: ./a.yaml\n    b: ./b.yaml\n");
    let err = TaskSet::load(&path, &HashMap::new()).unwrap_err();
    assert!(matches!(
        err,
        TaskforgeError::Config(ConfigError::MalformedInclude { .. })
    ));
}
