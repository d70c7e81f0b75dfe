//! Action executor backend
//!
//! The engine hands every command to an [`ActionExecutor`] together with the
//! fully derived [`ActionConfig`]. [`ShellExecutor`] is the default backend and
//! runs the command through the platform shell.

use crate::config::{CommandAction, Shell};
use crate::error::{ExecutionError, ExecutionResult};
use crate::runner::template::TemplateStore;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command as StdCommand, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;
use wait_timeout::ChildExt;

/// Runs a single command attempt
///
/// Implementations return the command's standard output on success. When
/// `timeout` is set the attempt must give up once it elapses and return
/// [`ExecutionError::AttemptTimedOut`].
pub trait ActionExecutor {
    fn run(
        &self,
        config: &ActionConfig,
        cmd: &str,
        timeout: Option<Duration>,
    ) -> ExecutionResult<String>;
}

/// Settings applied to every command action that does not override them
#[derive(Debug, Clone, Default)]
pub struct ActionDefaults {
    pub mute: bool,
    pub max_retries: u32,
    pub max_total_seconds: u64,
    pub shell: Shell,
}

/// Everything an executor needs to run one command action
#[derive(Debug, Clone, Default)]
pub struct ActionConfig {
    pub mute: bool,
    pub max_retries: u32,
    pub max_total_seconds: u64,

    /// Dotenv files loaded in order before `env` is applied
    pub env_files: Vec<PathBuf>,

    /// `KEY=VALUE` entries, later entries win
    pub env: Vec<String>,

    /// Working directory of the command
    pub dir: PathBuf,

    pub shell: Shell,
}

/// Merge an action with the defaults and resolve its `${NAME}` placeholders
///
/// `env_file` is the run's scratch env file and `inherited_env` the entries
/// passed down by task references. `dir` and `envPath` are resolved against
/// `working_dir`.
pub fn derive_config(
    defaults: &ActionDefaults,
    action: &CommandAction,
    store: &TemplateStore,
    inherited_env: &[String],
    env_file: &Path,
    working_dir: &Path,
) -> ActionConfig {
    let mut env_files = vec![env_file.to_path_buf()];
    if let Some(env_path) = &action.env_path {
        env_files.push(working_dir.join(store.substitute(env_path)));
    }

    let mut env = store.export_env();
    env.extend(inherited_env.iter().map(|entry| store.substitute(entry)));
    env.extend(action.env.iter().map(|entry| store.substitute(entry)));

    let dir = match &action.dir {
        Some(dir) => working_dir.join(store.substitute(dir)),
        None => working_dir.to_path_buf(),
    };

    ActionConfig {
        mute: action.mute.unwrap_or(defaults.mute),
        max_retries: action.max_retries.unwrap_or(defaults.max_retries),
        max_total_seconds: action
            .max_total_seconds
            .unwrap_or(defaults.max_total_seconds),
        env_files,
        env,
        dir,
        shell: action.shell.clone().unwrap_or_else(|| defaults.shell.clone()),
    }
}

/// Runs commands through the per-OS shell
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellExecutor;

impl ShellExecutor {
    pub fn new() -> Self {
        ShellExecutor
    }
}

impl ActionExecutor for ShellExecutor {
    fn run(
        &self,
        config: &ActionConfig,
        cmd: &str,
        timeout: Option<Duration>,
    ) -> ExecutionResult<String> {
        let interpreter = interpreter(&config.shell);
        let program = interpreter[0].clone();
        let spawn_error = |e: std::io::Error| ExecutionError::Spawn {
            shell: program.clone(),
            error: e.to_string(),
        };

        let mut command = StdCommand::new(&program);
        command.args(&interpreter[1..]);
        if program.starts_with("pwsh") || program.starts_with("powershell") {
            command.arg(format!("$ErrorActionPreference = 'Stop'; {}", cmd));
        } else {
            command.arg(cmd);
        }
        command.current_dir(&config.dir);

        for path in &config.env_files {
            for (key, value) in load_env_file(path)? {
                command.env(key, value);
            }
        }
        for entry in &config.env {
            match entry.split_once('=') {
                Some((key, value)) if !key.is_empty() => {
                    command.env(key, value);
                }
                _ => debug!("ignoring malformed env entry '{}'", entry),
            }
        }

        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut child = command.spawn().map_err(&spawn_error)?;
        let stdout = child.stdout.take().map(|s| stream(s, config.mute));
        let stderr = child.stderr.take().map(|s| stream(s, config.mute));

        let status = match timeout {
            Some(limit) => match child.wait_timeout(limit).map_err(&spawn_error)? {
                Some(status) => status,
                None => {
                    // Readers are left detached; a grandchild may still hold the pipes.
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ExecutionError::AttemptTimedOut(limit));
                }
            },
            None => child.wait().map_err(&spawn_error)?,
        };

        let stdout = collect(stdout);
        let stderr = collect(stderr);

        if status.success() {
            Ok(stdout)
        } else {
            Err(ExecutionError::CommandFailed {
                code: status.code(),
                stderr: stderr.trim().to_string(),
            })
        }
    }
}

/// Program and leading arguments for the shell configured for this OS
fn interpreter(shell: &Shell) -> Vec<String> {
    let preferred = if cfg!(target_os = "windows") {
        shell.windows.as_deref().unwrap_or("powershell")
    } else if cfg!(target_os = "macos") {
        shell.darwin.as_deref().unwrap_or("sh")
    } else {
        shell.linux.as_deref().unwrap_or("sh")
    };

    let flag = match preferred {
        "pwsh" | "powershell" | "pwsh.exe" | "powershell.exe" => "-Command",
        "cmd" | "cmd.exe" => "/C",
        _ => "-c",
    };
    vec![preferred.to_string(), flag.to_string()]
}

fn load_env_file(path: &Path) -> ExecutionResult<Vec<(String, String)>> {
    let env_error = |error: String| ExecutionError::EnvFile {
        path: path.to_path_buf(),
        error,
    };

    let iter = dotenvy::from_path_iter(path).map_err(|e| env_error(e.to_string()))?;
    iter.map(|item| item.map_err(|e| env_error(e.to_string())))
        .collect()
}

/// Read a child pipe line by line, echoing to stderr unless muted
fn stream<R: Read + Send + 'static>(reader: R, mute: bool) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut captured = String::new();
        for line in BufReader::new(reader).lines() {
            let Ok(line) = line else { break };
            if !mute {
                eprintln!("{}", line);
            }
            captured.push_str(&line);
            captured.push('\n');
        }
        captured
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}
