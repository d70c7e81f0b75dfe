//! Command actions: wait conversion, command mutation and the retry loop

use crate::config::{CommandAction, Shell, Wait};
use crate::error::{ExecutionError, ExecutionResult, Result};
use crate::runner::context::Context;
use crate::runner::executor::{derive_config, ActionConfig, ActionExecutor};
use crate::runner::template::TemplateStore;
use crate::utils::{current_executable, truncate};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Commands starting with this prefix call back into this binary
pub const SELF_INVOCATION: &str = "./taskforge ";

/// Total seconds a wait action may take when it sets none
pub const DEFAULT_WAIT_SECONDS: u64 = 300;

const LABEL_WIDTH: usize = 60;

/// `$NAME` or `${NAME}` references to exported variables
static EXPORTED_VAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{?((?:TASKFORGE|TF)_VAR_[A-Za-z0-9_-]+)\}?")
        .expect("exported var regex is valid")
});

/// Build the polling command for a wait descriptor
pub fn convert_wait_to_cmd(wait: &Wait, timeout_seconds: u64) -> String {
    let mut parts: Vec<String> = vec![format!("{}tools", SELF_INVOCATION), "wait-for".into()];

    match wait {
        Wait::Cluster(cluster) => {
            parts.push(cluster.kind.clone());
            parts.extend(
                [&cluster.identifier, &cluster.condition]
                    .into_iter()
                    .filter(|s| !s.is_empty())
                    .cloned(),
            );
            if !cluster.namespace.is_empty() {
                parts.push(format!("-n {}", cluster.namespace));
            }
        }
        Wait::Network(network) => {
            let protocol = network.protocol.to_lowercase();
            let code = if network.code == 0 && protocol.starts_with("http") {
                200
            } else {
                network.code
            };
            parts.push(protocol);
            parts.push(network.address.clone());
            parts.push(code.to_string());
        }
    }

    parts.push(format!("--timeout {}s", timeout_seconds));
    parts.join(" ")
}

/// Turn a wait action into a plain command action
///
/// Waits always run muted, without retries, captures, `dir` or `env`.
pub fn wait_as_command(action: &CommandAction) -> CommandAction {
    let Some(wait) = &action.wait else {
        return action.clone();
    };

    let seconds = action.max_total_seconds.unwrap_or(DEFAULT_WAIT_SECONDS);
    CommandAction {
        cmd: Some(convert_wait_to_cmd(wait, seconds)),
        wait: None,
        description: action.description.clone(),
        mute: Some(true),
        max_retries: Some(0),
        max_total_seconds: Some(seconds),
        shell: action.shell.clone(),
        ..CommandAction::default()
    }
}

/// Point self-invocations at this executable and substitute `${NAME}`
///
/// On Windows with a PowerShell shell the command is also made PowerShell
/// friendly first, see [`powershell_compat`].
pub fn mutate_command(cmd: &str, shell: &Shell, store: &TemplateStore) -> String {
    let mut cmd = match current_executable() {
        Some(exe) => cmd.replace(SELF_INVOCATION, &format!("{} ", exe.display())),
        None => cmd.to_string(),
    };
    if cfg!(windows) && is_powershell(shell.windows.as_deref()) {
        cmd = powershell_compat(&cmd);
    }
    store.substitute(&cmd)
}

/// A missing Windows shell preference means PowerShell
fn is_powershell(shell: Option<&str>) -> bool {
    match shell {
        None => true,
        Some(shell) => matches!(
            shell.to_lowercase().as_str(),
            "pwsh" | "pwsh.exe" | "powershell" | "powershell.exe"
        ),
    }
}

/// Rewrite a leading `touch ` to `New-Item ` and exported variable
/// references to `$Env:NAME`
pub fn powershell_compat(cmd: &str) -> String {
    let cmd = match cmd.strip_prefix("touch ") {
        Some(rest) => format!("New-Item {}", rest),
        None => cmd.to_string(),
    };
    let converted = EXPORTED_VAR.replace_all(&cmd, "$$Env:$1").into_owned();
    if converted != cmd {
        debug!("converted command \"{}\" to \"{}\"", cmd, converted);
    }
    converted
}

/// Text used for a command in logs: its description, else the shortened command
pub fn action_label(action: &CommandAction) -> String {
    match (&action.description, &action.cmd) {
        (Some(description), _) if !description.is_empty() => description.clone(),
        (_, Some(cmd)) => truncate(cmd, LABEL_WIDTH),
        _ => String::new(),
    }
}

/// Run one command action in `ctx`, storing its captures on success
pub fn run_command_action(
    action: &CommandAction,
    ctx: &mut Context,
    inherited_env: &[String],
    executor: &dyn ActionExecutor,
) -> Result<()> {
    let is_wait = action.wait.is_some();
    let action = wait_as_command(action);
    let label = action_label(&action);

    let config = derive_config(
        &ctx.defaults,
        &action,
        &ctx.store,
        inherited_env,
        ctx.env_file_path(),
        &ctx.working_dir,
    );
    let cmd = mutate_command(
        action.cmd.as_deref().unwrap_or_default(),
        &config.shell,
        &ctx.store,
    );

    let tasks = ctx.call_path();
    info!(tasks = %tasks, "Running \"{}\"", label);
    let output = run_with_retries(executor, &config, &cmd, &label)?;

    for output_variable in &action.set_variables {
        ctx.store.capture(output_variable, &output)?;
    }

    if is_wait {
        info!(tasks = %tasks, "Wait for \"{}\" succeeded", label);
    } else {
        info!(tasks = %tasks, "Completed \"{}\"", label);
    }
    Ok(())
}

/// Attempt `cmd` until it succeeds, retries run out or the deadline passes
///
/// At most `max_retries + 1` attempts are made. With `max_total_seconds` of
/// at least one, each attempt is bounded by the time left before the
/// deadline and no attempt starts after it. A limit too far in the future
/// to represent runs without a deadline.
pub fn run_with_retries(
    executor: &dyn ActionExecutor,
    config: &ActionConfig,
    cmd: &str,
    label: &str,
) -> ExecutionResult<String> {
    let deadline = (config.max_total_seconds >= 1)
        .then(|| Instant::now().checked_add(Duration::from_secs(config.max_total_seconds)))
        .flatten();
    let mut last: Option<ExecutionError> = None;

    for attempt in 0..=config.max_retries {
        let remaining = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                Some(deadline - now)
            }
            None => None,
        };

        if attempt > 0 {
            debug!(attempt, max_retries = config.max_retries, "retrying \"{}\"", label);
        }

        match executor.run(config, cmd, remaining) {
            Ok(output) => return Ok(output),
            Err(err) => {
                warn!("\"{}\" failed: {}", label, err);
                last = Some(err);
            }
        }
    }

    let timed_out = deadline.is_some_and(|deadline| Instant::now() >= deadline)
        || matches!(last, Some(ExecutionError::AttemptTimedOut(_)));
    let last = last.map(Box::new);

    if timed_out {
        Err(ExecutionError::Timeout {
            command: label.to_string(),
            seconds: config.max_total_seconds,
            last,
        })
    } else {
        Err(ExecutionError::RetriesExhausted {
            command: label.to_string(),
            retries: config.max_retries,
            last,
        })
    }
}
