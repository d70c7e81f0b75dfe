//! Main CLI application

use crate::config::find_tasks_file;
use crate::runner::{run as run_task, RunOptions, ShellExecutor, TaskSet, DEFAULT_TASK};
use anyhow::Context as _;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use clap_complete::Shell;
use colored::Colorize;
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Silent = 0,
    Quiet = 1,
    Normal = 2,
    Verbose = 3,
}

impl Verbosity {
    /// Default log filter for this level, used when `RUST_LOG` is unset
    fn filter(self) -> &'static str {
        match self {
            Verbosity::Silent => "off",
            Verbosity::Quiet => "warn",
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
        }
    }
}

/// Build the clap command
pub fn build_command() -> Command {
    Command::new("taskforge")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Run declarative tasks defined in YAML")
        .arg(
            Arg::new("task")
                .value_name("TASK")
                .default_value(DEFAULT_TASK)
                .help("Task to run, namespaced tasks as ns:task"),
        )
        .arg(
            Arg::new("file")
                .short('f')
                .long("file")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Path to the tasks file (default: search upward for tasks.yaml)"),
        )
        .arg(
            Arg::new("set")
                .long("set")
                .value_name("KEY=VALUE")
                .value_parser(parse_key_value)
                .action(ArgAction::Append)
                .help("Override a variable; keys are uppercased"),
        )
        .arg(
            Arg::new("with")
                .long("with")
                .value_name("KEY=VALUE")
                .value_parser(parse_key_value)
                .action(ArgAction::Append)
                .help("Bind an input of the requested task"),
        )
        .arg(
            Arg::new("list")
                .long("list")
                .action(ArgAction::SetTrue)
                .help("List the tasks of the tasks file"),
        )
        .arg(
            Arg::new("list-all")
                .long("list-all")
                .action(ArgAction::SetTrue)
                .conflicts_with("list")
                .help("List all tasks, including those from includes"),
        )
        .arg(
            Arg::new("completions")
                .long("completions")
                .value_name("SHELL")
                .value_parser(value_parser!(Shell))
                .help("Print shell completions and exit"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only print command output, warnings and errors")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("silent")
                .short('s')
                .long("silent")
                .help("Print no log output")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Print verbose output")
                .action(ArgAction::SetTrue),
        )
}

/// Get verbosity level from matches
fn get_verbosity(matches: &ArgMatches) -> Verbosity {
    if matches.get_flag("silent") {
        Verbosity::Silent
    } else if matches.get_flag("quiet") {
        Verbosity::Quiet
    } else if matches.get_flag("verbose") {
        Verbosity::Verbose
    } else {
        Verbosity::Normal
    }
}

/// Parse `KEY=VALUE`; the value may itself contain `=`
fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

fn key_values<'a>(matches: &'a ArgMatches, id: &str) -> impl Iterator<Item = &'a (String, String)> {
    matches
        .get_many::<(String, String)>(id)
        .into_iter()
        .flatten()
}

/// `--set` pairs with uppercased keys
fn set_variables(matches: &ArgMatches) -> HashMap<String, String> {
    key_values(matches, "set")
        .map(|(k, v)| (k.to_uppercase(), v.clone()))
        .collect()
}

/// `--with` pairs, or `None` when the flag was not given
fn with_inputs(matches: &ArgMatches) -> Option<BTreeMap<String, String>> {
    matches.contains_id("with").then(|| {
        key_values(matches, "with")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    })
}

fn init_logging(verbosity: Verbosity) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity.filter()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}

fn print_tasks(tasks: &TaskSet, all: bool) {
    let listed: Vec<_> = if all {
        tasks.tasks().collect()
    } else {
        tasks.root_tasks().collect()
    };

    let width = listed
        .iter()
        .map(|task| task.name.len())
        .max()
        .unwrap_or(0)
        .max("Name".len());

    let header = format!("{:<width$}  Description", "Name", width = width);
    println!("{}", header.bold());
    for task in listed {
        let name = format!("{:<width$}", task.name, width = width);
        println!(
            "{}  {}",
            name.cyan(),
            task.description.as_deref().unwrap_or_default()
        );
    }
}

/// Run the CLI application with the process arguments
pub fn run() -> anyhow::Result<()> {
    run_from(std::env::args_os())
}

/// Run the CLI application with the given arguments
pub fn run_from<I, T>(args: I) -> anyhow::Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let mut command = build_command();
    let matches = command.clone().get_matches_from(args);

    if let Some(shell) = matches.get_one::<Shell>("completions") {
        clap_complete::generate(*shell, &mut command, "taskforge", &mut io::stdout());
        return Ok(());
    }

    init_logging(get_verbosity(&matches));

    let path = match matches.get_one::<PathBuf>("file") {
        Some(path) => path.clone(),
        None => find_tasks_file()?,
    };
    let set = set_variables(&matches);
    let tasks = TaskSet::load(&path, &set)?;
    debug!(origin = %tasks.origin(), count = tasks.tasks().count(), "loaded tasks");

    if matches.get_flag("list") || matches.get_flag("list-all") {
        print_tasks(&tasks, matches.get_flag("list-all"));
        return Ok(());
    }

    let task_name = matches
        .get_one::<String>("task")
        .map(String::as_str)
        .unwrap_or(DEFAULT_TASK);
    let options = RunOptions {
        set_variables: set,
        with_inputs: with_inputs(&matches),
        working_dir: Some(
            std::env::current_dir().context("failed to determine the current directory")?,
        ),
        ..RunOptions::default()
    };

    run_task(&tasks, task_name, &options, &ShellExecutor::new())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_verbosity_normal() {
        let matches = build_command().get_matches_from(vec!["taskforge"]);
        assert_eq!(get_verbosity(&matches), Verbosity::Normal);
    }

    #[test]
    fn test_get_verbosity_flags() {
        let matches = build_command().get_matches_from(vec!["taskforge", "-s", "-v"]);
        assert_eq!(get_verbosity(&matches), Verbosity::Silent);

        let matches = build_command().get_matches_from(vec!["taskforge", "--verbose"]);
        assert_eq!(get_verbosity(&matches), Verbosity::Verbose);
    }

    #[test]
    fn test_task_defaults_to_default() {
        let matches = build_command().get_matches_from(vec!["taskforge"]);
        assert_eq!(matches.get_one::<String>("task").unwrap(), DEFAULT_TASK);
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("a=b=c").unwrap(),
            ("a".to_string(), "b=c".to_string())
        );
        assert_eq!(parse_key_value("EMPTY=").unwrap().1, "");
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_set_keys_are_uppercased() {
        let matches = build_command().get_matches_from(vec![
            "taskforge",
            "build",
            "--set",
            "target=prod",
            "--set",
            "Region=eu",
        ]);
        let set = set_variables(&matches);
        assert_eq!(set.get("TARGET").map(String::as_str), Some("prod"));
        assert_eq!(set.get("REGION").map(String::as_str), Some("eu"));
        assert_eq!(matches.get_one::<String>("task").unwrap(), "build");
    }

    #[test]
    fn test_with_inputs() {
        let matches = build_command().get_matches_from(vec!["taskforge"]);
        assert!(with_inputs(&matches).is_none());

        let matches =
            build_command().get_matches_from(vec!["taskforge", "--with", "name=value"]);
        let with = with_inputs(&matches).unwrap();
        assert_eq!(with.get("name").map(String::as_str), Some("value"));
    }
}
