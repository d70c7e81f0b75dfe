//! Tasks file parsing, discovery and loading

use crate::config::types::TasksFile;
use crate::error::{ConfigError, ConfigResult, TaskforgeError};
use crate::utils;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

/// Default tasks file names to search for
pub const TASKS_FILE_NAMES: &[&str] = &["tasks.yaml", "tasks.yml"];

/// Where a tasks file lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local(PathBuf),
    Remote(Url),
}

impl Location {
    /// Resolve an include location relative to the file that declares it
    ///
    /// Local paths are joined to the including file's directory; relative
    /// paths inside a remote file resolve against that file's URL.
    pub fn join(&self, include: &str) -> ConfigResult<Location> {
        if let Some(url) = utils::parse_url(include) {
            return Ok(Location::Remote(url));
        }
        match self {
            Location::Local(path) => {
                let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
                Ok(Location::Local(base_dir.join(include)))
            }
            Location::Remote(url) => {
                url.join(include)
                    .map(Location::Remote)
                    .map_err(|e| ConfigError::IncludeLoad {
                        location: include.to_string(),
                        error: e.to_string(),
                    })
            }
        }
    }

    /// File name component, used when downloading to a scratch directory
    pub fn file_name(&self) -> String {
        match self {
            Location::Local(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "tasks.yaml".to_string()),
            Location::Remote(url) => url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|name| !name.is_empty())
                .unwrap_or("tasks.yaml")
                .to_string(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Local(path) => write!(f, "{}", path.display()),
            Location::Remote(url) => write!(f, "{}", url),
        }
    }
}

/// Find the tasks file by searching current and parent directories
pub fn find_tasks_file() -> ConfigResult<PathBuf> {
    find_tasks_file_from(env::current_dir().map_err(|e| {
        ConfigError::Invalid(format!("Failed to get current directory: {}", e))
    })?)
}

/// Find the tasks file starting from a specific directory
pub fn find_tasks_file_from(start_dir: PathBuf) -> ConfigResult<PathBuf> {
    let mut current_dir = start_dir;
    let mut searched_paths = Vec::new();

    loop {
        for file_name in TASKS_FILE_NAMES {
            let path = current_dir.join(file_name);
            searched_paths.push(path.display().to_string());

            if path.is_file() {
                return Ok(path);
            }
        }

        match current_dir.parent() {
            Some(parent) => current_dir = parent.to_path_buf(),
            None => return Err(ConfigError::NotFound(searched_paths.join(", "))),
        }
    }
}

/// Parse a tasks file from a path
pub fn parse_tasks_file(path: &Path) -> Result<TasksFile, TaskforgeError> {
    let contents = fs::read_to_string(path).map_err(|e| {
        ConfigError::Invalid(format!("Failed to read {}: {}", path.display(), e))
    })?;

    parse_tasks(&contents)
}

/// Parse a tasks file from a string
pub fn parse_tasks(yaml: &str) -> Result<TasksFile, TaskforgeError> {
    let file: TasksFile = serde_yaml::from_str(yaml)?;
    Ok(file)
}

/// Load an included tasks file
///
/// Remote files are downloaded into `scratch_dir` first. Every failure is
/// reported as an include load error naming the location.
pub fn load_included(location: &Location, scratch_dir: &Path) -> ConfigResult<TasksFile> {
    let load_error = |error: String| ConfigError::IncludeLoad {
        location: location.to_string(),
        error,
    };

    let contents = match location {
        Location::Local(path) => fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?,
        Location::Remote(url) => {
            let dest = scratch_dir.join(unique_scratch_name(scratch_dir, &location.file_name()));
            utils::download_to_file(url.as_str(), &dest).map_err(load_error)?;
            fs::read_to_string(&dest).map_err(|e| load_error(e.to_string()))?
        }
    };

    serde_yaml::from_str(&contents).map_err(|e| load_error(e.to_string()))
}

fn unique_scratch_name(dir: &Path, name: &str) -> String {
    if !dir.join(name).exists() {
        return name.to_string();
    }
    let mut n = 1;
    loop {
        let candidate = format!("{}-{}", n, name);
        if !dir.join(&candidate).exists() {
            return candidate;
        }
        n += 1;
    }
}
