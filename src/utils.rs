//! Small helpers shared by the config loader and the runner

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Environment variable overriding the detected architecture
pub const ARCHITECTURE_ENV: &str = "TASKFORGE_ARCHITECTURE";

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Parse `s` as an http(s) URL
pub fn parse_url(s: &str) -> Option<Url> {
    match Url::parse(s) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Some(url),
        _ => None,
    }
}

/// Check whether a string is an http(s) URL
pub fn is_url(s: &str) -> bool {
    parse_url(s).is_some()
}

/// Download `url` to `dest`, creating parent directories as needed
pub fn download_to_file(url: &str, dest: &Path) -> Result<(), String> {
    debug!(url, dest = %dest.display(), "downloading");

    let client = reqwest::blocking::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(|e| format!("failed to build HTTP client: {}", e))?;

    let response = client.get(url).send().map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("HTTP request failed with status: {}", response.status()));
    }
    let content = response.bytes().map_err(|e| e.to_string())?;

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    fs::write(dest, &content).map_err(|e| e.to_string())?;

    Ok(())
}

/// Copy a file or directory tree to `dest`, creating parent directories
pub fn copy_path(src: &Path, dest: &Path) -> io::Result<()> {
    if src.is_dir() {
        for entry in walkdir::WalkDir::new(src) {
            let entry = entry.map_err(io::Error::from)?;
            let relative = entry
                .path()
                .strip_prefix(src)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            let target = dest.join(relative);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target)?;
            } else {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(entry.path(), &target)?;
            }
        }
        return Ok(());
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src, dest)?;
    Ok(())
}

/// Remove a file, symlink or directory; a missing path is not an error
pub fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Architecture name in the form used by container images (amd64, arm64)
pub fn architecture() -> String {
    if let Ok(arch) = env::var(ARCHITECTURE_ENV) {
        if !arch.is_empty() {
            return arch;
        }
    }
    match env::consts::ARCH {
        "x86_64" => "amd64".to_string(),
        "aarch64" => "arm64".to_string(),
        other => other.to_string(),
    }
}

/// Absolute path of the running executable, if it can be determined
pub fn current_executable() -> Option<PathBuf> {
    env::current_exe().ok()
}

/// Truncate a string for display, appending "..." when cut
pub fn truncate(s: &str, max: usize) -> String {
    let line = s.lines().next().unwrap_or_default();
    if line.chars().count() <= max && line.len() == s.len() {
        return s.to_string();
    }
    let cut: String = line.chars().take(max).collect();
    format!("{}...", cut)
}
